//! Collaborator traits for the document and the vector painter
//!
//! The renderer does not know how strokes are drawn. It asks a
//! [`PagePainter`] to paint a document region into a surface, holding the
//! document's read lock for the duration.

use crate::error::RenderResult;
use notecanvas_cache::{Rect, Size, Surface};
use parking_lot::RwLock;
use std::sync::Arc;

/// Document shared between the interactive thread (writer) and render jobs
/// (readers)
pub type SharedDocument<D> = Arc<RwLock<D>>;

/// Read-only page geometry of a document
pub trait PageDocument: Send + Sync {
    fn page_count(&self) -> usize;

    /// Page size in document units, `None` for an invalid index
    fn page_size(&self, page: usize) -> Option<Size>;
}

/// Flags controlling what the painter draws
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaintFlags {
    /// Skip the paper background (used for masks and recoloured previews)
    pub hide_background: bool,

    /// Skip the live eraser outline
    pub hide_eraser_preview: bool,
}

impl PaintFlags {
    /// Flags used for thumbnails
    pub fn preview() -> Self {
        Self {
            hide_background: false,
            hide_eraser_preview: true,
        }
    }
}

/// Paints a region of a page into a surface
///
/// `region` is in document coordinates. The surface's top-left pixel maps to
/// `(region.x * zoom, region.y * zoom)` in device space, and one document
/// unit spans `zoom` pixels. Implementations are called from the worker
/// thread and from rayon pool threads concurrently, under a shared read lock.
pub trait PagePainter<D>: Send + Sync {
    fn paint(
        &self,
        doc: &D,
        page: usize,
        region: Rect,
        zoom: f64,
        target: &mut Surface,
        flags: PaintFlags,
    ) -> RenderResult<()>;
}

impl<D, F> PagePainter<D> for F
where
    F: Fn(&D, usize, Rect, f64, &mut Surface, PaintFlags) -> RenderResult<()> + Send + Sync,
{
    fn paint(
        &self,
        doc: &D,
        page: usize,
        region: Rect,
        zoom: f64,
        target: &mut Surface,
        flags: PaintFlags,
    ) -> RenderResult<()> {
        self(doc, page, region, zoom, target, flags)
    }
}
