//! Background repaint of one page
//!
//! A render job either patches dirty regions into the page's existing tiles
//! or rebuilds the tile set around the viewport. Painting happens under the
//! document's read lock; the tile cache lock is only taken to merge results.
//! Every repaint is posted back to the interactive thread.

use crate::document::{PageDocument, PagePainter, PaintFlags, SharedDocument};
use crate::error::{RenderError, RenderResult};
use crate::page_view::{PageView, RenderRequest, Retiling, Viewport};
use log::{debug, trace, warn};
use notecanvas_cache::{PixelRect, Rect, Surface, Tile, TileCoord, TileRequest, TileSlot};
use notecanvas_scheduler::{Job, JobContext, JobType, SourceId, UiDispatcher};
use rayon::prelude::*;
use std::sync::Arc;

/// Per-job rendering knobs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    /// Padding added around dirty rectangles, in document units
    pub dirty_padding: f64,

    /// Render tiles on the rayon pool
    pub parallel_tiles: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            dirty_padding: 2.0,
            parallel_tiles: true,
        }
    }
}

/// Paint a device-pixel region of a page into a fresh surface
pub(crate) fn render_region<D: PageDocument>(
    painter: &dyn PagePainter<D>,
    doc: &D,
    page: usize,
    device: PixelRect,
    zoom: f64,
    flags: PaintFlags,
) -> RenderResult<Surface> {
    if page >= doc.page_count() {
        return Err(RenderError::InvalidPage(page));
    }
    let mut surface = Surface::new(device.width, device.height)?;
    painter.paint(doc, page, device.to_document(zoom), zoom, &mut surface, flags)?;
    Ok(surface)
}

/// Repaints dirty regions of a page or rebuilds its tiles
pub struct RenderJob<D> {
    view: Arc<PageView>,
    document: SharedDocument<D>,
    painter: Arc<dyn PagePainter<D>>,
    dispatcher: Arc<dyn UiDispatcher>,
    settings: RenderSettings,
}

impl<D: PageDocument + 'static> RenderJob<D> {
    pub fn new(
        view: Arc<PageView>,
        document: SharedDocument<D>,
        painter: Arc<dyn PagePainter<D>>,
        dispatcher: Arc<dyn UiDispatcher>,
        settings: RenderSettings,
    ) -> Self {
        Self {
            view,
            document,
            painter,
            dispatcher,
            settings,
        }
    }

    /// Patch each dirty rectangle into the tiles it overlaps
    fn patch_dirty(&self, dirty: &[Rect], viewport: &Viewport, ctx: &JobContext) {
        let tiles = self.view.tiles();
        let page_bounds = self.view.page_size().device_bounds(viewport.zoom);

        for rect in dirty {
            if ctx.is_cancelled() {
                return;
            }

            let padded = rect.expand(self.settings.dirty_padding);
            let Some(device) = padded.to_device(viewport.zoom).intersection(&page_bounds) else {
                continue;
            };
            if tiles.tiles_covering(device).is_empty() {
                trace!("dirty rect {:?} overlaps no cached tile", device);
                continue;
            }

            let mask = {
                let doc = self.document.read();
                render_region(
                    self.painter.as_ref(),
                    &*doc,
                    self.view.page(),
                    device,
                    viewport.zoom,
                    PaintFlags::default(),
                )
            };
            let mask = match mask {
                Ok(mask) => mask,
                Err(err) => {
                    warn!("page {}: dirty region not repainted: {}", self.view.page(), err);
                    continue;
                }
            };

            if tiles.patch(device, &mask) > 0 {
                self.post_repaint(vec![viewport.to_screen(device)]);
            }
        }
    }

    /// Render specific missing tiles and merge them into the live set
    fn fill(&self, coords: Vec<TileCoord>, viewport: &Viewport, ctx: &JobContext) {
        let tiles = self.view.tiles();
        let page_bounds = self.view.page_size().device_bounds(viewport.zoom);
        let slots: Vec<TileSlot> = coords
            .into_iter()
            .filter_map(|coord| {
                tiles.tile_extent(coord, page_bounds).map(|extent| TileSlot {
                    coord,
                    extent,
                    zoom: viewport.zoom,
                })
            })
            .collect();

        let rendered = self.render_slots(slots, viewport.zoom, ctx);
        let extents: Vec<PixelRect> = rendered
            .iter()
            .map(|tile| viewport.to_screen(tile.extent()))
            .collect();
        if tiles.append(rendered) > 0 {
            self.post_repaint(extents);
        }
    }

    /// Build a new tile set around the viewport and swap it in
    fn rebuild(&self, request: RenderRequest, viewport: &Viewport, ctx: &JobContext) {
        let (center, radius) = match request.retiling {
            Some(Retiling::Full { center, radius }) => (center, radius),
            _ => (viewport.visible.center(), self.view.retention_radius()),
        };
        let tile_request = TileRequest {
            center,
            visible: viewport.visible,
            retention_radius: radius,
            zoom: viewport.zoom,
            page_size: self.view.page_size(),
        };

        let tiles = self.view.tiles();
        let mut reusable = tiles.reusable_tiles(viewport.zoom);
        if !request.dirty_rects.is_empty() {
            let dirty: Vec<PixelRect> = request
                .dirty_rects
                .iter()
                .map(|rect| rect.expand(self.settings.dirty_padding).to_device(viewport.zoom))
                .collect();
            reusable.retain(|tile| !dirty.iter().any(|d| tile.extent().intersects(d)));
        }

        let mut populated = tiles.populate(&tile_request, reusable);
        let rendered = self.render_slots(populated.missing, viewport.zoom, ctx);
        if ctx.is_cancelled() {
            debug!("page {}: rebuild cancelled, keeping old tiles", self.view.page());
            return;
        }

        let extents: Vec<PixelRect> = rendered
            .iter()
            .map(|tile| viewport.to_screen(tile.extent()))
            .collect();
        for tile in rendered {
            populated.set.insert(tile);
        }

        let tile_count = populated.set.len();
        tiles.swap(populated.set);
        trace!(
            "page {}: swapped in {} tiles at zoom {}",
            self.view.page(),
            tile_count,
            viewport.zoom
        );

        if tile_count == 0 {
            return;
        }
        if request.size_changed {
            let target = self.view.repaint_target();
            self.dispatcher.dispatch(Box::new(move || target.repaint_all()));
        } else if !extents.is_empty() {
            self.post_repaint(extents);
        }
    }

    /// Render slots under one read lock, in parallel when enabled
    ///
    /// Slots that fail to render are logged and left out.
    fn render_slots(&self, slots: Vec<TileSlot>, zoom: f64, ctx: &JobContext) -> Vec<Tile> {
        if slots.is_empty() {
            return Vec::new();
        }

        let guard = self.document.read();
        let doc: &D = &guard;
        let page = self.view.page();
        let painter = self.painter.as_ref();

        let render_one = |slot: TileSlot| -> Option<Tile> {
            if ctx.is_cancelled() {
                return None;
            }
            match render_region(painter, doc, page, slot.extent, zoom, PaintFlags::default()) {
                Ok(bitmap) => Some(slot.into_tile(bitmap)),
                Err(err) => {
                    warn!("page {}: tile {:?} not rendered: {}", page, slot.coord, err);
                    None
                }
            }
        };

        if self.settings.parallel_tiles {
            slots.into_par_iter().filter_map(render_one).collect()
        } else {
            slots.into_iter().filter_map(render_one).collect()
        }
    }

    fn post_repaint(&self, rects: Vec<PixelRect>) {
        let target = self.view.repaint_target();
        self.dispatcher
            .dispatch(Box::new(move || target.repaint_rects(rects)));
    }
}

impl<D: PageDocument + 'static> Job for RenderJob<D> {
    fn job_type(&self) -> JobType {
        JobType::Render
    }

    fn source(&self) -> Option<SourceId> {
        Some(PageView::source_id(&self.view))
    }

    fn run(&self, ctx: &JobContext) {
        if ctx.is_cancelled() {
            return;
        }
        // Left undrained, so the run after the pause sees the latest dirty state
        if ctx.is_paused() {
            trace!("page {}: rendering paused, deferring", self.view.page());
            ctx.defer_until_resumed();
            return;
        }

        let mut request = self.view.take_request();
        if request.is_empty() {
            trace!("page {}: nothing to render", self.view.page());
            return;
        }
        let viewport = self.view.viewport();

        if request.rerender_complete {
            self.rebuild(request, &viewport, ctx);
            return;
        }

        let dirty = std::mem::take(&mut request.dirty_rects);
        // Tiles at another zoom are about to be replaced by the rebuild the
        // zoom change requested
        if self.view.tiles().zoom() == Some(viewport.zoom) {
            self.patch_dirty(&dirty, &viewport, ctx);
        } else if !dirty.is_empty() {
            trace!("page {}: zoom changed, dirty rects left to the rebuild", self.view.page());
        }
        if let Some(Retiling::Fill(coords)) = request.retiling {
            self.fill(coords, &viewport, ctx);
        }
    }

    fn name(&self) -> &str {
        "render page"
    }
}
