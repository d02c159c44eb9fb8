//! Per-page render state shared between the interactive thread and jobs
//!
//! The interactive thread records what changed (dirty rectangles, a new
//! viewport, a zoom change) in the page's [`RenderRequest`]. A render job
//! later drains the request in one step and works from that snapshot, so
//! everything marked before the drain is rendered by that job and
//! everything marked after it is left for the next one.

use crate::config::CanvasConfig;
use notecanvas_cache::{PixelRect, Point, Rect, Size, TileCache, TileCoord, TileRequest};
use notecanvas_scheduler::SourceId;
use parking_lot::Mutex;
use std::mem;
use std::sync::Arc;

/// Widget that shows a page; called on the interactive thread only
pub trait RepaintTarget: Send + Sync {
    /// Repaint these screen rectangles
    fn repaint_rects(&self, rects: Vec<PixelRect>);

    /// Repaint the whole widget
    fn repaint_all(&self);
}

/// How the tile set has to change
#[derive(Debug, Clone, PartialEq)]
pub enum Retiling {
    /// Render exactly these missing tiles and add them to the live set
    Fill(Vec<TileCoord>),

    /// Rebuild the set around `center`, keeping `radius` pixels of margin
    Full { center: Point, radius: u32 },
}

/// Pending work for a page, drained by the render job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderRequest {
    /// Rebuild the tile set instead of patching it
    pub rerender_complete: bool,

    /// The page's on-screen size changed; repaint the whole widget
    pub size_changed: bool,

    /// Changed regions in document coordinates
    pub dirty_rects: Vec<Rect>,

    pub retiling: Option<Retiling>,
}

impl RenderRequest {
    pub fn is_empty(&self) -> bool {
        !self.rerender_complete && self.dirty_rects.is_empty() && self.retiling.is_none()
    }
}

/// Where the page is shown
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub zoom: f64,

    /// Visible part of the page in device pixels (page origin at 0,0)
    pub visible: PixelRect,

    /// Screen position of the page's device origin
    pub screen_offset: (i32, i32),
}

impl Viewport {
    pub fn new(zoom: f64, visible: PixelRect, screen_offset: (i32, i32)) -> Self {
        Self {
            zoom,
            visible,
            screen_offset,
        }
    }

    /// Convert a device rectangle into screen coordinates
    pub fn to_screen(&self, device: PixelRect) -> PixelRect {
        device.translate(self.screen_offset.0, self.screen_offset.1)
    }
}

/// A page as shown on screen, with its tile cache and pending request
pub struct PageView {
    page: usize,
    page_size: Size,
    retention_radius: u32,
    tiles: TileCache,
    viewport: Mutex<Viewport>,
    request: Mutex<RenderRequest>,
    target: Arc<dyn RepaintTarget>,
}

impl PageView {
    pub fn new(
        page: usize,
        page_size: Size,
        viewport: Viewport,
        config: &CanvasConfig,
        target: Arc<dyn RepaintTarget>,
    ) -> Arc<Self> {
        Arc::new(Self {
            page,
            page_size,
            retention_radius: config.retention_radius,
            tiles: TileCache::new(config.tile_size),
            viewport: Mutex::new(viewport),
            request: Mutex::new(RenderRequest::default()),
            target,
        })
    }

    /// Identity used by the scheduler for dedup and cancellation
    pub fn source_id(view: &Arc<PageView>) -> SourceId {
        SourceId::of(view)
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> Size {
        self.page_size
    }

    pub fn retention_radius(&self) -> u32 {
        self.retention_radius
    }

    pub fn tiles(&self) -> &TileCache {
        &self.tiles
    }

    pub fn viewport(&self) -> Viewport {
        *self.viewport.lock()
    }

    pub fn repaint_target(&self) -> Arc<dyn RepaintTarget> {
        Arc::clone(&self.target)
    }

    /// Tile request for the current viewport
    pub fn tile_request(&self, viewport: &Viewport) -> TileRequest {
        TileRequest {
            center: viewport.visible.center(),
            visible: viewport.visible,
            retention_radius: self.retention_radius,
            zoom: viewport.zoom,
            page_size: self.page_size,
        }
    }

    /// Record a changed region in document coordinates
    pub fn mark_dirty(&self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        self.request.lock().dirty_rects.push(rect);
    }

    /// Ask for the whole tile set to be rebuilt around the current viewport
    pub fn request_rerender(&self, size_changed: bool) {
        let viewport = self.viewport();
        let mut request = self.request.lock();
        request.rerender_complete = true;
        request.size_changed |= size_changed;
        request.retiling = Some(Retiling::Full {
            center: viewport.visible.center(),
            radius: self.retention_radius,
        });
    }

    /// Move or rescale the page
    ///
    /// A zoom change schedules a full rebuild. A scroll that only uncovers
    /// new area schedules the missing tiles; one that leaves cached tiles
    /// behind schedules a rebuild so they are evicted. Returns `true` when a
    /// render job is needed.
    pub fn set_viewport(&self, viewport: Viewport) -> bool {
        let previous = mem::replace(&mut *self.viewport.lock(), viewport);

        if (previous.zoom - viewport.zoom).abs() > f64::EPSILON {
            self.request_rerender(true);
            return true;
        }

        let tile_request = self.tile_request(&viewport);
        let missing = self.tiles.missing_for(&tile_request);
        let retained = tile_request
            .retained_area()
            .map_or(0, |area| self.tiles.tiles_covering(area).len());
        let leaves_tiles_behind = retained < self.tiles.len();

        if leaves_tiles_behind {
            let mut request = self.request.lock();
            request.rerender_complete = true;
            request.retiling = Some(Retiling::Full {
                center: viewport.visible.center(),
                radius: self.retention_radius,
            });
            return true;
        }

        if missing.is_empty() {
            return false;
        }

        let mut request = self.request.lock();
        match &mut request.retiling {
            Some(Retiling::Full { .. }) => {}
            Some(Retiling::Fill(coords)) => {
                for coord in missing {
                    if !coords.contains(&coord) {
                        coords.push(coord);
                    }
                }
            }
            None => request.retiling = Some(Retiling::Fill(missing)),
        }
        true
    }

    /// Move the pending request out, leaving an empty one
    pub fn take_request(&self) -> RenderRequest {
        mem::take(&mut *self.request.lock())
    }

    /// Whether anything is waiting to be rendered
    pub fn has_pending(&self) -> bool {
        !self.request.lock().is_empty()
    }
}
