//! Per-page tile cache
//!
//! A page view keeps its rendered pixels as a set of fixed-size tiles, all
//! at the same zoom. The set is rebuilt around the viewport when the zoom
//! changes, topped up with missing tiles when the viewport scrolls, and
//! patched in place when strokes dirty a region.
//!
//! Eviction is purely geometric: tiles outside the visible area expanded by
//! the retention radius are not carried over into the next set.

use crate::geometry::{PixelRect, Point, Size};
use crate::surface::Surface;
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Default tile edge length in device pixels
pub const TILE_SIZE: u32 = 256;

const ZOOM_EPSILON: f64 = 1e-9;

fn same_zoom(a: f64, b: f64) -> bool {
    (a - b).abs() < ZOOM_EPSILON
}

/// Tile position in the page's tile grid; (0, 0) is the top-left tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub col: u32,
    pub row: u32,
}

impl TileCoord {
    pub fn new(col: u32, row: u32) -> Self {
        Self { col, row }
    }
}

/// A rendered tile
#[derive(Debug, Clone)]
pub struct Tile {
    coord: TileCoord,
    extent: PixelRect,
    zoom: f64,
    bitmap: Arc<Surface>,
}

impl Tile {
    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    /// Device-pixel rectangle this tile covers
    pub fn extent(&self) -> PixelRect {
        self.extent
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn bitmap(&self) -> &Surface {
        &self.bitmap
    }

    /// Copy `mask` (whose top-left sits at `at`) into the overlapping part
    /// of this tile
    fn patch(&mut self, at: PixelRect, mask: &Surface) -> bool {
        if !self.extent.intersects(&at) {
            return false;
        }
        Arc::make_mut(&mut self.bitmap).blit(mask, at.x - self.extent.x, at.y - self.extent.y)
    }
}

/// A tile that still has to be rendered
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileSlot {
    pub coord: TileCoord,
    pub extent: PixelRect,
    pub zoom: f64,
}

impl TileSlot {
    /// Turn the slot into a tile once its bitmap is rendered
    ///
    /// The bitmap must have the extent's dimensions.
    pub fn into_tile(self, bitmap: Surface) -> Tile {
        debug_assert_eq!(bitmap.width(), self.extent.width);
        debug_assert_eq!(bitmap.height(), self.extent.height);
        Tile {
            coord: self.coord,
            extent: self.extent,
            zoom: self.zoom,
            bitmap: Arc::new(bitmap),
        }
    }
}

/// What area a tile set has to cover
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileRequest {
    /// Viewport centre in device pixels; missing tiles closest to it come first
    pub center: Point,

    /// Visible part of the page in device pixels
    pub visible: PixelRect,

    /// Extra margin kept cached around the visible area, in device pixels
    pub retention_radius: u32,

    /// Zoom the tiles are rendered at
    pub zoom: f64,

    /// Page size in document units, used to clip the grid
    pub page_size: Size,
}

impl TileRequest {
    /// Device-pixel area the set must cover: the visible area plus the
    /// retention margin, clipped to the page
    pub fn retained_area(&self) -> Option<PixelRect> {
        self.visible
            .expand(self.retention_radius)
            .intersection(&self.page_size.device_bounds(self.zoom))
    }
}

/// A complete set of tiles at one zoom
#[derive(Debug, Clone)]
pub struct TileSet {
    zoom: f64,
    tiles: Vec<Tile>,
}

impl TileSet {
    pub fn new(zoom: f64) -> Self {
        Self {
            zoom,
            tiles: Vec::new(),
        }
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    /// Add a tile, replacing any tile at the same coordinate
    ///
    /// Returns `false` (and drops the tile) if its zoom differs.
    pub fn insert(&mut self, tile: Tile) -> bool {
        if !same_zoom(tile.zoom, self.zoom) {
            return false;
        }
        match self.tiles.iter_mut().find(|t| t.coord == tile.coord) {
            Some(existing) => *existing = tile,
            None => self.tiles.push(tile),
        }
        true
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn contains(&self, coord: TileCoord) -> bool {
        self.tiles.iter().any(|t| t.coord == coord)
    }

    /// Total bitmap bytes
    pub fn byte_size(&self) -> usize {
        self.tiles.iter().map(|t| t.bitmap.byte_size()).sum()
    }
}

/// Result of [`TileCache::populate`]
#[derive(Debug, Clone)]
pub struct Populated {
    /// Reused tiles; rendered slots are inserted here before swapping
    pub set: TileSet,

    /// Slots to render, nearest to the viewport centre first
    pub missing: Vec<TileSlot>,
}

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TileCacheStats {
    /// Tiles in the live set
    pub tile_count: usize,

    /// Bitmap bytes held by the live set
    pub memory_used: usize,

    /// Zoom of the live set, if any
    pub zoom: Option<f64>,

    /// Full swaps performed
    pub swaps: u64,

    /// Tiles merged by `append`
    pub appended: u64,

    /// Tiles rewritten by `patch`
    pub patched: u64,

    /// Tiles dropped by a swap
    pub evictions: u64,
}

struct CacheState {
    live: Option<TileSet>,
    stats: TileCacheStats,
}

impl CacheState {
    fn refresh_stats(&mut self) {
        self.stats.tile_count = self.live.as_ref().map_or(0, TileSet::len);
        self.stats.memory_used = self.live.as_ref().map_or(0, TileSet::byte_size);
        self.stats.zoom = self.live.as_ref().map(TileSet::zoom);
    }
}

/// Spatial cache of rendered tiles for one page
///
/// The live set sits behind the drawing lock. The lock is held only for
/// lookups, appends, swaps and mask blits, never while rendering.
///
/// # Example
///
/// ```
/// use notecanvas_cache::{PixelRect, Point, Size, Surface, TileCache, TileRequest};
///
/// let cache = TileCache::new(256);
/// let request = TileRequest {
///     center: Point::new(200.0, 150.0),
///     visible: PixelRect::new(0, 0, 400, 300),
///     retention_radius: 0,
///     zoom: 1.0,
///     page_size: Size::new(595.0, 842.0),
/// };
///
/// let mut populated = cache.populate(&request, cache.reusable_tiles(1.0));
/// for slot in populated.missing {
///     let bitmap = Surface::new(slot.extent.width, slot.extent.height).unwrap();
///     populated.set.insert(slot.into_tile(bitmap));
/// }
/// cache.swap(populated.set);
///
/// assert_eq!(cache.tiles_covering(request.visible).len(), 4);
/// ```
pub struct TileCache {
    tile_size: u32,
    state: Mutex<CacheState>,
}

impl TileCache {
    /// Create an empty cache; `tile_size` is clamped to at least one pixel
    pub fn new(tile_size: u32) -> Self {
        Self {
            tile_size: tile_size.max(1),
            state: Mutex::new(CacheState {
                live: None,
                stats: TileCacheStats::default(),
            }),
        }
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Device extent of a tile, clipped to the page bounds
    pub fn tile_extent(&self, coord: TileCoord, page_bounds: PixelRect) -> Option<PixelRect> {
        let grid = PixelRect::new(
            (coord.col * self.tile_size) as i32,
            (coord.row * self.tile_size) as i32,
            self.tile_size,
            self.tile_size,
        );
        grid.intersection(&page_bounds)
    }

    /// Grid coordinates of every tile intersecting `area`
    pub fn coords_covering(&self, area: PixelRect) -> Vec<TileCoord> {
        if area.is_empty() {
            return Vec::new();
        }
        let size = self.tile_size as i64;
        let first_col = (area.x as i64).max(0) / size;
        let first_row = (area.y as i64).max(0) / size;
        let last_col = (area.right() - 1) / size;
        let last_row = (area.bottom() - 1) / size;
        if last_col < 0 || last_row < 0 {
            return Vec::new();
        }

        let mut coords = Vec::new();
        for row in first_row..=last_row {
            for col in first_col..=last_col {
                coords.push(TileCoord::new(col as u32, row as u32));
            }
        }
        coords
    }

    /// Compute the tile set needed for `request`
    ///
    /// Tiles from `reusable` with the same coordinate and zoom are carried
    /// over; every other needed coordinate becomes a [`TileSlot`]. Nothing is
    /// rendered and the live set is not touched.
    pub fn populate(&self, request: &TileRequest, reusable: Vec<Tile>) -> Populated {
        let mut set = TileSet::new(request.zoom);
        let Some(area) = request.retained_area() else {
            trace!("retained area is empty; nothing to populate");
            return Populated {
                set,
                missing: Vec::new(),
            };
        };
        let page_bounds = request.page_size.device_bounds(request.zoom);

        let mut reusable: Vec<Option<Tile>> = reusable
            .into_iter()
            .filter(|tile| same_zoom(tile.zoom, request.zoom))
            .map(Some)
            .collect();

        let mut missing = Vec::new();
        for coord in self.coords_covering(area) {
            let Some(extent) = self.tile_extent(coord, page_bounds) else {
                continue;
            };

            let reused = reusable
                .iter_mut()
                .find(|slot| {
                    matches!(slot, Some(tile) if tile.coord == coord && tile.extent == extent)
                })
                .and_then(Option::take);

            match reused {
                Some(tile) => {
                    set.insert(tile);
                }
                None => missing.push(TileSlot {
                    coord,
                    extent,
                    zoom: request.zoom,
                }),
            }
        }

        let center = request.center;
        missing.sort_by(|a, b| {
            a.extent
                .center()
                .distance_to(center)
                .total_cmp(&b.extent.center().distance_to(center))
        });

        trace!(
            "populate at zoom {}: {} reused, {} missing",
            request.zoom,
            set.len(),
            missing.len()
        );
        Populated { set, missing }
    }

    /// Live tiles at `zoom`, for reuse by the next [`TileCache::populate`]
    pub fn reusable_tiles(&self, zoom: f64) -> Vec<Tile> {
        let state = self.state.lock();
        match &state.live {
            Some(set) if same_zoom(set.zoom, zoom) => set.tiles.clone(),
            _ => Vec::new(),
        }
    }

    /// Coordinates `request` needs that the live set does not have
    pub fn missing_for(&self, request: &TileRequest) -> Vec<TileCoord> {
        let Some(area) = request.retained_area() else {
            return Vec::new();
        };
        let state = self.state.lock();
        let present: HashSet<TileCoord> = match &state.live {
            Some(set) if same_zoom(set.zoom, request.zoom) => {
                set.tiles.iter().map(|t| t.coord).collect()
            }
            _ => HashSet::new(),
        };
        drop(state);

        self.coords_covering(area)
            .into_iter()
            .filter(|coord| !present.contains(coord))
            .collect()
    }

    /// Cached tiles intersecting `rect`; never renders
    pub fn tiles_covering(&self, rect: PixelRect) -> Vec<Tile> {
        let state = self.state.lock();
        state
            .live
            .as_ref()
            .map(|set| {
                set.tiles
                    .iter()
                    .filter(|tile| tile.extent.intersects(&rect))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Merge freshly rendered tiles into the live set
    ///
    /// Tiles at another zoom than the live set are dropped. Returns how many
    /// tiles were merged.
    pub fn append(&self, tiles: Vec<Tile>) -> usize {
        let mut state = self.state.lock();
        let mut merged = 0;
        for tile in tiles {
            let live = state.live.get_or_insert_with(|| TileSet::new(tile.zoom));
            if live.insert(tile) {
                merged += 1;
            } else {
                debug!("dropping appended tile rendered at a stale zoom");
            }
        }
        state.stats.appended += merged as u64;
        state.refresh_stats();
        merged
    }

    /// Atomically replace the live set, returning the previous one
    ///
    /// The caller guarantees `set` is fully rendered.
    pub fn swap(&self, set: TileSet) -> Option<TileSet> {
        let mut state = self.state.lock();
        let evicted = match &state.live {
            Some(old) if same_zoom(old.zoom, set.zoom) => old
                .tiles
                .iter()
                .filter(|tile| !set.contains(tile.coord))
                .count(),
            Some(old) => old.len(),
            None => 0,
        };
        let previous = state.live.replace(set);
        state.stats.swaps += 1;
        state.stats.evictions += evicted as u64;
        state.refresh_stats();
        previous
    }

    /// Copy a rendered mask into every live tile it overlaps
    ///
    /// `at` is the mask's device-pixel rectangle. Returns the number of
    /// tiles touched; zero means there was nothing cached to patch.
    pub fn patch(&self, at: PixelRect, mask: &Surface) -> usize {
        let mut state = self.state.lock();
        let patched = match state.live.as_mut() {
            Some(set) => set
                .tiles
                .iter_mut()
                .map(|tile| tile.patch(at, mask))
                .filter(|&touched| touched)
                .count(),
            None => 0,
        };
        state.stats.patched += patched as u64;
        patched
    }

    /// Drop every tile
    pub fn clear(&self) {
        let mut state = self.state.lock();
        if let Some(old) = state.live.take() {
            state.stats.evictions += old.len() as u64;
        }
        state.refresh_stats();
    }

    /// Zoom of the live set
    pub fn zoom(&self) -> Option<f64> {
        self.state.lock().live.as_ref().map(TileSet::zoom)
    }

    /// Copy of the live set for painting
    pub fn snapshot(&self) -> Option<TileSet> {
        self.state.lock().live.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().live.as_ref().map_or(0, TileSet::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> TileCacheStats {
        self.state.lock().stats
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new(TILE_SIZE)
    }
}
