//! Notecanvas Cache Library
//!
//! Per-page tile cache: fixed-size RGBA tiles at a single zoom, plus the
//! geometry and surface types the renderer shares with it.

mod geometry;
mod surface;
mod tile;

pub use geometry::{PixelRect, Point, Rect, Size};
pub use surface::{Rgba, Surface, SurfaceError, TRANSPARENT, WHITE};
pub use tile::{
    Populated, Tile, TileCache, TileCacheStats, TileCoord, TileRequest, TileSet, TileSlot,
    TILE_SIZE,
};
