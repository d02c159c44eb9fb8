//! Offscreen RGBA surfaces
//!
//! Tiles, dirty-rect masks and thumbnails are all plain RGBA buffers
//! (4 bytes per pixel, row-major, no padding).

/// RGBA colour
pub type Rgba = [u8; 4];

pub const WHITE: Rgba = [255, 255, 255, 255];
pub const TRANSPARENT: Rgba = [0, 0, 0, 0];

/// Errors creating a surface
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    /// Width or height was zero
    #[error("surface dimensions must be non-zero (got {width}x{height})")]
    Empty { width: u32, height: u32 },

    /// The pixel buffer could not be allocated
    #[error("cannot allocate a {width}x{height} surface")]
    Allocation { width: u32, height: u32 },
}

/// An owned RGBA pixel buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Surface {
    /// Allocate a transparent surface
    ///
    /// Allocation failure is reported instead of aborting, so a job can
    /// degrade to repainting nothing.
    pub fn new(width: u32, height: u32) -> Result<Self, SurfaceError> {
        Self::filled(width, height, TRANSPARENT)
    }

    /// Allocate a surface filled with `color`
    pub fn filled(width: u32, height: u32, color: Rgba) -> Result<Self, SurfaceError> {
        if width == 0 || height == 0 {
            return Err(SurfaceError::Empty { width, height });
        }

        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
            .ok_or(SurfaceError::Allocation { width, height })?;

        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(len)
            .map_err(|_| SurfaceError::Allocation { width, height })?;
        for _ in 0..(len / 4) {
            pixels.extend_from_slice(&color);
        }

        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA bytes
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Size of the pixel buffer in bytes
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = self.offset(x, y);
        let mut rgba = [0u8; 4];
        rgba.copy_from_slice(&self.pixels[at..at + 4]);
        Some(rgba)
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: Rgba) {
        if x < self.width && y < self.height {
            let at = self.offset(x, y);
            self.pixels[at..at + 4].copy_from_slice(&color);
        }
    }

    pub fn fill(&mut self, color: Rgba) {
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&color);
        }
    }

    /// Fill a rectangle, clipped to the surface
    pub fn fill_rect(&mut self, x: i32, y: i32, width: u32, height: u32, color: Rgba) {
        let x0 = x.max(0) as i64;
        let y0 = y.max(0) as i64;
        let x1 = (x as i64 + width as i64).min(self.width as i64);
        let y1 = (y as i64 + height as i64).min(self.height as i64);

        for row in y0..y1 {
            for col in x0..x1 {
                self.set_pixel(col as u32, row as u32, color);
            }
        }
    }

    /// Copy `src` so its top-left lands at `(dest_x, dest_y)`
    ///
    /// Pixels are replaced, not blended. Parts falling outside this surface
    /// are clipped. Returns `false` if nothing overlapped.
    pub fn blit(&mut self, src: &Surface, dest_x: i32, dest_y: i32) -> bool {
        let x0 = (dest_x as i64).max(0);
        let y0 = (dest_y as i64).max(0);
        let x1 = (dest_x as i64 + src.width as i64).min(self.width as i64);
        let y1 = (dest_y as i64 + src.height as i64).min(self.height as i64);
        if x0 >= x1 || y0 >= y1 {
            return false;
        }

        let row_bytes = ((x1 - x0) * 4) as usize;
        for row in y0..y1 {
            let src_x = (x0 - dest_x as i64) as u32;
            let src_y = (row - dest_y as i64) as u32;
            let from = src.offset(src_x, src_y);
            let to = self.offset(x0 as u32, row as u32);
            self.pixels[to..to + row_bytes].copy_from_slice(&src.pixels[from..from + row_bytes]);
        }
        true
    }

    /// Rewrite every pixel through `f`
    pub fn map_pixels<F>(&mut self, mut f: F)
    where
        F: FnMut(Rgba) -> Rgba,
    {
        for px in self.pixels.chunks_exact_mut(4) {
            let mapped = f([px[0], px[1], px[2], px[3]]);
            px.copy_from_slice(&mapped);
        }
    }

    /// Check if every pixel is fully opaque
    pub fn is_opaque(&self) -> bool {
        self.pixels.chunks_exact(4).all(|rgba| rgba[3] == 255)
    }
}
