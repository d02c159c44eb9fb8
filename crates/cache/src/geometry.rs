//! Rectangles in document and device space
//!
//! Document coordinates are page units (`f64`). Device coordinates are whole
//! pixels of the page rendered at some zoom, with the page's top-left corner
//! at the origin.

/// A point in document or device space
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Page dimensions in document units
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Device-pixel bounds of a page of this size at `zoom`
    pub fn device_bounds(&self, zoom: f64) -> PixelRect {
        PixelRect::new(
            0,
            0,
            (self.width * zoom).ceil().max(0.0) as u32,
            (self.height * zoom).ceil().max(0.0) as u32,
        )
    }
}

/// Rectangle in document coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Grow by `margin` on every side
    pub fn expand(&self, margin: f64) -> Rect {
        Rect::new(
            self.x - margin,
            self.y - margin,
            self.width + 2.0 * margin,
            self.height + 2.0 * margin,
        )
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Smallest rectangle containing both
    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Rect::new(
            x,
            y,
            self.right().max(other.right()) - x,
            self.bottom().max(other.bottom()) - y,
        )
    }

    /// Device pixels touched by this rectangle at `zoom`
    ///
    /// The origin is floored and the far edge ceiled so partially covered
    /// pixels are included.
    pub fn to_device(&self, zoom: f64) -> PixelRect {
        let left = (self.x * zoom).floor();
        let top = (self.y * zoom).floor();
        let right = (self.right() * zoom).ceil();
        let bottom = (self.bottom() * zoom).ceil();
        PixelRect::new(
            left as i32,
            top as i32,
            (right - left).max(0.0) as u32,
            (bottom - top).max(0.0) as u32,
        )
    }
}

/// Rectangle in whole device pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x as i64 && x < self.right() && y >= self.y as i64 && y < self.bottom()
    }

    pub fn intersects(&self, other: &PixelRect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && (self.x as i64) < other.right()
            && (other.x as i64) < self.right()
            && (self.y as i64) < other.bottom()
            && (other.y as i64) < self.bottom()
    }

    pub fn intersection(&self, other: &PixelRect) -> Option<PixelRect> {
        if !self.intersects(other) {
            return None;
        }
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        Some(PixelRect::new(
            x,
            y,
            (right - x as i64) as u32,
            (bottom - y as i64) as u32,
        ))
    }

    /// Grow by `margin` pixels on every side
    pub fn expand(&self, margin: u32) -> PixelRect {
        PixelRect::new(
            self.x.saturating_sub(margin as i32),
            self.y.saturating_sub(margin as i32),
            self.width.saturating_add(margin.saturating_mul(2)),
            self.height.saturating_add(margin.saturating_mul(2)),
        )
    }

    pub fn translate(&self, dx: i32, dy: i32) -> PixelRect {
        PixelRect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Document-space rectangle covered by these pixels at `zoom`
    pub fn to_document(&self, zoom: f64) -> Rect {
        Rect::new(
            self.x as f64 / zoom,
            self.y as f64 / zoom,
            self.width as f64 / zoom,
            self.height as f64 / zoom,
        )
    }
}
