//! Integer rectangles in image pixel space

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle `(x, y, width, height)` in the coordinate space of
/// the image it was derived from. Operations return new rectangles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Exclusive right edge
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }

    /// Width over height, with the height floored at one pixel
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Smallest rectangle enclosing both
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

    /// Same rectangle shifted by `(dx, dy)`
    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Intersection with `[0, width) x [0, height)`. The result may be empty.
    pub fn clip(&self, width: u32, height: u32) -> Rect {
        let x0 = self.x.clamp(0, width as i32);
        let y0 = self.y.clamp(0, height as i32);
        let x1 = self.right().clamp(0, width as i32);
        let y1 = self.bottom().clamp(0, height as i32);
        Rect::new(x0, y0, (x1 - x0).max(0), (y1 - y0).max(0))
    }

    /// Height of the shared vertical span
    pub fn vertical_overlap(&self, other: &Rect) -> i32 {
        let top = self.y.max(other.y);
        let bottom = self.bottom().min(other.bottom());
        (bottom - top).max(0)
    }

    /// Shared vertical span divided by the smaller of the two heights
    pub fn vertical_overlap_ratio(&self, other: &Rect) -> f64 {
        let min_h = self.height.min(other.height);
        if min_h <= 0 {
            return 0.0;
        }
        self.vertical_overlap(other) as f64 / min_h as f64
    }

    /// Intersection over union, used for diagnostics and tests
    pub fn iou(&self, other: &Rect) -> f64 {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        let inter = ((x1 - x0).max(0) as i64 * (y1 - y0).max(0) as i64) as f64;
        let union = (self.area() + other.area()) as f64 - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Whether `other` lies entirely inside this rectangle
    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Convert to the `(x, y, width, height)` tuple used by image crops.
    /// Callers clip first; negative values saturate to zero.
    pub fn to_bounds(&self) -> (u32, u32, u32, u32) {
        (
            self.x.max(0) as u32,
            self.y.max(0) as u32,
            self.width.max(0) as u32,
            self.height.max(0) as u32,
        )
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}@({},{})", self.width, self.height, self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union() {
        let a = Rect::new(10, 10, 20, 10);
        let b = Rect::new(35, 5, 10, 20);
        assert_eq!(a.union(&b), Rect::new(10, 5, 35, 20));
    }

    #[test]
    fn test_clip_partially_outside() {
        let r = Rect::new(-5, 90, 30, 30);
        assert_eq!(r.clip(100, 100), Rect::new(0, 90, 25, 10));
    }

    #[test]
    fn test_clip_fully_outside_is_empty() {
        let r = Rect::new(120, 10, 30, 30);
        assert!(r.clip(100, 100).is_empty());
    }

    #[test]
    fn test_vertical_overlap_ratio() {
        let a = Rect::new(0, 0, 10, 20);
        let b = Rect::new(20, 10, 10, 20);
        assert!((a.vertical_overlap_ratio(&b) - 0.5).abs() < 1e-9);

        // Containment gives a full ratio
        let c = Rect::new(20, 5, 10, 10);
        assert!((a.vertical_overlap_ratio(&c) - 1.0).abs() < 1e-9);

        let d = Rect::new(0, 40, 10, 10);
        assert_eq!(a.vertical_overlap_ratio(&d), 0.0);
    }

    #[test]
    fn test_aspect_ratio_floors_height() {
        let r = Rect::new(0, 0, 10, 0);
        assert_eq!(r.aspect_ratio(), 10.0);
    }

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = Rect::new(0, 0, 10, 10);
        assert!((a.iou(&a) - 1.0).abs() < 1e-9);
        assert_eq!(a.iou(&Rect::new(20, 20, 5, 5)), 0.0);
    }
}
