//! Frame data structures for captured screen content

use chrono::{DateTime, Local};
use image::RgbImage;
use serde::Serialize;

use crate::vision::geometry::Rect;

/// Maps canvas coordinates back to the capture source: translation plus an
/// optional per-axis scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CanvasTransform {
    pub offset_x: f64,
    pub offset_y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
}

impl CanvasTransform {
    pub fn identity() -> Self {
        Self::translation(0.0, 0.0)
    }

    pub fn translation(offset_x: f64, offset_y: f64) -> Self {
        Self {
            offset_x,
            offset_y,
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }

    /// Canvas point to source point
    pub fn to_source(&self, x: f64, y: f64) -> (f64, f64) {
        (self.offset_x + x * self.scale_x, self.offset_y + y * self.scale_y)
    }

    /// Canvas rectangle to source rectangle, rounding the corners
    pub fn rect_to_source(&self, rect: &Rect) -> Rect {
        let (x0, y0) = self.to_source(rect.x as f64, rect.y as f64);
        let (x1, y1) = self.to_source(rect.right() as f64, rect.bottom() as f64);
        let (left, right) = (x0.min(x1).round() as i32, x0.max(x1).round() as i32);
        let (top, bottom) = (y0.min(y1).round() as i32, y0.max(y1).round() as i32);
        Rect::new(left, top, right - left, bottom - top)
    }
}

impl Default for CanvasTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// A captured frame from the screen
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// RGB canvas handed to the pipeline
    pub image: RgbImage,
    /// Canvas to source mapping
    pub transform: CanvasTransform,
    /// Point of interest in source coordinates, when known
    pub point_of_interest: Option<(i32, i32)>,
    /// Timestamp when frame was captured
    pub timestamp: DateTime<Local>,
}

impl CapturedFrame {
    /// Frame whose canvas is the source itself
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            transform: CanvasTransform::identity(),
            point_of_interest: None,
            timestamp: Local::now(),
        }
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }
}
