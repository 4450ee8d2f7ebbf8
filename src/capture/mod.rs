//! Screen Capture Layer
//!
//! Copies a fixed-size window around the point of interest out of a source
//! screenshot. Parts of the window outside the source are padded, so the
//! canvas size never changes and the point of interest stays centered.

pub mod frame;

use image::{imageops, Rgb, RgbImage};
use std::path::Path;
use tracing::debug;

use crate::config::CaptureSettings;
use crate::error::PipelineError;
use frame::{CanvasTransform, CapturedFrame};

/// Load a screenshot from disk as RGB
pub fn load_screenshot(path: &Path) -> Result<RgbImage, PipelineError> {
    let image = image::open(path)?.to_rgb8();
    if image.width() == 0 || image.height() == 0 {
        return Err(PipelineError::Input(format!("{} is empty", path.display())));
    }
    Ok(image)
}

/// Copy the `width x height` window centered on `center` into a canvas of
/// that size, padding the outside with `pad`
pub fn capture_around(source: &RgbImage, center: (i32, i32), width: u32, height: u32, pad: [u8; 3]) -> CapturedFrame {
    let left = center.0 - width as i32 / 2;
    let top = center.1 - height as i32 / 2;

    let mut canvas = RgbImage::from_pixel(width, height, Rgb(pad));
    // Source placed so that (left, top) lands on the canvas origin
    imageops::replace(&mut canvas, source, -(left as i64), -(top as i64));

    debug!(
        "Captured {}x{} around ({}, {}), canvas origin at source ({}, {})",
        width, height, center.0, center.1, left, top
    );

    CapturedFrame {
        image: canvas,
        transform: CanvasTransform::translation(left as f64, top as f64),
        point_of_interest: Some(center),
        timestamp: chrono::Local::now(),
    }
}

/// Captures frames around points of interest from one source image
pub struct ScreenCapture {
    config: CaptureSettings,
    source: RgbImage,
}

impl ScreenCapture {
    pub fn new(source: RgbImage, config: CaptureSettings) -> Self {
        Self { config, source }
    }

    pub fn from_file(path: &Path, config: CaptureSettings) -> Result<Self, PipelineError> {
        Ok(Self::new(load_screenshot(path)?, config))
    }

    pub fn source(&self) -> &RgbImage {
        &self.source
    }

    /// Center of the source image
    pub fn center(&self) -> (i32, i32) {
        (self.source.width() as i32 / 2, self.source.height() as i32 / 2)
    }

    /// Capture the configured window around `point`
    pub fn capture_at(&self, point: (i32, i32)) -> CapturedFrame {
        capture_around(&self.source, point, self.config.width, self.config.height, self.config.pad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 7]))
    }

    #[test]
    fn test_capture_inside_source() {
        let source = gradient(200, 100);
        let frame = capture_around(&source, (100, 50), 40, 20, [0, 0, 0]);
        assert_eq!(frame.dimensions(), (40, 20));
        assert_eq!(*frame.image.get_pixel(0, 0), Rgb([80, 40, 7]));
        assert_eq!(frame.transform.to_source(0.0, 0.0), (80.0, 40.0));
        assert_eq!(frame.point_of_interest, Some((100, 50)));
    }

    #[test]
    fn test_capture_near_corner_is_padded() {
        let source = gradient(200, 100);
        let frame = capture_around(&source, (5, 5), 40, 20, [1, 2, 3]);
        // Canvas (0, 0) maps to source (-15, -5)
        assert_eq!(*frame.image.get_pixel(0, 0), Rgb([1, 2, 3]));
        assert_eq!(*frame.image.get_pixel(15, 5), Rgb([0, 0, 7]));
        assert_eq!(*frame.image.get_pixel(39, 19), Rgb([24, 14, 7]));
    }

    #[test]
    fn test_capture_past_bottom_right_is_padded() {
        let source = gradient(200, 100);
        let frame = capture_around(&source, (195, 98), 40, 20, [1, 2, 3]);
        // Canvas (0, 0) maps to source (175, 88)
        assert_eq!(*frame.image.get_pixel(0, 0), Rgb([175, 88, 7]));
        assert_eq!(*frame.image.get_pixel(24, 11), Rgb([199, 99, 7]));
        assert_eq!(*frame.image.get_pixel(25, 11), Rgb([1, 2, 3]));
        assert_eq!(*frame.image.get_pixel(24, 12), Rgb([1, 2, 3]));
    }

    #[test]
    fn test_capture_outside_source_is_all_pad() {
        let source = gradient(50, 50);
        let frame = capture_around(&source, (500, 500), 30, 30, [9, 9, 9]);
        assert!(frame.image.pixels().all(|p| *p == Rgb([9, 9, 9])));
    }

    #[test]
    fn test_screen_capture_defaults() {
        let capture = ScreenCapture::new(gradient(640, 480), CaptureSettings::default());
        assert_eq!(capture.source().dimensions(), (640, 480));
        assert_eq!(capture.center(), (320, 240));
        let frame = capture.capture_at(capture.center());
        assert_eq!(frame.dimensions(), (300, 150));
    }

    #[test]
    fn test_load_screenshot_missing_file() {
        let result = load_screenshot(Path::new("/nonexistent/shot.png"));
        assert!(result.is_err());
    }
}
