//! Candidate sampling
//!
//! Several small windows jittered around the frame center are thresholded
//! with every mask strategy, then the whole frame is thresholded once with
//! the best-scoring polarity. All boxes go into one pool, in pass order.

use image::imageops;
use image::{GrayImage, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use parking_lot::Mutex;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use super::geometry::Rect;
use super::regions::extract_regions;
use super::threshold::{MaskStrategy, Thresholder};
use crate::config::{ExtractionSettings, SamplerSettings};

/// Which pass produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Pass {
    /// One of the jittered windows; `(dx, dy)` is its offset from center
    JitteredRoi { index: usize, dx: i32, dy: i32 },
    /// The single pass over the whole frame
    FullFrame,
}

impl Pass {
    /// Short label used in artifact names
    pub fn label(&self) -> String {
        match self {
            Pass::JitteredRoi { index, .. } => format!("roi{index}"),
            Pass::FullFrame => "full".to_string(),
        }
    }
}

/// Pass and mask strategy that produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CandidateOrigin {
    pub pass: Pass,
    pub mask: MaskStrategy,
}

/// A candidate box in frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SampledRegion {
    pub rect: Rect,
    pub origin: CandidateOrigin,
}

/// Source of window offsets. Each call returns an offset within
/// `[-max_dx, max_dx] x [-max_dy, max_dy]`.
pub trait JitterSource: Send {
    fn next_offset(&mut self, max_dx: i32, max_dy: i32) -> (i32, i32);
}

/// Replays a fixed list of offsets, cycling when exhausted. Offsets are
/// clamped to the requested bounds.
#[derive(Debug, Clone)]
pub struct FixedOffsets {
    offsets: Vec<(i32, i32)>,
    next: usize,
}

impl FixedOffsets {
    pub fn new(offsets: Vec<(i32, i32)>) -> Self {
        Self { offsets, next: 0 }
    }

    /// Always the frame center
    pub fn centered() -> Self {
        Self::new(vec![(0, 0)])
    }
}

impl JitterSource for FixedOffsets {
    fn next_offset(&mut self, max_dx: i32, max_dy: i32) -> (i32, i32) {
        if self.offsets.is_empty() {
            return (0, 0);
        }
        let (dx, dy) = self.offsets[self.next % self.offsets.len()];
        self.next += 1;
        (dx.clamp(-max_dx, max_dx), dy.clamp(-max_dy, max_dy))
    }
}

/// xorshift64* generator. Seeded explicitly for reproducible runs, or from
/// the clock.
#[derive(Debug, Clone)]
pub struct SeededJitter {
    state: u64,
}

impl SeededJitter {
    pub fn new(seed: u64) -> Self {
        // Zero is a fixed point of xorshift
        Self { state: seed.max(1) }
    }

    pub fn from_clock() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E37_79B9_7F4A_7C15);
        Self::new(nanos)
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn in_range(&mut self, bound: i32) -> i32 {
        if bound <= 0 {
            return 0;
        }
        let span = 2 * bound as u64 + 1;
        (self.next_u64() % span) as i32 - bound
    }
}

impl JitterSource for SeededJitter {
    fn next_offset(&mut self, max_dx: i32, max_dy: i32) -> (i32, i32) {
        let dx = self.in_range(max_dx);
        let dy = self.in_range(max_dy);
        (dx, dy)
    }
}

/// Jitter source for a sampler configuration
pub fn jitter_from_settings(settings: &SamplerSettings) -> Box<dyn JitterSource> {
    match settings.seed {
        Some(seed) => Box::new(SeededJitter::new(seed)),
        None => Box::new(SeededJitter::from_clock()),
    }
}

/// Generates the candidate pool for a frame
pub struct CandidateSampler {
    settings: SamplerSettings,
    extraction: ExtractionSettings,
    thresholder: Thresholder,
    jitter: Mutex<Box<dyn JitterSource>>,
}

impl CandidateSampler {
    pub fn new(
        settings: SamplerSettings,
        extraction: ExtractionSettings,
        thresholder: Thresholder,
        jitter: Box<dyn JitterSource>,
    ) -> Self {
        Self {
            settings,
            extraction,
            thresholder,
            jitter: Mutex::new(jitter),
        }
    }

    /// Replace the offset generator
    pub fn set_jitter(&mut self, jitter: Box<dyn JitterSource>) {
        self.jitter = Mutex::new(jitter);
    }

    /// Window rectangle for a jitter offset: `roi_fraction` of the frame,
    /// centered on the frame center plus the offset, kept inside the frame
    pub fn window(&self, width: u32, height: u32, dx: i32, dy: i32) -> Rect {
        let roi_w = ((width as f64 * self.settings.roi_fraction).round() as i32).clamp(1, width as i32);
        let roi_h = ((height as f64 * self.settings.roi_fraction).round() as i32).clamp(1, height as i32);
        let cx = width as i32 / 2 + dx;
        let cy = height as i32 / 2 + dy;
        let x = (cx - roi_w / 2).clamp(0, width as i32 - roi_w);
        let y = (cy - roi_h / 2).clamp(0, height as i32 - roi_h);
        Rect::new(x, y, roi_w, roi_h)
    }

    /// Largest offset per axis for a frame size
    fn max_offsets(&self, width: u32, height: u32) -> (i32, i32) {
        (
            (width as f64 * self.settings.jitter_fraction) as i32,
            (height as f64 * self.settings.jitter_fraction) as i32,
        )
    }

    pub fn sample(&self, frame: &RgbImage) -> Vec<SampledRegion> {
        self.sample_with(frame, |_, _, _| {})
    }

    /// Build the pool. `on_mask` sees every mask as it is produced, for
    /// diagnostics.
    pub fn sample_with<F>(&self, frame: &RgbImage, mut on_mask: F) -> Vec<SampledRegion>
    where
        F: FnMut(&Pass, MaskStrategy, &GrayImage),
    {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return vec![];
        }

        let gray = imageops::grayscale(frame);
        let mut pool = Vec::new();

        let (max_dx, max_dy) = self.max_offsets(width, height);
        for index in 0..self.settings.jitter_passes {
            let (dx, dy) = self.jitter.lock().next_offset(max_dx, max_dy);
            let pass = Pass::JitteredRoi { index, dx, dy };
            let window = self.window(width, height, dx, dy);
            let (wx, wy, ww, wh) = window.to_bounds();
            let roi = imageops::crop_imm(&gray, wx, wy, ww, wh).to_image();
            let roi_area = window.area() as f64;

            for (strategy, mask) in self.thresholder.all_masks(&roi) {
                on_mask(&pass, strategy, &mask);
                let found = extract_regions(&mask, roi_area, &self.extraction.roi);
                debug!(
                    "Pass {} ({}) window {}: {} regions",
                    pass.label(),
                    strategy.name(),
                    window,
                    found.len()
                );
                pool.extend(found.into_iter().map(|r| SampledRegion {
                    rect: r.translate(window.x, window.y),
                    origin: CandidateOrigin { pass, mask: strategy },
                }));
            }
        }

        if self.settings.full_frame_pass {
            let blurred = gaussian_blur_f32(&gray, self.thresholder.settings().blur_sigma);
            let (strategy, mask) = self.thresholder.best_polarity(&blurred);
            on_mask(&Pass::FullFrame, strategy, &mask);
            let found = extract_regions(&mask, (width * height) as f64, &self.extraction.full_frame);
            debug!("Full-frame pass ({}): {} regions", strategy.name(), found.len());
            pool.extend(found.into_iter().map(|rect| SampledRegion {
                rect,
                origin: CandidateOrigin {
                    pass: Pass::FullFrame,
                    mask: strategy,
                },
            }));
        }

        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect as DrawRect;

    fn sampler(jitter: Box<dyn JitterSource>) -> CandidateSampler {
        CandidateSampler::new(
            SamplerSettings::default(),
            ExtractionSettings::default(),
            Thresholder::default(),
            jitter,
        )
    }

    fn word_frame() -> RgbImage {
        let mut frame = RgbImage::from_pixel(300, 150, Rgb([235, 235, 235]));
        for i in 0..3 {
            let glyph = DrawRect::at(120 + i * 22, 62).of_size(16, 26);
            draw_filled_rect_mut(&mut frame, glyph, Rgb([20, 20, 20]));
        }
        frame
    }

    #[test]
    fn test_fixed_offsets_cycle_and_clamp() {
        let mut jitter = FixedOffsets::new(vec![(3, -4), (100, 100)]);
        assert_eq!(jitter.next_offset(15, 7), (3, -4));
        assert_eq!(jitter.next_offset(15, 7), (15, 7));
        assert_eq!(jitter.next_offset(15, 7), (3, -4));
    }

    #[test]
    fn test_seeded_jitter_is_reproducible_and_bounded() {
        let mut a = SeededJitter::new(42);
        let mut b = SeededJitter::new(42);
        for _ in 0..100 {
            let offset = a.next_offset(15, 7);
            assert_eq!(offset, b.next_offset(15, 7));
            assert!(offset.0.abs() <= 15 && offset.1.abs() <= 7);
        }
        assert_eq!(SeededJitter::new(1).next_offset(0, 0), (0, 0));
    }

    #[test]
    fn test_window_is_half_frame_and_clamped() {
        let s = sampler(Box::new(FixedOffsets::centered()));
        assert_eq!(s.window(300, 150, 0, 0), Rect::new(75, 38, 150, 75));
        assert_eq!(s.window(300, 150, 15, -7), Rect::new(90, 31, 150, 75));

        let w = s.window(300, 150, 500, 500);
        assert_eq!((w.right(), w.bottom()), (300, 150));
    }

    #[test]
    fn test_uniform_frame_yields_no_regions() {
        let s = sampler(Box::new(SeededJitter::new(3)));
        let frame = RgbImage::from_pixel(300, 150, Rgb([128, 128, 128]));
        assert!(s.sample(&frame).is_empty());
    }

    #[test]
    fn test_pool_order_and_mask_callbacks() {
        let s = sampler(Box::new(FixedOffsets::centered()));
        let mut seen = Vec::new();
        let pool = s.sample_with(&word_frame(), |pass, strategy, _| seen.push((*pass, strategy)));

        // 4 windows x 3 strategies, then the full-frame mask
        assert_eq!(seen.len(), 13);
        assert_eq!(seen[0].1, MaskStrategy::Positive);
        assert_eq!(seen[1].1, MaskStrategy::Inverted);
        assert_eq!(seen[2].1, MaskStrategy::LocalStatistics);
        assert_eq!(seen[12], (Pass::FullFrame, MaskStrategy::Inverted));

        assert!(!pool.is_empty());
        let first_full = pool
            .iter()
            .position(|r| r.origin.pass == Pass::FullFrame)
            .expect("full-frame candidate");
        assert!(pool[first_full..].iter().all(|r| r.origin.pass == Pass::FullFrame));

        let indices: Vec<usize> = pool[..first_full]
            .iter()
            .map(|r| match r.origin.pass {
                Pass::JitteredRoi { index, .. } => index,
                Pass::FullFrame => unreachable!(),
            })
            .collect();
        assert!(indices.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_regions_are_in_frame_coordinates() {
        let s = sampler(Box::new(FixedOffsets::centered()));
        let glyphs = Rect::new(120, 62, 60, 26);
        let pool = s.sample(&word_frame());

        let inverted: Vec<_> = pool
            .iter()
            .filter(|r| matches!(r.origin.pass, Pass::JitteredRoi { .. }))
            .filter(|r| r.origin.mask == MaskStrategy::Inverted)
            .collect();
        assert!(!inverted.is_empty());
        for region in inverted {
            assert!(region.rect.iou(&glyphs) > 0.7, "region {} far from glyphs", region.rect);
        }
    }

    #[test]
    fn test_full_frame_pass_can_be_disabled() {
        let settings = SamplerSettings {
            full_frame_pass: false,
            jitter_passes: 1,
            ..Default::default()
        };
        let s = CandidateSampler::new(
            settings,
            ExtractionSettings::default(),
            Thresholder::default(),
            Box::new(FixedOffsets::centered()),
        );
        let pool = s.sample(&word_frame());
        assert!(pool.iter().all(|r| r.origin.pass != Pass::FullFrame));
    }
}
