//! Binary mask generation
//!
//! Local adaptive thresholds in both polarities plus a Sauvola-style
//! local-statistics variant, and a score for picking the most text-like mask.
//! Foreground pixels are 255, background pixels 0.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::integral_image::{integral_image, integral_squared_image};
use imageproc::region_labelling::{connected_components, Connectivity};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ThresholdSettings;

const FOREGROUND: u8 = 255;
const BACKGROUND: u8 = 0;

/// Mask strategies, in the fixed order they are evaluated and pooled.
/// Downstream tie-breaking depends on this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskStrategy {
    /// Foreground where the pixel is brighter than the local mean minus C
    Positive,
    /// Complement of `Positive`: dark text on a light background
    Inverted,
    /// Sauvola-style threshold from local mean and standard deviation
    LocalStatistics,
}

impl MaskStrategy {
    pub const ORDER: [MaskStrategy; 3] = [
        MaskStrategy::Positive,
        MaskStrategy::Inverted,
        MaskStrategy::LocalStatistics,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MaskStrategy::Positive => "positive",
            MaskStrategy::Inverted => "inverted",
            MaskStrategy::LocalStatistics => "local_stats",
        }
    }
}

/// Adaptive threshold output in both polarities
#[derive(Debug, Clone)]
pub struct MaskPair {
    pub positive: GrayImage,
    pub inverted: GrayImage,
}

/// Box sums over a square window, clamped at the image border
struct LocalWindows {
    sum: ImageBuffer<Luma<u64>, Vec<u64>>,
    sum_sq: ImageBuffer<Luma<u64>, Vec<u64>>,
    radius: u32,
    width: u32,
    height: u32,
}

impl LocalWindows {
    fn new(gray: &GrayImage, block_size: u32) -> Self {
        let (width, height) = gray.dimensions();
        Self {
            sum: integral_image::<_, u64>(gray),
            sum_sq: integral_squared_image::<_, u64>(gray),
            radius: block_size / 2,
            width,
            height,
        }
    }

    /// Mean and variance of the window centred on `(x, y)`
    fn stats(&self, x: u32, y: u32) -> (f64, f64) {
        let x0 = x.saturating_sub(self.radius);
        let y0 = y.saturating_sub(self.radius);
        let x1 = (x + self.radius + 1).min(self.width);
        let y1 = (y + self.radius + 1).min(self.height);
        let count = ((x1 - x0) * (y1 - y0)) as f64;

        let sum = box_sum(&self.sum, x0, y0, x1, y1) as f64;
        let sum_sq = box_sum(&self.sum_sq, x0, y0, x1, y1) as f64;
        let mean = sum / count;
        let variance = (sum_sq / count - mean * mean).max(0.0);
        (mean, variance)
    }
}

/// Sum over `[x0, x1) x [y0, y1)` from an integral image with a leading
/// zero row and column
fn box_sum(integral: &ImageBuffer<Luma<u64>, Vec<u64>>, x0: u32, y0: u32, x1: u32, y1: u32) -> u64 {
    let a = integral.get_pixel(x0, y0)[0];
    let b = integral.get_pixel(x1, y0)[0];
    let c = integral.get_pixel(x0, y1)[0];
    let d = integral.get_pixel(x1, y1)[0];
    (d + a) - (b + c)
}

/// Adaptive mean threshold in both polarities.
///
/// A pixel is foreground in the positive mask when it exceeds the mean of
/// its `block_size` window minus `c`; the inverted mask is the complement.
pub fn adaptive_mean_threshold(gray: &GrayImage, block_size: u32, c: f64) -> MaskPair {
    let (width, height) = gray.dimensions();
    let mut positive = GrayImage::new(width, height);
    let mut inverted = GrayImage::new(width, height);
    if width == 0 || height == 0 {
        return MaskPair { positive, inverted };
    }

    let windows = LocalWindows::new(gray, block_size);
    for (x, y, pixel) in gray.enumerate_pixels() {
        let (mean, _) = windows.stats(x, y);
        let bright = pixel[0] as f64 > mean - c;
        positive.put_pixel(x, y, Luma([if bright { FOREGROUND } else { BACKGROUND }]));
        inverted.put_pixel(x, y, Luma([if bright { BACKGROUND } else { FOREGROUND }]));
    }

    MaskPair { positive, inverted }
}

/// Sauvola-style threshold: foreground where
/// `pixel > mean * (1 + k * (stddev / r - 1))`
pub fn local_statistics_threshold(gray: &GrayImage, block_size: u32, k: f64, r: f64) -> GrayImage {
    let (width, height) = gray.dimensions();
    let mut mask = GrayImage::new(width, height);
    if width == 0 || height == 0 {
        return mask;
    }

    let windows = LocalWindows::new(gray, block_size);
    for (x, y, pixel) in gray.enumerate_pixels() {
        let (mean, variance) = windows.stats(x, y);
        let threshold = mean * (1.0 + k * (variance.sqrt() / r - 1.0));
        let value = if pixel[0] as f64 > threshold { FOREGROUND } else { BACKGROUND };
        mask.put_pixel(x, y, Luma([value]));
    }

    mask
}

/// How "text-like" a mask looks.
///
/// Ten points per plausible glyph component (both sides >= 2px, aspect ratio
/// within [0.15, 15]) plus a brightness balance term that peaks for a mask
/// whose mean pixel value is mid-grey.
pub fn mask_quality_score(mask: &GrayImage) -> f64 {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 {
        return 0.0;
    }

    let labels = connected_components(mask, Connectivity::Eight, Luma([BACKGROUND]));

    // Per-label (min_x, min_y, max_x, max_y)
    let mut boxes: Vec<Option<(u32, u32, u32, u32)>> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if boxes.len() <= label {
            boxes.resize(label + 1, None);
        }
        boxes[label] = Some(match boxes[label] {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }

    let glyph_like = boxes
        .iter()
        .flatten()
        .filter(|(x0, y0, x1, y1)| {
            let w = x1 - x0 + 1;
            let h = y1 - y0 + 1;
            let aspect = w as f64 / h as f64;
            w >= 2 && h >= 2 && (0.15..=15.0).contains(&aspect)
        })
        .count();

    let total: u64 = mask.pixels().map(|p| p[0] as u64).sum();
    let mean = total as f64 / (width as u64 * height as u64) as f64;
    let balance = (255.0 - 2.0 * (mean - 127.5).abs()).max(0.0);

    10.0 * glyph_like as f64 + balance
}

/// Produces masks from grayscale images with one set of settings
#[derive(Debug, Clone)]
pub struct Thresholder {
    settings: ThresholdSettings,
}

impl Thresholder {
    pub fn new(settings: ThresholdSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ThresholdSettings {
        &self.settings
    }

    /// Adaptive threshold in both polarities
    pub fn binarize(&self, gray: &GrayImage) -> MaskPair {
        adaptive_mean_threshold(gray, self.settings.block_size, self.settings.c)
    }

    /// Local-statistics variant
    pub fn local_statistics(&self, gray: &GrayImage) -> GrayImage {
        local_statistics_threshold(gray, self.settings.block_size, self.settings.k, self.settings.r)
    }

    /// All three masks in `MaskStrategy::ORDER`
    pub fn all_masks(&self, gray: &GrayImage) -> [(MaskStrategy, GrayImage); 3] {
        let MaskPair { positive, inverted } = self.binarize(gray);
        [
            (MaskStrategy::Positive, positive),
            (MaskStrategy::Inverted, inverted),
            (MaskStrategy::LocalStatistics, self.local_statistics(gray)),
        ]
    }

    /// The higher-scoring polarity of the adaptive threshold. The positive
    /// mask wins ties.
    pub fn best_polarity(&self, gray: &GrayImage) -> (MaskStrategy, GrayImage) {
        let MaskPair { positive, inverted } = self.binarize(gray);
        let positive_score = mask_quality_score(&positive);
        let inverted_score = mask_quality_score(&inverted);
        debug!(
            "Mask scores: positive={:.1}, inverted={:.1}",
            positive_score, inverted_score
        );

        if inverted_score > positive_score {
            (MaskStrategy::Inverted, inverted)
        } else {
            (MaskStrategy::Positive, positive)
        }
    }
}

impl Default for Thresholder {
    fn default() -> Self {
        Self::new(ThresholdSettings::default())
    }
}
