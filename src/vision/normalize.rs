//! Candidate normalization for recognition
//!
//! Turns a cropped candidate into a large, high-contrast grayscale or binary
//! image. Every stage is gated by a flag in [`OcrPreprocessing`] and can be
//! observed through a callback for diagnostics.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{grayscale_close, grayscale_erode, grayscale_open, Mask};
use std::sync::OnceLock;
use tracing::debug;

use super::threshold::adaptive_mean_threshold;
use crate::config::OcrPreprocessing;
use crate::error::PipelineError;

/// Normalization stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeStage {
    /// Lightness (or luma) of the upscaled crop
    Lightness,
    /// Top-hat / black-hat enhancement plus CLAHE
    Enhanced,
    Denoised,
    Binarized,
    /// Thin strokes thickened
    Boosted,
}

impl NormalizeStage {
    pub fn name(&self) -> &'static str {
        match self {
            NormalizeStage::Lightness => "lightness",
            NormalizeStage::Enhanced => "enhanced",
            NormalizeStage::Denoised => "denoised",
            NormalizeStage::Binarized => "binarized",
            NormalizeStage::Boosted => "boosted",
        }
    }
}

/// Applies one set of normalization settings to candidate crops
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    settings: OcrPreprocessing,
}

impl Normalizer {
    pub fn new(settings: OcrPreprocessing) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &OcrPreprocessing {
        &self.settings
    }

    pub fn normalize(&self, region: &RgbImage) -> Result<GrayImage, PipelineError> {
        self.normalize_with(region, |_, _| {})
    }

    /// Normalize a crop, reporting each stage's output to `on_stage`
    pub fn normalize_with<F>(&self, region: &RgbImage, mut on_stage: F) -> Result<GrayImage, PipelineError>
    where
        F: FnMut(NormalizeStage, &GrayImage),
    {
        let (width, height) = region.dimensions();
        if width == 0 || height == 0 {
            return Err(PipelineError::Input(format!("empty candidate {width}x{height}")));
        }
        let s = &self.settings;

        let scale = s.effective_scale();
        let upscaled;
        let source = if scale > 1.0 {
            let new_w = ((width as f32 * scale).round() as u32).max(1);
            let new_h = ((height as f32 * scale).round() as u32).max(1);
            upscaled = imageops::resize(region, new_w, new_h, FilterType::Lanczos3);
            &upscaled
        } else {
            region
        };

        let mut gray = if s.use_lightness {
            lightness(source)
        } else {
            imageops::grayscale(source)
        };
        on_stage(NormalizeStage::Lightness, &gray);

        if s.enhance_contrast {
            gray = enhance_details(&gray, s.tophat_weight, s.blackhat_weight);
            gray = clahe(&gray, s.clahe_clip_limit, s.clahe_tiles);
            on_stage(NormalizeStage::Enhanced, &gray);
        }

        if s.apply_denoise {
            gray = gaussian_blur_f32(&gray, s.denoise_sigma);
            on_stage(NormalizeStage::Denoised, &gray);
        }

        if s.apply_binarize {
            gray = adaptive_mean_threshold(&gray, s.binarize_block, s.binarize_c).positive;
            if mean_value(&gray) < 127.0 {
                imageops::invert(&mut gray);
            }
            on_stage(NormalizeStage::Binarized, &gray);
        }

        if s.boost_thin_text {
            gray = boost_strokes(&gray);
            on_stage(NormalizeStage::Boosted, &gray);
        }

        debug!(
            "Normalized {}x{} -> {}x{} (scale {:.1})",
            width,
            height,
            gray.width(),
            gray.height(),
            scale
        );
        Ok(gray)
    }
}

/// sRGB component to linear light
fn srgb_to_linear_lut() -> &'static [f32; 256] {
    static LUT: OnceLock<[f32; 256]> = OnceLock::new();
    LUT.get_or_init(|| {
        let mut lut = [0.0f32; 256];
        for (i, v) in lut.iter_mut().enumerate() {
            let c = i as f32 / 255.0;
            *v = if c <= 0.04045 {
                c / 12.92
            } else {
                ((c + 0.055) / 1.055).powf(2.4)
            };
        }
        lut
    })
}

/// CIE L* scaled from [0, 100] to [0, 255]
pub fn lightness(image: &RgbImage) -> GrayImage {
    let lut = srgb_to_linear_lut();
    let mut out = GrayImage::new(image.width(), image.height());
    for (x, y, p) in image.enumerate_pixels() {
        let luminance = 0.2126 * lut[p[0] as usize] + 0.7152 * lut[p[1] as usize] + 0.0722 * lut[p[2] as usize];
        let l = if luminance > 0.008856 {
            116.0 * luminance.cbrt() - 16.0
        } else {
            903.3 * luminance
        };
        out.put_pixel(x, y, Luma([(l * 2.55).round().clamp(0.0, 255.0) as u8]));
    }
    out
}

/// Odd structuring element size of about 1% of the shorter side, at least 3
pub fn structuring_size(width: u32, height: u32) -> u32 {
    let size = (width.min(height) as f32 * 0.01).round() as u32;
    let size = if size % 2 == 0 { size + 1 } else { size };
    size.clamp(3, 255)
}

fn square_mask(size: u32) -> Mask {
    let kernel = GrayImage::from_pixel(size, size, Luma([255]));
    let center = (size / 2) as u8;
    Mask::from_image(&kernel, center, center)
}

/// `L + a * TopHat(L) - b * BlackHat(L)`: brightens small bright detail and
/// darkens small dark detail
pub fn enhance_details(gray: &GrayImage, tophat_weight: f32, blackhat_weight: f32) -> GrayImage {
    let mask = square_mask(structuring_size(gray.width(), gray.height()));
    let opened = grayscale_open(gray, &mask);
    let closed = grayscale_close(gray, &mask);

    let mut out = GrayImage::new(gray.width(), gray.height());
    for (x, y, p) in gray.enumerate_pixels() {
        let l = p[0] as f32;
        let tophat = l - opened.get_pixel(x, y)[0] as f32;
        let blackhat = closed.get_pixel(x, y)[0] as f32 - l;
        let v = l + tophat_weight * tophat - blackhat_weight * blackhat;
        out.put_pixel(x, y, Luma([v.round().clamp(0.0, 255.0) as u8]));
    }
    out
}

/// Contrast-limited adaptive histogram equalization with bilinear
/// interpolation between tile mappings
pub fn clahe(gray: &GrayImage, clip_limit: f32, tiles: u32) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return gray.clone();
    }
    let tiles_x = tiles.clamp(1, width);
    let tiles_y = tiles.clamp(1, height);
    let tile_w = width.div_ceil(tiles_x);
    let tile_h = height.div_ceil(tiles_y);

    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);
            if x0 >= x1 || y0 >= y1 {
                luts[(ty * tiles_x + tx) as usize] = identity_lut();
                continue;
            }

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            let count = (x1 - x0) * (y1 - y0);
            luts[(ty * tiles_x + tx) as usize] = equalization_lut(&mut hist, count, clip_limit);
        }
    }

    // Tile centers sit at (t + 0.5) * tile size
    let axis = |pos: u32, size: u32, n: u32| -> (usize, usize, f32) {
        let f = (pos as f32 + 0.5) / size as f32 - 0.5;
        let i0 = f.floor().clamp(0.0, (n - 1) as f32) as u32;
        let i1 = (i0 + 1).min(n - 1);
        let w = (f - i0 as f32).clamp(0.0, 1.0);
        (i0 as usize, i1 as usize, w)
    };

    let mut out = GrayImage::new(width, height);
    for (x, y, p) in gray.enumerate_pixels() {
        let v = p[0] as usize;
        let (x0, x1, wx) = axis(x, tile_w, tiles_x);
        let (y0, y1, wy) = axis(y, tile_h, tiles_y);
        let row = tiles_x as usize;
        let top = luts[y0 * row + x0][v] as f32 * (1.0 - wx) + luts[y0 * row + x1][v] as f32 * wx;
        let bottom = luts[y1 * row + x0][v] as f32 * (1.0 - wx) + luts[y1 * row + x1][v] as f32 * wx;
        let value = top * (1.0 - wy) + bottom * wy;
        out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
    }
    out
}

fn identity_lut() -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (i, v) in lut.iter_mut().enumerate() {
        *v = i as u8;
    }
    lut
}

/// Clip the histogram, spread the excess evenly, and map through the CDF
fn equalization_lut(hist: &mut [u32; 256], count: u32, clip_limit: f32) -> [u8; 256] {
    let limit = ((clip_limit * count as f32 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let share = excess / 256;
    let remainder = (excess % 256) as usize;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += share + u32::from(i < remainder);
    }

    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    let scale = 255.0 / count as f32;
    for (i, bin) in hist.iter().enumerate() {
        cdf += bin;
        lut[i] = (cdf as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

fn mean_value(gray: &GrayImage) -> f64 {
    let total: u64 = gray.pixels().map(|p| p[0] as u64).sum();
    total as f64 / (gray.width() as u64 * gray.height() as u64).max(1) as f64
}

/// Thicken dark strokes horizontally, then close away isolated dark specks
pub fn boost_strokes(binary: &GrayImage) -> GrayImage {
    let radius = (binary.height() / 200).max(1);
    let width = 1 + 2 * radius.min(127);
    let kernel = GrayImage::from_pixel(width, 1, Luma([255]));
    let thickened = grayscale_erode(binary, &Mask::from_image(&kernel, (width / 2) as u8, 0));

    let speck = GrayImage::from_pixel(2, 2, Luma([255]));
    grayscale_close(&thickened, &Mask::from_image(&speck, 0, 0))
}
