//! Application Configuration
//!
//! Pipeline tuning stored in TOML format. Every section falls back to its
//! defaults when omitted, so a config file only needs the values it changes.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Capture window around the point of interest
    pub capture: CaptureSettings,
    /// Mask generation
    pub threshold: ThresholdSettings,
    /// Region extraction, per pass kind
    pub extraction: ExtractionSettings,
    /// Candidate sampling
    pub sampler: SamplerSettings,
    /// Candidate normalization
    pub normalizer: OcrPreprocessing,
    /// Candidate selection
    pub selector: SelectorSettings,
    /// External recognizer
    pub recognizer: RecognizerSettings,
    /// Debug artifact output
    pub diagnostics: DiagnosticsSettings,
}

/// Capture-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Canvas width in pixels
    pub width: u32,
    /// Canvas height in pixels
    pub height: u32,
    /// RGB fill for canvas pixels outside the source
    pub pad: [u8; 3],
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 300,
            height: 150,
            pad: [0, 0, 0],
        }
    }
}

/// Thresholding settings shared by every mask strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdSettings {
    /// Odd window size for the local mean and deviation
    pub block_size: u32,
    /// Constant subtracted from the local mean
    pub c: f64,
    /// Text sensitivity of the local-statistics variant
    pub k: f64,
    /// Expected dynamic range of the standard deviation
    pub r: f64,
    /// Gaussian sigma of the light blur before the full-frame pass
    pub blur_sigma: f32,
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        Self {
            block_size: 21,
            c: 10.0,
            k: 0.2,
            r: 128.0,
            blur_sigma: 0.8,
        }
    }
}

/// Region extractor options for one kind of pass. A table in a config file
/// must list every field, since the two pass kinds have different defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractOptions {
    /// Smallest accepted box area (inclusive)
    pub min_area: f64,
    /// Largest accepted box area as a fraction of the image area (inclusive)
    pub max_area_ratio: f64,
    /// Lowest accepted width/height ratio (inclusive)
    pub min_aspect_ratio: f64,
    /// Highest accepted width/height ratio (inclusive)
    pub max_aspect_ratio: f64,
    /// Rows are divided by this to estimate the character height
    pub char_height_divisor: u32,
    /// Vertical overlap ratio needed to join a line
    pub y_overlap_threshold: f64,
    /// Horizontal gap allowed between merged boxes, in units of box height
    pub x_gap_factor: f64,
    /// Boxes whose tops differ by less than this sort left to right
    pub row_tolerance: i32,
}

impl ExtractOptions {
    /// Options for the single pass over the whole frame
    pub fn full_frame() -> Self {
        Self {
            min_area: 120.0,
            max_area_ratio: 0.85,
            min_aspect_ratio: 0.05,
            max_aspect_ratio: 20.0,
            char_height_divisor: 60,
            y_overlap_threshold: 0.5,
            x_gap_factor: 0.6,
            row_tolerance: 10,
        }
    }

    /// Options for the small jittered windows. Glyphs are proportionally
    /// larger and crops noisier, so line joins require containment.
    pub fn roi() -> Self {
        Self {
            min_area: 60.0,
            max_area_ratio: 0.75,
            min_aspect_ratio: 0.08,
            max_aspect_ratio: 15.0,
            char_height_divisor: 20,
            y_overlap_threshold: 1.0,
            x_gap_factor: 0.5,
            row_tolerance: 10,
        }
    }

    fn validate(&self, section: &str) -> Result<(), PipelineError> {
        let fail = |msg: String| Err(PipelineError::Configuration(format!("{section}: {msg}")));
        if !(self.min_area >= 0.0) {
            return fail(format!("min_area must be >= 0, got {}", self.min_area));
        }
        if !(self.max_area_ratio > 0.0 && self.max_area_ratio <= 1.0) {
            return fail(format!("max_area_ratio must be in (0, 1], got {}", self.max_area_ratio));
        }
        if !(self.min_aspect_ratio > 0.0 && self.min_aspect_ratio <= self.max_aspect_ratio) {
            return fail(format!(
                "aspect bounds must satisfy 0 < min <= max, got [{}, {}]",
                self.min_aspect_ratio, self.max_aspect_ratio
            ));
        }
        if self.char_height_divisor == 0 {
            return fail("char_height_divisor must be positive".to_string());
        }
        if !(self.y_overlap_threshold > 0.0 && self.y_overlap_threshold <= 1.0) {
            return fail(format!(
                "y_overlap_threshold must be in (0, 1], got {}",
                self.y_overlap_threshold
            ));
        }
        if !(self.x_gap_factor >= 0.0) {
            return fail(format!("x_gap_factor must be >= 0, got {}", self.x_gap_factor));
        }
        if self.row_tolerance < 0 {
            return fail(format!("row_tolerance must be >= 0, got {}", self.row_tolerance));
        }
        Ok(())
    }
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self::full_frame()
    }
}

/// Extractor options for both pass kinds. They stay separate because the
/// line-join thresholds differ between them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSettings {
    #[serde(default = "ExtractOptions::full_frame")]
    pub full_frame: ExtractOptions,
    #[serde(default = "ExtractOptions::roi")]
    pub roi: ExtractOptions,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            full_frame: ExtractOptions::full_frame(),
            roi: ExtractOptions::roi(),
        }
    }
}

/// Candidate sampler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerSettings {
    /// Number of jittered windows
    pub jitter_passes: usize,
    /// Window size as a fraction of the frame size
    pub roi_fraction: f64,
    /// Largest offset per axis as a fraction of the frame size
    pub jitter_fraction: f64,
    /// Fixed seed for reproducible offsets; the clock seeds it otherwise
    pub seed: Option<u64>,
    /// Whether to run the full-frame pass
    pub full_frame_pass: bool,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            jitter_passes: 4,
            roi_fraction: 0.5,
            jitter_fraction: 0.05,
            seed: None,
            full_frame_pass: true,
        }
    }
}

/// Normalization applied to each candidate before recognition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrPreprocessing {
    /// Base upscale factor
    pub upscale: f32,
    /// Thicken thin strokes after binarization
    pub boost_thin_text: bool,
    /// Extra upscale applied when boosting thin text
    pub boost_scale: u32,
    /// Use CIE lightness instead of plain luma
    pub use_lightness: bool,
    /// Top-hat / black-hat enhancement followed by CLAHE
    pub enhance_contrast: bool,
    /// Weight of the top-hat term
    pub tophat_weight: f32,
    /// Weight of the black-hat term
    pub blackhat_weight: f32,
    /// CLAHE clip limit
    pub clahe_clip_limit: f32,
    /// CLAHE tiles per axis
    pub clahe_tiles: u32,
    /// Mild Gaussian smoothing
    pub apply_denoise: bool,
    /// Sigma of the smoothing
    pub denoise_sigma: f32,
    /// Adaptive binarization before recognition
    pub apply_binarize: bool,
    /// Window size of the binarization
    pub binarize_block: u32,
    /// Constant of the binarization
    pub binarize_c: f64,
}

impl Default for OcrPreprocessing {
    fn default() -> Self {
        Self {
            upscale: 2.0,
            boost_thin_text: true,
            boost_scale: 2,
            use_lightness: true,
            enhance_contrast: true,
            tophat_weight: 1.0,
            blackhat_weight: 1.0,
            clahe_clip_limit: 2.0,
            clahe_tiles: 8,
            apply_denoise: true,
            denoise_sigma: 0.8,
            apply_binarize: true,
            binarize_block: 21,
            binarize_c: 5.0,
        }
    }
}

impl OcrPreprocessing {
    /// Effective upscale factor, never below one
    pub fn effective_scale(&self) -> f32 {
        let boost = if self.boost_thin_text { self.boost_scale as f32 } else { 1.0 };
        (self.upscale * boost).max(1.0)
    }
}

/// Candidate selection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorSettings {
    /// Candidates whose clipped width or height is at most this are skipped
    pub min_side: i32,
    /// Require a Latin letter or Hangul syllable in the recognized text
    pub require_letters: bool,
    /// TrueType font for the overview label; common system fonts otherwise
    pub overlay_font: Option<PathBuf>,
    /// Confidence floor for joining several outcomes into one text
    pub min_join_confidence: f32,
}

impl Default for SelectorSettings {
    fn default() -> Self {
        Self {
            min_side: 10,
            require_letters: true,
            overlay_font: None,
            min_join_confidence: 70.0,
        }
    }
}

/// Tesseract recognizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerSettings {
    /// Path to the tesseract executable; looked up on PATH when unset
    pub executable: Option<PathBuf>,
    /// tessdata directory; tesseract's own default when unset
    pub tessdata_dir: Option<PathBuf>,
    /// Language codes, e.g. "kor+eng"
    pub languages: String,
    /// Page segmentation mode (7 = single text line)
    pub psm: u32,
    /// OCR engine mode (1 = LSTM only)
    pub oem: u32,
    /// DPI hint for low-resolution screenshots
    pub dpi: u32,
    /// Optional character whitelist
    pub whitelist: Option<String>,
}

impl Default for RecognizerSettings {
    fn default() -> Self {
        Self {
            executable: None,
            tessdata_dir: None,
            languages: "kor+eng".to_string(),
            psm: 7,
            oem: 1,
            dpi: 300,
            whitelist: None,
        }
    }
}

/// Diagnostic artifact settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsSettings {
    /// Write intermediate images
    pub enabled: bool,
    /// Output root; the data directory's `outputs/` when unset
    pub output_root: Option<PathBuf>,
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            output_root: None,
        }
    }
}

impl AppConfig {
    /// Check every option before a run is allowed to start
    pub fn validate(&self) -> Result<(), PipelineError> {
        let fail = |msg: String| Err(PipelineError::Configuration(msg));

        if self.capture.width == 0 || self.capture.height == 0 {
            return fail(format!(
                "capture size must be positive, got {}x{}",
                self.capture.width, self.capture.height
            ));
        }

        let t = &self.threshold;
        validate_block_size("threshold.block_size", t.block_size)?;
        if !(t.r > 0.0) {
            return fail(format!("threshold.r must be positive, got {}", t.r));
        }
        if !t.k.is_finite() || !t.c.is_finite() {
            return fail("threshold.k and threshold.c must be finite".to_string());
        }
        if !(t.blur_sigma > 0.0) {
            return fail(format!("threshold.blur_sigma must be positive, got {}", t.blur_sigma));
        }

        self.extraction.full_frame.validate("extraction.full_frame")?;
        self.extraction.roi.validate("extraction.roi")?;

        let s = &self.sampler;
        if !(s.roi_fraction > 0.0 && s.roi_fraction <= 1.0) {
            return fail(format!("sampler.roi_fraction must be in (0, 1], got {}", s.roi_fraction));
        }
        if !(s.jitter_fraction >= 0.0 && s.jitter_fraction < 0.5) {
            return fail(format!(
                "sampler.jitter_fraction must be in [0, 0.5), got {}",
                s.jitter_fraction
            ));
        }

        let n = &self.normalizer;
        if !(n.upscale > 0.0) {
            return fail(format!("normalizer.upscale must be positive, got {}", n.upscale));
        }
        if n.boost_scale == 0 {
            return fail("normalizer.boost_scale must be at least 1".to_string());
        }
        if n.clahe_tiles == 0 || !(n.clahe_clip_limit > 0.0) {
            return fail("normalizer CLAHE tiles and clip limit must be positive".to_string());
        }
        if !(n.denoise_sigma > 0.0) {
            return fail(format!("normalizer.denoise_sigma must be positive, got {}", n.denoise_sigma));
        }
        validate_block_size("normalizer.binarize_block", n.binarize_block)?;

        if self.selector.min_side < 0 {
            return fail(format!("selector.min_side must be >= 0, got {}", self.selector.min_side));
        }
        if self.recognizer.languages.trim().is_empty() {
            return fail("recognizer.languages must not be empty".to_string());
        }

        Ok(())
    }
}

fn validate_block_size(name: &str, block_size: u32) -> Result<(), PipelineError> {
    if block_size < 3 || block_size % 2 == 0 {
        return Err(PipelineError::Configuration(format!(
            "{name} must be an odd number >= 3, got {block_size}"
        )));
    }
    Ok(())
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert_eq!(config.capture.width, 300);
        assert_eq!(config.capture.height, 150);

        assert_eq!(config.threshold.block_size, 21);
        assert!((config.threshold.r - 128.0).abs() < f64::EPSILON);

        assert!((config.extraction.full_frame.y_overlap_threshold - 0.5).abs() < f64::EPSILON);
        assert!((config.extraction.roi.y_overlap_threshold - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.extraction.full_frame.char_height_divisor, 60);
        assert_eq!(config.extraction.roi.char_height_divisor, 20);

        assert_eq!(config.sampler.jitter_passes, 4);
        assert!(config.normalizer.boost_thin_text);
        assert!((config.normalizer.effective_scale() - 4.0).abs() < f32::EPSILON);

        assert_eq!(config.recognizer.languages, "kor+eng");
        assert_eq!(config.recognizer.psm, 7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.extraction.roi, parsed.extraction.roi);
        assert_eq!(config.capture.width, parsed.capture.width);
        assert_eq!(config.recognizer.oem, parsed.recognizer.oem);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [sampler]
            jitter_passes = 2
            seed = 7

            [extraction.full_frame]
            min_area = 80.0
            max_area_ratio = 0.8
            min_aspect_ratio = 0.05
            max_aspect_ratio = 20.0
            char_height_divisor = 60
            y_overlap_threshold = 0.5
            x_gap_factor = 0.6
            row_tolerance = 10
            "#,
        )
        .unwrap();

        assert_eq!(parsed.sampler.jitter_passes, 2);
        assert_eq!(parsed.sampler.seed, Some(7));
        assert!(parsed.sampler.full_frame_pass);
        assert!((parsed.extraction.full_frame.min_area - 80.0).abs() < f64::EPSILON);
        // The omitted roi table keeps the roi defaults
        assert_eq!(parsed.extraction.roi, ExtractOptions::roi());
        assert_eq!(parsed.capture.height, 150);
    }

    #[test]
    fn test_partial_extract_table_is_rejected() {
        let parsed: std::result::Result<AppConfig, _> = toml::from_str(
            r#"
            [extraction.roi]
            min_area = 80.0
            "#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_save_and_load_config() {
        let mut config = AppConfig::default();
        config.sampler.seed = Some(42);
        let temp_file = NamedTempFile::new().unwrap();

        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(loaded.sampler.seed, Some(42));
        assert_eq!(loaded.threshold.block_size, config.threshold.block_size);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_even_block_size() {
        let mut config = AppConfig::default();
        config.threshold.block_size = 20;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(err.to_string().contains("block_size"));
    }

    #[test]
    fn test_validate_rejects_negative_area_and_inverted_aspect() {
        let mut config = AppConfig::default();
        config.extraction.full_frame.min_area = -1.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.extraction.roi.min_aspect_ratio = 30.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_sampler_and_normalizer() {
        let mut config = AppConfig::default();
        config.sampler.jitter_fraction = 0.6;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.normalizer.upscale = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.capture.width = 0;
        assert!(config.validate().is_err());
    }
}
