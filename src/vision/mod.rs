//! Vision/OCR Layer
//!
//! Finds the most probable text line in a captured frame and transcribes it.
//! Candidate boxes come from several thresholded views of the frame; each is
//! normalized, recognized, and the highest-confidence transcription wins.
//!
//! Stages, in data-flow order:
//! - [`sampler`]: jittered windows plus one full-frame pass
//! - [`regions`] using [`threshold`]: masks to line-level boxes
//! - [`normalize`]: crops to recognition-ready images
//! - [`select`]: recognition and selection through an injected [`Recognizer`]

pub mod geometry;
pub mod normalize;
pub mod ocr;
pub mod regions;
pub mod sampler;
pub mod select;
pub mod text;
pub mod threshold;

pub use geometry::Rect;
pub use normalize::{NormalizeStage, Normalizer};
pub use ocr::{Recognition, Recognizer, TesseractRecognizer};
pub use sampler::{CandidateOrigin, CandidateSampler, FixedOffsets, JitterSource, Pass, SampledRegion, SeededJitter};
pub use select::{Candidate, RecognitionOutcome, Selection, Selector};
pub use threshold::{MaskStrategy, Thresholder};

use image::{imageops, GrayImage, RgbImage};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::capture::frame::CapturedFrame;
use crate::config::AppConfig;
use crate::diagnostics::{ArtifactKind, DiagnosticsSink};
use crate::error::PipelineError;

/// Result of one pipeline run
#[derive(Debug)]
pub struct PipelineResult {
    /// Winning transcription, trimmed; empty when nothing qualified
    pub best_text: String,
    /// `best_text` reduced to Hangul syllables, ASCII letters and digits
    pub cleaned_text: String,
    /// Every recognized text at or above `min_join_confidence`, one per line
    pub confident_text: String,
    /// Winning confidence in `[0, 100]`; 0 when nothing qualified
    pub best_confidence: f32,
    /// Winning region in frame coordinates
    pub best_region: Option<Rect>,
    /// Winning region in source coordinates
    pub best_region_source: Option<Rect>,
    pub best_origin: Option<CandidateOrigin>,
    /// Normalized image of the winner
    pub best_image: Option<GrayImage>,
    /// Every sampled region, in pool order
    pub candidate_regions: Vec<SampledRegion>,
    /// Frame with candidates outlined and the winner highlighted
    pub annotated_overview: RgbImage,
    pub diagnostic_artifact_paths: Vec<PathBuf>,
    /// Processing time in milliseconds
    pub processing_time_ms: u64,
}

impl PipelineResult {
    pub fn has_text(&self) -> bool {
        !self.best_text.is_empty()
    }

    /// Serializable view without the images
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            text: self.best_text.clone(),
            cleaned_text: self.cleaned_text.clone(),
            confident_text: self.confident_text.clone(),
            confidence: self.best_confidence,
            region: self.best_region,
            region_source: self.best_region_source,
            origin: self.best_origin,
            candidates: self.candidate_regions.len(),
            artifacts: self.diagnostic_artifact_paths.clone(),
            processing_time_ms: self.processing_time_ms,
        }
    }
}

/// JSON-friendly run result
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub text: String,
    pub cleaned_text: String,
    pub confident_text: String,
    pub confidence: f32,
    pub region: Option<Rect>,
    pub region_source: Option<Rect>,
    pub origin: Option<CandidateOrigin>,
    pub candidates: usize,
    pub artifacts: Vec<PathBuf>,
    pub processing_time_ms: u64,
}

/// Candidate generation and selection pipeline
pub struct VisionPipeline {
    config: AppConfig,
    sampler: CandidateSampler,
    normalizer: Normalizer,
    selector: Selector,
    output_root: Option<PathBuf>,
}

impl VisionPipeline {
    /// Create a pipeline. The configuration is validated here so that no run
    /// ever starts with malformed options.
    pub fn new(config: AppConfig, recognizer: Arc<dyn Recognizer>) -> Result<Self, PipelineError> {
        config.validate()?;

        let thresholder = Thresholder::new(config.threshold.clone());
        let sampler = CandidateSampler::new(
            config.sampler.clone(),
            config.extraction.clone(),
            thresholder,
            sampler::jitter_from_settings(&config.sampler),
        );
        let normalizer = Normalizer::new(config.normalizer.clone());
        let selector = Selector::new(config.selector.clone(), recognizer);
        let output_root = if config.diagnostics.enabled {
            config.diagnostics.output_root.clone()
        } else {
            None
        };

        Ok(Self {
            config,
            sampler,
            normalizer,
            selector,
            output_root,
        })
    }

    /// Use a specific offset generator for the jittered windows
    pub fn with_jitter(mut self, jitter: Box<dyn JitterSource>) -> Self {
        self.sampler.set_jitter(jitter);
        self
    }

    /// Write diagnostic artifacts under `root`, or nowhere
    pub fn with_output_root(mut self, root: Option<PathBuf>) -> Self {
        self.output_root = root;
        self
    }

    pub fn output_root(&self) -> Option<&PathBuf> {
        self.output_root.as_ref()
    }

    /// Process a captured frame. Every per-candidate failure is absorbed;
    /// a frame without usable text yields an empty result.
    pub fn run(&self, frame: &CapturedFrame) -> PipelineResult {
        let start = Instant::now();
        let mut sink = match &self.output_root {
            Some(root) => DiagnosticsSink::for_run(root, frame.timestamp),
            None => DiagnosticsSink::disabled(),
        };

        if frame.is_empty() {
            warn!("Empty frame {}x{}, nothing to do", frame.image.width(), frame.image.height());
            return self.empty_result(frame, sink, start);
        }

        if let Some(point) = frame.point_of_interest {
            sink.save_raw(&frame.image, point);
        }

        let pool = self.sampler.sample_with(&frame.image, |pass, strategy, mask| {
            let stage = format!("mask_{}_{}", pass.label(), strategy.name());
            sink.save_gray(ArtifactKind::Parts, &stage, mask);
        });
        debug!("Sampled {} candidate regions", pool.len());

        let (width, height) = frame.dimensions();
        let candidates = pool.iter().enumerate().filter_map(|(index, sampled)| {
            let region = self.selector.admissible_region(&sampled.rect, width, height)?;
            let (x, y, w, h) = region.to_bounds();
            let crop = imageops::crop_imm(&frame.image, x, y, w, h).to_image();
            let normalized = self.normalizer.normalize_with(&crop, |stage, image| {
                let name = format!("c{index:02}_{}", stage.name());
                sink.save_gray(ArtifactKind::Pre, &name, image);
            });
            match normalized {
                Ok(image) => Some(Candidate {
                    region,
                    origin: sampled.origin,
                    image,
                }),
                Err(e) => {
                    warn!("Candidate {} skipped: {}", region, e);
                    None
                }
            }
        });
        let selection = self.selector.select(candidates);

        let regions: Vec<Rect> = pool.iter().map(|r| r.rect).collect();
        let overview = self.selector.render_overview(&frame.image, &regions, selection.best.as_ref());
        sink.save_rgb(ArtifactKind::Parts, "overview", &overview);

        let best_confidence = selection.best_confidence();
        let confident_text = text::join_confident(
            selection.recognized.iter().map(|(t, c)| (t.as_str(), *c)),
            self.config.selector.min_join_confidence,
        );
        let (best_text, best_region, best_origin, best_image) = match selection.best {
            Some(best) => (best.text, Some(best.region), Some(best.origin), Some(best.image)),
            None => (String::new(), None, None, None),
        };

        let processing_time = start.elapsed();
        info!(
            "Run finished in {:?}: {} regions, {} recognized, {} failed, best '{}' ({:.1})",
            processing_time,
            pool.len(),
            selection.recognized.len(),
            selection.failed,
            best_text,
            best_confidence
        );

        PipelineResult {
            cleaned_text: text::clean_text(&best_text),
            confident_text,
            best_text,
            best_confidence,
            best_region_source: best_region.map(|r| frame.transform.rect_to_source(&r)),
            best_region,
            best_origin,
            best_image,
            candidate_regions: pool,
            annotated_overview: overview,
            diagnostic_artifact_paths: sink.into_paths(),
            processing_time_ms: processing_time.as_millis() as u64,
        }
    }

    fn empty_result(&self, frame: &CapturedFrame, sink: DiagnosticsSink, start: Instant) -> PipelineResult {
        PipelineResult {
            best_text: String::new(),
            cleaned_text: String::new(),
            confident_text: String::new(),
            best_confidence: 0.0,
            best_region: None,
            best_region_source: None,
            best_origin: None,
            best_image: None,
            candidate_regions: vec![],
            annotated_overview: frame.image.clone(),
            diagnostic_artifact_paths: sink.into_paths(),
            processing_time_ms: start.elapsed().as_millis() as u64,
        }
    }
}
