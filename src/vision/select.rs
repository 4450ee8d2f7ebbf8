//! Candidate selection
//!
//! Each normalized candidate goes to the recognizer once; the first
//! candidate with the strictly highest confidence and meaningful text wins.
//! The overview image outlines every candidate and highlights the winner.

use ab_glyph::FontVec;
use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect as DrawRect;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use super::geometry::Rect;
use super::ocr::{Recognition, Recognizer};
use super::sampler::CandidateOrigin;
use super::text::is_meaningful_text;
use crate::config::SelectorSettings;
use crate::error::PipelineError;

/// Confidence before any candidate qualifies
pub const NO_RESULT: f32 = -1.0;

const OUTLINE_COLOR: Rgb<u8> = Rgb([0, 200, 255]);
const WINNER_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LABEL_SCALE: f32 = 16.0;

/// A normalized sub-image and the frame region it came from
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Clipped source rectangle in frame coordinates
    pub region: Rect,
    pub origin: CandidateOrigin,
    pub image: GrayImage,
}

/// The winning candidate with its recognized text
#[derive(Debug, Clone)]
pub struct RecognitionOutcome {
    pub text: String,
    pub confidence: f32,
    pub region: Rect,
    pub origin: CandidateOrigin,
    pub image: GrayImage,
}

/// What a selection pass saw
#[derive(Debug, Default)]
pub struct Selection {
    pub best: Option<RecognitionOutcome>,
    /// Text and confidence of every successful recognition, in order
    pub recognized: Vec<(String, f32)>,
    pub attempted: usize,
    pub failed: usize,
}

impl Selection {
    /// Best confidence, or 0 when nothing qualified
    pub fn best_confidence(&self) -> f32 {
        self.best.as_ref().map_or(0.0, |b| b.confidence)
    }
}

/// Sends candidates to the recognizer and keeps the best one
pub struct Selector {
    settings: SelectorSettings,
    recognizer: Arc<dyn Recognizer>,
    font: Option<FontVec>,
}

impl Selector {
    pub fn new(settings: SelectorSettings, recognizer: Arc<dyn Recognizer>) -> Self {
        let font = load_font(settings.overlay_font.as_deref());
        if font.is_none() {
            debug!("No overlay font found; the winner is marked without a label");
        }
        Self {
            settings,
            recognizer,
            font,
        }
    }

    /// Clip a candidate rectangle to the frame. `None` when either side is
    /// at most `min_side` pixels after clipping.
    pub fn admissible_region(&self, rect: &Rect, frame_width: u32, frame_height: u32) -> Option<Rect> {
        let clipped = rect.clip(frame_width, frame_height);
        let min_side = self.settings.min_side;
        if clipped.width <= min_side || clipped.height <= min_side {
            debug!("Skipping {} (clipped to {})", rect, clipped);
            return None;
        }
        Some(clipped)
    }

    /// Recognize one candidate. Errors, panics, and confidences outside
    /// `[0, 100]` all come back as recognizer errors.
    pub fn recognize(&self, candidate: &Candidate) -> Result<Recognition, PipelineError> {
        let recognizer = &self.recognizer;
        let image = &candidate.image;
        let result = panic::catch_unwind(AssertUnwindSafe(|| recognizer.recognize(image)));

        let recognition = match result {
            Ok(Ok(recognition)) => recognition,
            Ok(Err(e)) => return Err(PipelineError::Recognizer(format!("{e:#}"))),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                return Err(PipelineError::Recognizer(format!("recognizer panicked: {message}")));
            }
        };

        let confidence = recognition.confidence;
        if !confidence.is_finite() || !(0.0..=100.0).contains(&confidence) {
            return Err(PipelineError::Recognizer(format!(
                "confidence out of range: {confidence}"
            )));
        }
        Ok(recognition)
    }

    fn qualifies(&self, text: &str) -> bool {
        if self.settings.require_letters {
            is_meaningful_text(text)
        } else {
            !text.trim().is_empty()
        }
    }

    /// Consume candidates in order and keep the best outcome
    pub fn select<I>(&self, candidates: I) -> Selection
    where
        I: IntoIterator<Item = Candidate>,
    {
        let mut selection = Selection::default();
        let mut best_confidence = NO_RESULT;

        for candidate in candidates {
            selection.attempted += 1;
            let recognition = match self.recognize(&candidate) {
                Ok(r) => r,
                Err(e) => {
                    warn!("Candidate {} discarded: {}", candidate.region, e);
                    selection.failed += 1;
                    continue;
                }
            };

            let text = recognition.text.trim().to_string();
            debug!(
                "Candidate {} ({:?}/{}): '{}' {:.1}",
                candidate.region,
                candidate.origin.pass,
                candidate.origin.mask.name(),
                text,
                recognition.confidence
            );
            selection.recognized.push((text.clone(), recognition.confidence));

            if !self.qualifies(&text) || recognition.confidence <= best_confidence {
                continue;
            }

            best_confidence = recognition.confidence;
            selection.best = Some(RecognitionOutcome {
                text,
                confidence: recognition.confidence,
                region: candidate.region,
                origin: candidate.origin,
                image: candidate.image,
            });
        }

        selection
    }

    /// Frame copy with every candidate outlined and the winner highlighted
    pub fn render_overview(
        &self,
        frame: &RgbImage,
        regions: &[Rect],
        best: Option<&RecognitionOutcome>,
    ) -> RgbImage {
        render_overview(frame, regions, best, self.font.as_ref())
    }
}

fn draw_rect(rect: &Rect) -> Option<DrawRect> {
    if rect.is_empty() {
        return None;
    }
    Some(DrawRect::at(rect.x, rect.y).of_size(rect.width as u32, rect.height as u32))
}

/// Draw the overview. Without a font the winner gets a small filled marker
/// instead of a label.
pub fn render_overview(
    frame: &RgbImage,
    regions: &[Rect],
    best: Option<&RecognitionOutcome>,
    font: Option<&FontVec>,
) -> RgbImage {
    let mut canvas = frame.clone();
    let (width, height) = frame.dimensions();

    for region in regions {
        if let Some(r) = draw_rect(&region.clip(width, height)) {
            draw_hollow_rect_mut(&mut canvas, r, OUTLINE_COLOR);
        }
    }

    let Some(best) = best else {
        return canvas;
    };

    let region = best.region.clip(width, height);
    if let Some(r) = draw_rect(&region) {
        draw_hollow_rect_mut(&mut canvas, r, WINNER_COLOR);
    }
    // Second pixel of the outline, inside the first
    let inner = Rect::new(region.x + 1, region.y + 1, region.width - 2, region.height - 2);
    if let Some(r) = draw_rect(&inner) {
        draw_hollow_rect_mut(&mut canvas, r, WINNER_COLOR);
    }

    match font {
        Some(font) => {
            let label = format!("{} ({:.1})", best.text, best.confidence);
            let text_y = (region.y - LABEL_SCALE as i32 - 2).max(0);
            draw_text_mut(&mut canvas, WINNER_COLOR, region.x.max(0), text_y, LABEL_SCALE, font, &label);
        }
        None => {
            let marker = DrawRect::at(region.x.max(0), (region.y - 6).max(0)).of_size(6, 4);
            draw_filled_rect_mut(&mut canvas, marker, WINNER_COLOR);
        }
    }

    canvas
}

/// Load the configured font, or the first usable common system font
pub fn load_font(configured: Option<&Path>) -> Option<FontVec> {
    if let Some(path) = configured {
        match std::fs::read(path).map(FontVec::try_from_vec) {
            Ok(Ok(font)) => return Some(font),
            Ok(Err(e)) => warn!("Invalid overlay font {}: {}", path.display(), e),
            Err(e) => warn!("Cannot read overlay font {}: {}", path.display(), e),
        }
    }

    // Hangul-capable fonts first
    let font_paths = [
        "/usr/share/fonts/truetype/nanum/NanumGothic.ttf",
        "C:\\Windows\\Fonts\\malgun.ttf",
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
        "/System/Library/Fonts/Supplemental/Arial.ttf",
        "C:\\Windows\\Fonts\\arial.ttf",
    ];

    for path in &font_paths {
        if let Ok(font_data) = std::fs::read(path) {
            if let Ok(font) = FontVec::try_from_vec(font_data) {
                return Some(font);
            }
        }
    }

    None
}
