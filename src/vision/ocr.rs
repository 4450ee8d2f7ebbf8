//! Text recognition
//!
//! The pipeline only needs a narrow capability: image in, text and a mean
//! confidence in `[0, 100]` out. [`TesseractRecognizer`] provides it by
//! running the `tesseract` executable with TSV output.

use anyhow::{anyhow, Result};
use image::GrayImage;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::RecognizerSettings;
use crate::error::PipelineError;

/// Recognized text and its mean confidence
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Mean confidence, expected in `[0, 100]`
    pub confidence: f32,
}

/// Recognizes text in a normalized image. Implementations must not retain
/// the image.
pub trait Recognizer: Send + Sync {
    fn recognize(&self, image: &GrayImage) -> Result<Recognition>;
}

impl<F> Recognizer for F
where
    F: Fn(&GrayImage) -> Result<Recognition> + Send + Sync,
{
    fn recognize(&self, image: &GrayImage) -> Result<Recognition> {
        self(image)
    }
}

/// Single word from the TSV output
#[derive(Debug, Clone, PartialEq)]
struct TsvWord {
    text: String,
    confidence: f32,
}

/// Recognizer backed by the tesseract command-line tool
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    executable: PathBuf,
    settings: RecognizerSettings,
}

impl TesseractRecognizer {
    /// Check that tesseract runs and its data directory exists
    pub fn new(settings: RecognizerSettings) -> Result<Self, PipelineError> {
        let executable = settings
            .executable
            .clone()
            .unwrap_or_else(|| PathBuf::from("tesseract"));

        if let Some(dir) = &settings.tessdata_dir {
            if !dir.is_dir() {
                return Err(PipelineError::Resource(format!(
                    "tessdata directory not found: {}",
                    dir.display()
                )));
            }
        }

        let version = Command::new(&executable)
            .arg("--version")
            .output()
            .map_err(|e| {
                PipelineError::Resource(format!("cannot run {}: {}", executable.display(), e))
            })?;
        if !version.status.success() {
            return Err(PipelineError::Resource(format!(
                "{} --version exited with {}",
                executable.display(),
                version.status
            )));
        }

        // Older builds print the version on stderr
        let banner = if version.stdout.is_empty() { &version.stderr } else { &version.stdout };
        let banner = String::from_utf8_lossy(banner);
        info!(
            "Tesseract ready: {} ({})",
            banner.lines().next().unwrap_or("unknown version").trim(),
            settings.languages
        );

        Ok(Self { executable, settings })
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn command(&self, input: &Path) -> Command {
        let s = &self.settings;
        let mut cmd = Command::new(&self.executable);
        cmd.arg(input)
            .arg("stdout")
            .arg("-l")
            .arg(&s.languages)
            .arg("--psm")
            .arg(s.psm.to_string())
            .arg("--oem")
            .arg(s.oem.to_string())
            .arg("--dpi")
            .arg(s.dpi.to_string());
        if let Some(dir) = &s.tessdata_dir {
            cmd.arg("--tessdata-dir").arg(dir);
        }
        if let Some(whitelist) = &s.whitelist {
            cmd.arg("-c").arg(format!("tessedit_char_whitelist={whitelist}"));
        }
        cmd.arg("tsv");
        cmd
    }
}

impl Recognizer for TesseractRecognizer {
    fn recognize(&self, image: &GrayImage) -> Result<Recognition> {
        let input = NamedTempFile::with_suffix(".png")?;
        image.save(input.path())?;

        let output = self.command(input.path()).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Tesseract failed: {}", stderr.trim()));
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        let recognition = summarize(&parse_tsv_words(&tsv));
        debug!(
            "Tesseract: '{}' ({:.1}) on {}x{}",
            recognition.text,
            recognition.confidence,
            image.width(),
            image.height()
        );
        Ok(recognition)
    }
}

/// Word rows (level 5) with text and a non-negative confidence
fn parse_tsv_words(tsv: &str) -> Vec<TsvWord> {
    let mut words = Vec::new();

    // Header: level page_num block_num par_num line_num word_num
    //         left top width height conf text
    for line in tsv.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }
        if fields[0].trim() != "5" {
            continue;
        }
        let confidence: f32 = fields[10].trim().parse().unwrap_or(-1.0);
        let text = fields[11].trim();
        if text.is_empty() || confidence < 0.0 {
            continue;
        }
        words.push(TsvWord {
            text: text.to_string(),
            confidence,
        });
    }

    words
}

/// Space-joined words and their mean confidence; no words gives empty
/// text at confidence 0
fn summarize(words: &[TsvWord]) -> Recognition {
    if words.is_empty() {
        return Recognition {
            text: String::new(),
            confidence: 0.0,
        };
    }
    let text = words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let confidence = words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32;
    Recognition { text, confidence }
}
