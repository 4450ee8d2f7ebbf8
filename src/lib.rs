//! clicktext - find and read the text line around a point of interest
//!
//! A captured frame is thresholded several ways, candidate text lines are
//! extracted and normalized, and the transcription the recognizer is most
//! confident about wins.

pub mod capture;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod runner;
pub mod storage;
pub mod vision;

pub use capture::frame::{CanvasTransform, CapturedFrame};
pub use config::AppConfig;
pub use error::PipelineError;
pub use runner::{PipelineRunner, RunOutcome, RunState};
pub use vision::{PipelineResult, Recognition, Recognizer, VisionPipeline};
