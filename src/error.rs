//! Error taxonomy for the candidate pipeline
//!
//! Only configuration and resource errors ever reach a caller as fatal.
//! Input and recognizer errors are reported per candidate and skipped.

use thiserror::Error;

/// Errors raised by the pipeline and its collaborators
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed option values, detected before a run starts
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A backing resource (recognizer executable, model data) is missing
    #[error("missing resource: {0}")]
    Resource(String),

    /// Empty frame or a candidate region that collapsed after clipping
    #[error("unusable input: {0}")]
    Input(String),

    /// The recognizer failed or returned malformed output for one candidate
    #[error("recognizer failure: {0}")]
    Recognizer(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl PipelineError {
    /// Whether this error must abort the caller rather than skip a candidate
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Resource(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(PipelineError::Configuration("block_size".into()).is_fatal());
        assert!(PipelineError::Resource("tessdata".into()).is_fatal());
        assert!(!PipelineError::Input("empty frame".into()).is_fatal());
        assert!(!PipelineError::Recognizer("timeout".into()).is_fatal());
    }

    #[test]
    fn test_display_messages() {
        let err = PipelineError::Configuration("block_size must be odd".into());
        assert_eq!(err.to_string(), "invalid configuration: block_size must be odd");
    }
}
