//! Error types for the autoencoder pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, AutoencoderError>;

/// Errors that can occur while preparing data, training, evaluating or plotting.
#[derive(Debug, Error)]
pub enum AutoencoderError {
    /// I/O error during file operations.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The `.npy` input could not be read.
    #[error("failed to read events from {path}: {reason}")]
    ReadEvents { path: PathBuf, reason: String },

    /// Array shape does not match what the pipeline expects.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Thresholds cannot be derived from zero samples.
    #[error("cannot evaluate an empty set of events")]
    EmptyEvaluation,

    /// Persisting or restoring model weights failed.
    #[error("model record error: {0}")]
    Record(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Rendering a plot failed.
    #[error("plot error: {0}")]
    Plot(String),
}

impl AutoencoderError {
    /// Create a new invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    /// Create a new shape mismatch error.
    #[must_use]
    pub fn shape_mismatch(expected: impl std::fmt::Debug, actual: impl std::fmt::Debug) -> Self {
        Self::ShapeMismatch {
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
        }
    }
}

impl From<ndarray::ShapeError> for AutoencoderError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::ShapeMismatch {
            expected: "compatible array layout".to_string(),
            actual: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for AutoencoderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for AutoencoderError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_mismatch_formats_both_sides() {
        let err = AutoencoderError::shape_mismatch([336, 80, 4], [336, 80, 3]);
        assert_eq!(
            err.to_string(),
            "shape mismatch: expected [336, 80, 4], got [336, 80, 3]"
        );
    }

    #[test]
    fn io_errors_convert() {
        let err: AutoencoderError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert!(matches!(err, AutoencoderError::Io(_)));
    }
}
