//! Error types for preprocessing operations.
//!
//! Configuration errors are raised synchronously while building modalities
//! and exams; collaborator errors propagate uncaught out of a pipeline run.

use std::path::PathBuf;

use thiserror::Error;

use crate::artifact::BinaryKind;

/// Main error type for preprocessing operations.
#[derive(Error, Debug)]
pub enum PreprocessError {
    /// Invalid modality, exam or run configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A label volume was requested that the modality does not carry.
    #[error("Modality {modality} has no {kind} volume")]
    MissingBinary { modality: String, kind: BinaryKind },

    /// Registration collaborator failure (non-convergence, tool error).
    #[error("Registration error: {0}")]
    RegistrationError(String),

    /// Brain extraction collaborator failure.
    #[error("Brain extraction error: {0}")]
    BrainExtractionError(String),

    /// Intensity normalization failure.
    #[error("Normalization error: {0}")]
    NormalizationError(String),

    /// Volume codec failure (unreadable or unwritable volume).
    #[error("Volume I/O error: {0}")]
    VolumeIoError(String),

    /// Filesystem failure on a known path.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Two volumes that must share a voxel grid do not.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

/// Result type for preprocessing operations.
pub type Result<T> = std::result::Result<T, PreprocessError>;

impl PreprocessError {
    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a registration error.
    pub fn registration(msg: impl Into<String>) -> Self {
        Self::RegistrationError(msg.into())
    }

    /// Create a brain extraction error.
    pub fn brain_extraction(msg: impl Into<String>) -> Self {
        Self::BrainExtractionError(msg.into())
    }

    /// Create a normalization error.
    pub fn normalization(msg: impl Into<String>) -> Self {
        Self::NormalizationError(msg.into())
    }

    /// Create a volume I/O error.
    pub fn volume_io(msg: impl Into<String>) -> Self {
        Self::VolumeIoError(msg.into())
    }

    /// Wrap a filesystem error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error stems from configuration rather than a collaborator.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration(_) | Self::MissingBinary { .. }
        )
    }
}
