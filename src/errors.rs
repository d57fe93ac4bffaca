//! Error types for the craftmind learning pipeline.
//!
//! Components use these internally; the coordinator absorbs them so that
//! nothing propagates into the agent's decision loop.

use thiserror::Error;

/// Main error type for the learning pipeline
#[derive(Error, Debug)]
pub enum LearningError {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persisted file version differs from expected
    #[error("Version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },
}

/// Result type alias for learning operations
pub type Result<T> = std::result::Result<T, LearningError>;

/// Convert anyhow errors to LearningError
impl From<anyhow::Error> for LearningError {
    fn from(err: anyhow::Error) -> Self {
        LearningError::Config(err.to_string())
    }
}
