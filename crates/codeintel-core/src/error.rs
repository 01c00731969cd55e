//! Core error types for codeintel.

use thiserror::Error;

/// Errors that can occur in core operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Area name registered twice or with an empty base directory
    #[error("Invalid area {name}: {reason}")]
    InvalidArea { name: String, reason: String },
}

impl From<serde_yaml::Error> for CoreError {
    fn from(e: serde_yaml::Error) -> Self {
        CoreError::Config(e.to_string())
    }
}
