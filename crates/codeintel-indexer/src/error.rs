//! Indexer error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during indexing operations.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// I/O error during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Content for a scan could not be read from disk
    #[error("Cannot load content of {path}: {source}")]
    ContentUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage root is unusable
    #[error("Storage error: {0}")]
    Storage(String),

    /// File watcher error
    #[error("Watcher error: {0}")]
    Watcher(String),

    /// Path not found
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// No language engine registered for the tag
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// The scheduler no longer accepts requests
    #[error("Scheduler is shut down")]
    ShutDown,

    /// Configuration could not be applied
    #[error(transparent)]
    Core(#[from] codeintel_core::CoreError),
}

impl From<rmp_serde::encode::Error> for IndexerError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        IndexerError::Serialization(e.to_string())
    }
}
