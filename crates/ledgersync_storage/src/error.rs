//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The key is empty or contains forbidden path segments.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// A stored document could not be encoded or decoded.
    #[error("corrupted document {key:?}: {message}")]
    Corrupted {
        /// Key of the offending document.
        key: String,
        /// Decoder message.
        message: String,
    },
}

impl StorageError {
    /// Creates a corruption error for the given key.
    pub fn corrupted(key: impl Into<String>, message: impl ToString) -> Self {
        Self::Corrupted {
            key: key.into(),
            message: message.to_string(),
        }
    }
}
