//! Error types for the sync engine.

use ledgersync_model::ModelError;
use ledgersync_protocol::ProtocolError;
use ledgersync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Missing host, path or key. The user has to fix the settings.
    #[error("sync configuration invalid: {0}")]
    ConfigurationInvalid(String),

    /// Network failure or unexpected HTTP status.
    #[error("{}", transport_message(*status, message))]
    Transport {
        /// HTTP status, if a response was received.
        status: Option<u16>,
        /// Error message.
        message: String,
    },

    /// The server rejected the credentials (401).
    #[error("authentication failed (check username and password)")]
    Unauthorized,

    /// The server refused access (403).
    #[error("access forbidden (403)")]
    Forbidden,

    /// Wrong key or corrupted remote data.
    #[error("decryption failed (wrong encryption key or corrupted data)")]
    DecryptionFailed,

    /// Remote state is inconsistent with the protocol.
    #[error("remote format mismatch: {0}")]
    FormatMismatch(String),

    /// Encoding or decoding failure of a well-formed document.
    #[error("codec error: {0}")]
    Codec(String),

    /// Entity model error.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Local persistence error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// No pending conflict matches the given id.
    #[error("no pending conflict matches {0}")]
    UnknownConflict(String),

    /// Sync was disabled while the operation was running.
    #[error("sync cancelled")]
    Cancelled,
}

fn transport_message(status: Option<u16>, message: &str) -> String {
    match (status, message.is_empty()) {
        (Some(code), true) => format!("request failed (HTTP {code})"),
        (Some(code), false) => format!("request failed (HTTP {code}): {message}"),
        (None, _) => format!("network error: {message}"),
    }
}

impl SyncError {
    /// Creates a transport error for a received HTTP status.
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::Transport {
            status: Some(code),
            message: message.into(),
        }
    }

    /// Creates a transport error for a failure without a response.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: message.into(),
        }
    }

    /// Returns true if the next trigger may retry the operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { status, .. } => !matches!(status, Some(401) | Some(403)),
            _ => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Encode(msg) => SyncError::Codec(msg),
            other => SyncError::FormatMismatch(other.to_string()),
        }
    }
}
