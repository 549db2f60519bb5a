//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding, decoding or validating documents.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// CBOR encoding failed.
    #[error("document encoding failed: {0}")]
    Encode(String),

    /// CBOR decoding failed.
    #[error("document decoding failed: {0}")]
    Decode(String),

    /// The document was written by an incompatible protocol version.
    #[error("unsupported protocol version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version this build understands.
        expected: u32,
        /// Version found in the document.
        found: u32,
    },

    /// A changeset does not match the file it was stored in.
    #[error("sequence mismatch: file says {expected}, document says {found}")]
    SequenceMismatch {
        /// Sequence encoded in the file name.
        expected: u64,
        /// Sequence recorded in the document.
        found: u64,
    },

    /// A changeset's recorded digest disagrees with its events.
    #[error("digest mismatch in changeset {sequence}")]
    DigestMismatch {
        /// The changeset sequence.
        sequence: u64,
    },
}
