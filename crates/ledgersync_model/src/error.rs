//! Error types for the model crate.

use crate::types::EntityType;
use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur while encoding or decoding entities.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Failed to encode a value to canonical CBOR.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// Failed to decode canonical CBOR bytes.
    #[error("decoding failed: {0}")]
    Decoding(String),

    /// A payload decoded to an entity of a different type.
    #[error("payload type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// The entity type the caller asked for.
        expected: EntityType,
        /// The entity type found in the payload.
        found: EntityType,
    },

    /// A payload's entity id differs from the id it was filed under.
    #[error("payload id mismatch for {entity_type}")]
    IdMismatch {
        /// The entity type of the payload.
        entity_type: EntityType,
    },
}
