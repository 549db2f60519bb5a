//! Changesets and their digest.

use crate::codec::Versioned;
use crate::error::{ProtocolError, ProtocolResult};
use crate::event::ChangeEvent;
use crate::PROTOCOL_VERSION;
use ledgersync_model::Timestamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Computes the digest of an ordered batch of events.
///
/// The digest is the lowercase hex SHA-256 over each event signature
/// followed by a newline. Two batches with the same digest restate the
/// same mutations in the same order.
#[must_use]
pub fn digest(events: &[ChangeEvent]) -> String {
    let mut hasher = Sha256::new();
    for event in events {
        hasher.update(event.signature().as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// An immutable, sequence-numbered batch of change events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Changeset {
    /// Protocol version of the document.
    pub protocol_version: u32,
    /// Position in the remote log, starting at 1.
    pub sequence: u64,
    /// Device that uploaded the changeset.
    pub device_id: String,
    /// Upload instant.
    pub created_at: Timestamp,
    /// Digest of `changes`.
    pub digest: String,
    /// The events, in outbox order.
    pub changes: Vec<ChangeEvent>,
}

impl Changeset {
    /// Builds a changeset and computes its digest.
    #[must_use]
    pub fn new(
        sequence: u64,
        device_id: impl Into<String>,
        created_at: Timestamp,
        changes: Vec<ChangeEvent>,
    ) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            sequence,
            device_id: device_id.into(),
            created_at,
            digest: digest(&changes),
            changes,
        }
    }

    /// Checks that the changeset belongs at `expected_sequence` and that its
    /// recorded digest matches its events.
    pub fn verify(&self, expected_sequence: u64) -> ProtocolResult<()> {
        if self.sequence != expected_sequence {
            return Err(ProtocolError::SequenceMismatch {
                expected: expected_sequence,
                found: self.sequence,
            });
        }
        if digest(&self.changes) != self.digest {
            return Err(ProtocolError::DigestMismatch {
                sequence: self.sequence,
            });
        }
        Ok(())
    }
}

impl Versioned for Changeset {
    fn protocol_version(&self) -> u32 {
        self.protocol_version
    }
}
