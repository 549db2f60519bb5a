//! The remote index and changeset file naming.

use crate::codec::Versioned;
use crate::PROTOCOL_VERSION;
use ledgersync_model::Timestamp;
use serde::{Deserialize, Serialize};

/// File name of the index inside the sync root.
pub const INDEX_FILE_NAME: &str = "index.enc";

const CHANGESET_PREFIX: &str = "changeset-";
const CHANGESET_SUFFIX: &str = ".enc";

/// Returns the file name for a changeset sequence.
#[must_use]
pub fn changeset_file_name(sequence: u64) -> String {
    format!("{CHANGESET_PREFIX}{sequence:08}{CHANGESET_SUFFIX}")
}

/// A changeset file discovered through the index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChangesetRef {
    /// Sequence encoded in the file name.
    pub sequence: u64,
    /// The file name.
    pub file_name: String,
}

impl ChangesetRef {
    /// Parses a changeset file name. Returns `None` for foreign names.
    #[must_use]
    pub fn parse(file_name: &str) -> Option<Self> {
        let digits = file_name
            .strip_prefix(CHANGESET_PREFIX)?
            .strip_suffix(CHANGESET_SUFFIX)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let sequence = digits.parse().ok()?;
        Some(Self {
            sequence,
            file_name: file_name.to_string(),
        })
    }

    /// Reference for a sequence, using the canonical file name.
    #[must_use]
    pub fn for_sequence(sequence: u64) -> Self {
        Self {
            sequence,
            file_name: changeset_file_name(sequence),
        }
    }
}

/// The single remote pointer to all changesets. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteIndex {
    /// Protocol version of the document.
    pub protocol_version: u32,
    /// Highest sequence written so far.
    pub latest_sequence: u64,
    /// When the index was last rewritten.
    pub updated_at: Timestamp,
    /// Changeset file names, in upload order.
    pub changeset_file_names: Vec<String>,
}

impl RemoteIndex {
    /// An index with no changesets.
    #[must_use]
    pub fn empty(updated_at: Timestamp) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            latest_sequence: 0,
            updated_at,
            changeset_file_names: Vec::new(),
        }
    }

    /// The sequence the next changeset must use.
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.latest_sequence + 1
    }

    /// Returns a copy with one more changeset appended.
    #[must_use]
    pub fn appended(&self, sequence: u64, updated_at: Timestamp) -> Self {
        let mut names = self.changeset_file_names.clone();
        names.push(changeset_file_name(sequence));
        Self {
            protocol_version: PROTOCOL_VERSION,
            latest_sequence: sequence.max(self.latest_sequence),
            updated_at,
            changeset_file_names: names,
        }
    }

    /// Changesets with a sequence strictly greater than `watermark`,
    /// ascending. Unparseable names are skipped.
    #[must_use]
    pub fn refs_after(&self, watermark: u64) -> Vec<ChangesetRef> {
        let mut refs: Vec<ChangesetRef> = self
            .changeset_file_names
            .iter()
            .filter_map(|name| ChangesetRef::parse(name))
            .filter(|r| r.sequence > watermark)
            .collect();
        refs.sort();
        refs.dedup_by_key(|r| r.sequence);
        refs
    }

    /// Reference to the latest changeset, if any.
    #[must_use]
    pub fn latest_ref(&self) -> Option<ChangesetRef> {
        if self.latest_sequence == 0 {
            return None;
        }
        self.changeset_file_names
            .iter()
            .filter_map(|name| ChangesetRef::parse(name))
            .find(|r| r.sequence == self.latest_sequence)
            .or_else(|| Some(ChangesetRef::for_sequence(self.latest_sequence)))
    }
}

impl Versioned for RemoteIndex {
    fn protocol_version(&self) -> u32 {
        self.protocol_version
    }
}
