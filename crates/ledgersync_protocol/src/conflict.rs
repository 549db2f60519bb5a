//! Conflict records and their resolution.

use crate::event::ChangeEvent;
use ledgersync_model::{EntityId, EntityType, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// How a pending conflict is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    /// Keep local state; the remote event is never reconsidered.
    UseLocal,
    /// Force-apply the remote event and drop the overwritten local edit.
    UseRemote,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resolution::UseLocal => "local",
            Resolution::UseRemote => "remote",
        })
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" | "useLocal" => Ok(Resolution::UseLocal),
            "remote" | "useRemote" => Ok(Resolution::UseRemote),
            other => Err(format!("unknown resolution: {other}")),
        }
    }
}

/// A remote event that could not be applied automatically.
///
/// Captures the local side as it was when the conflict was detected.
/// Records live in the local mailbox until resolved and never expire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    /// Conflict id.
    pub id: Uuid,
    /// Detection instant.
    pub detected_at: Timestamp,
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity id.
    pub entity_id: EntityId,
    /// The incoming event.
    pub remote_event: ChangeEvent,
    /// Local canonical payload at detection time.
    #[serde(default)]
    pub local_payload: Option<Vec<u8>>,
    /// Local `updated_at` at detection time.
    pub local_updated_at: Option<Timestamp>,
    /// Local deletion instant at detection time.
    pub local_deleted_at: Option<Timestamp>,
}

impl ConflictRecord {
    /// Creates a record for `remote_event` with a fresh id.
    #[must_use]
    pub fn new(
        detected_at: Timestamp,
        remote_event: ChangeEvent,
        local_payload: Option<Vec<u8>>,
        local_updated_at: Option<Timestamp>,
        local_deleted_at: Option<Timestamp>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            detected_at,
            entity_type: remote_event.entity_type,
            entity_id: remote_event.entity_id,
            remote_event,
            local_payload,
            local_updated_at,
            local_deleted_at,
        }
    }

    /// One-line summary for listings and logs.
    #[must_use]
    pub fn summary(&self) -> String {
        let local = match (self.local_updated_at, self.local_deleted_at) {
            (Some(_), _) => "edited",
            (None, Some(_)) => "deleted",
            (None, None) => "absent",
        };
        format!(
            "{} {} remote {} from {} vs local {}",
            self.entity_type,
            self.entity_id.short(),
            self.remote_event.operation.as_str(),
            self.remote_event.device_id,
            local
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::tests::{ts, upsert_event};

    #[test]
    fn record_copies_identity_from_event() {
        let event = upsert_event(1, "aa");
        let record = ConflictRecord::new(ts(200), event.clone(), None, Some(ts(150)), None);
        assert_eq!(record.entity_type, event.entity_type);
        assert_eq!(record.entity_id, event.entity_id);
        assert_eq!(
            record.summary(),
            "transaction 09090909 remote upsert from device-a vs local edited"
        );
    }

    #[test]
    fn resolution_parse() {
        assert_eq!("local".parse::<Resolution>().unwrap(), Resolution::UseLocal);
        assert_eq!("useRemote".parse::<Resolution>().unwrap(), Resolution::UseRemote);
        assert!("both".parse::<Resolution>().is_err());
    }
}
