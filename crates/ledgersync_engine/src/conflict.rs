//! Conflict detection for incoming remote events.
//!
//! Every remote event is classified against the local view of its entity
//! before anything is applied:
//!
//! 1. Already applied or ignored by this device: skip.
//! 2. Produced by this device (an echo of our own push): acknowledge.
//! 3. Already waiting in the mailbox: skip.
//! 4. Content-identical upsert, or a delete no later than the local
//!    deletion: acknowledge without touching local state.
//! 5. A differing outstanding local event for the entity, or local state
//!    newer than the event's base: conflict.
//! 6. Otherwise the event descends from what we last saw: apply.
//!
//! Classification never fails; every event ends in one of these verdicts.

use crate::outbox::Outbox;
use ledgersync_model::LocalState;
use ledgersync_protocol::{ChangeEvent, ConflictRecord, Operation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Remote event ids this device has consumed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHistory {
    /// Events applied or acknowledged.
    pub applied: BTreeSet<Uuid>,
    /// Events explicitly rejected by a `useLocal` resolution.
    pub ignored: BTreeSet<Uuid>,
}

impl EventHistory {
    /// Whether the event was applied or ignored.
    pub fn is_processed(&self, event_id: &Uuid) -> bool {
        self.applied.contains(event_id) || self.ignored.contains(event_id)
    }

    /// Marks an event applied.
    pub fn mark_applied(&mut self, event_id: Uuid) {
        self.applied.insert(event_id);
    }

    /// Marks an event ignored.
    pub fn mark_ignored(&mut self, event_id: Uuid) {
        self.ignored.insert(event_id);
    }
}

/// Outcome of classifying one remote event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Seen before; nothing to do.
    AlreadyProcessed,
    /// Our own event coming back; mark applied and drop it from the outbox.
    Echo,
    /// A conflict for this event is already in the mailbox.
    AlreadyPending,
    /// Local state already matches; mark applied and drop matching outbox events.
    Acknowledge,
    /// Local state diverged; file a conflict record.
    Conflict,
    /// Apply the event to local state.
    Apply,
}

/// Classifies a remote event against local state.
pub fn classify(
    event: &ChangeEvent,
    device_id: &str,
    history: &EventHistory,
    mailbox: &ConflictMailbox,
    local: &LocalState,
    outbox: &Outbox,
) -> Verdict {
    if history.is_processed(&event.event_id) {
        return Verdict::AlreadyProcessed;
    }
    if event.device_id == device_id {
        return Verdict::Echo;
    }
    if mailbox.contains_event(&event.event_id) {
        return Verdict::AlreadyPending;
    }

    match event.operation {
        Operation::Upsert => {
            if event.payload_hash.is_some() && event.payload_hash == local.payload_hash {
                return Verdict::Acknowledge;
            }
        }
        Operation::Delete => {
            let remote_deleted_at = event.deleted_at.unwrap_or(event.entity_updated_at);
            if matches!(local.deleted_at, Some(local_deleted_at) if remote_deleted_at <= local_deleted_at)
            {
                return Verdict::Acknowledge;
            }
        }
    }

    let diverging_local_edit = outbox
        .pending_for(event.entity_type, &event.entity_id)
        .any(|pending| !pending.same_mutation(event));
    if diverging_local_edit {
        return Verdict::Conflict;
    }

    if let Some(base) = event.base_updated_at {
        let newer_than_base = |at: Option<_>| matches!(at, Some(at) if at > base);
        if newer_than_base(local.updated_at) || newer_than_base(local.deleted_at) {
            return Verdict::Conflict;
        }
    }

    Verdict::Apply
}

/// Unresolved conflicts awaiting a user decision. Records never expire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictMailbox {
    records: Vec<ConflictRecord>,
}

impl ConflictMailbox {
    /// Creates an empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a record for this remote event exists.
    pub fn contains_event(&self, event_id: &Uuid) -> bool {
        self.records.iter().any(|r| &r.remote_event.event_id == event_id)
    }

    /// Adds a record.
    pub fn push(&mut self, record: ConflictRecord) {
        self.records.push(record);
    }

    /// Looks up a record by conflict id.
    pub fn get(&self, id: &Uuid) -> Option<&ConflictRecord> {
        self.records.iter().find(|r| &r.id == id)
    }

    /// Finds a record by conflict id or by a unique id prefix.
    pub fn find(&self, query: &str) -> Option<&ConflictRecord> {
        if let Ok(id) = query.parse::<Uuid>() {
            return self.get(&id);
        }
        let query = query.to_ascii_lowercase();
        let mut matches = self
            .records
            .iter()
            .filter(|r| r.id.to_string().starts_with(&query));
        match (matches.next(), matches.next()) {
            (Some(record), None) => Some(record),
            _ => None,
        }
    }

    /// Removes and returns a record.
    pub fn remove(&mut self, id: &Uuid) -> Option<ConflictRecord> {
        let pos = self.records.iter().position(|r| &r.id == id)?;
        Some(self.records.remove(pos))
    }

    /// All records, oldest first.
    pub fn records(&self) -> &[ConflictRecord] {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether there are no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
