//! Local queue of change events not yet acknowledged remotely.

use ledgersync_model::{content_hash, EntityId, EntityType, Timestamp};
use ledgersync_protocol::{ChangeEvent, Operation};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Whether the outbox accepts new records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordMode {
    /// Local edits are recorded.
    #[default]
    Local,
    /// A remote change is being applied; records are ignored so the change
    /// is not echoed back out.
    ApplyingRemote,
}

/// A local mutation to record.
#[derive(Debug, Clone)]
pub struct Mutation {
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity id.
    pub entity_id: EntityId,
    /// Upsert or delete.
    pub operation: Operation,
    /// Canonical entity bytes, for upserts.
    pub payload: Option<Vec<u8>>,
    /// `updated_at` after the mutation.
    pub entity_updated_at: Timestamp,
    /// Deletion instant, for deletes.
    pub deleted_at: Option<Timestamp>,
    /// `updated_at` before the mutation; `None` on first creation.
    pub base_updated_at: Option<Timestamp>,
}

/// Ordered list of outstanding change events for this device.
///
/// Intermediate states of an entity stay queued until acknowledged; only an
/// exact restatement of the latest outstanding event is suppressed.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    events: Vec<ChangeEvent>,
    mode: RecordMode,
}

impl Outbox {
    /// Creates an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores an outbox from persisted events.
    pub fn from_events(events: Vec<ChangeEvent>) -> Self {
        Self {
            events,
            mode: RecordMode::Local,
        }
    }

    /// Current record mode.
    pub fn mode(&self) -> RecordMode {
        self.mode
    }

    /// Switches the record mode.
    pub fn set_mode(&mut self, mode: RecordMode) {
        self.mode = mode;
    }

    /// Records a mutation.
    ///
    /// Returns the new event, or `None` when the outbox is applying a remote
    /// change or the latest outstanding event for the entity already has the
    /// same operation, payload hash and deletion instant.
    pub fn record(
        &mut self,
        device_id: &str,
        mutation: Mutation,
        now: Timestamp,
    ) -> Option<ChangeEvent> {
        if self.mode == RecordMode::ApplyingRemote {
            return None;
        }

        let payload_hash = mutation.payload.as_deref().map(content_hash);
        if let Some(latest) = self.latest_for(mutation.entity_type, &mutation.entity_id) {
            if latest.operation == mutation.operation
                && latest.payload_hash == payload_hash
                && latest.deleted_at == mutation.deleted_at
            {
                return None;
            }
        }

        let event = ChangeEvent {
            event_id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            created_at: now,
            entity_type: mutation.entity_type,
            operation: mutation.operation,
            entity_id: mutation.entity_id,
            base_updated_at: mutation.base_updated_at,
            entity_updated_at: mutation.entity_updated_at,
            payload: mutation.payload,
            payload_hash,
            deleted_at: mutation.deleted_at,
        };
        self.events.push(event.clone());
        Some(event)
    }

    /// Drops events whose id is applied or ignored and returns the rest.
    pub fn drain(&mut self, applied: &BTreeSet<Uuid>, ignored: &BTreeSet<Uuid>) -> Vec<ChangeEvent> {
        self.events
            .retain(|e| !applied.contains(&e.event_id) && !ignored.contains(&e.event_id));
        self.events.clone()
    }

    /// Removes one event. Returns whether it was present.
    pub fn remove(&mut self, event_id: &Uuid) -> bool {
        let before = self.events.len();
        self.events.retain(|e| &e.event_id != event_id);
        self.events.len() != before
    }

    /// Removes every event for an entity. Returns the removed events.
    pub fn purge_entity(&mut self, entity_type: EntityType, entity_id: &EntityId) -> Vec<ChangeEvent> {
        let (purged, kept): (Vec<ChangeEvent>, Vec<ChangeEvent>) = std::mem::take(&mut self.events)
            .into_iter()
            .partition(|e| e.entity_type == entity_type && &e.entity_id == entity_id);
        self.events = kept;
        purged
    }

    /// Outstanding events for an entity, oldest first.
    pub fn pending_for<'a>(
        &'a self,
        entity_type: EntityType,
        entity_id: &'a EntityId,
    ) -> impl Iterator<Item = &'a ChangeEvent> + 'a {
        self.events
            .iter()
            .filter(move |e| e.entity_type == entity_type && &e.entity_id == entity_id)
    }

    /// The most recent outstanding event for an entity.
    pub fn latest_for(&self, entity_type: EntityType, entity_id: &EntityId) -> Option<&ChangeEvent> {
        self.events
            .iter()
            .rev()
            .find(|e| e.entity_type == entity_type && &e.entity_id == entity_id)
    }

    /// All outstanding events, in record order.
    pub fn events(&self) -> &[ChangeEvent] {
        &self.events
    }

    /// Number of outstanding events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ts(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn id(n: u8) -> EntityId {
        EntityId::from_bytes([n; 16])
    }

    fn upsert(n: u8, payload: &[u8], at: i64) -> Mutation {
        Mutation {
            entity_type: EntityType::Category,
            entity_id: id(n),
            operation: Operation::Upsert,
            payload: Some(payload.to_vec()),
            entity_updated_at: ts(at),
            deleted_at: None,
            base_updated_at: None,
        }
    }

    fn delete(n: u8, at: i64) -> Mutation {
        Mutation {
            entity_type: EntityType::Category,
            entity_id: id(n),
            operation: Operation::Delete,
            payload: None,
            entity_updated_at: ts(at),
            deleted_at: Some(ts(at)),
            base_updated_at: Some(ts(at - 1)),
        }
    }

    #[test]
    fn record_computes_hash() {
        let mut outbox = Outbox::new();
        let event = outbox.record("dev", upsert(1, b"a", 1), ts(1)).unwrap();
        assert_eq!(event.payload_hash, Some(content_hash(b"a")));
        assert_eq!(event.device_id, "dev");
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn identical_restatement_is_suppressed() {
        let mut outbox = Outbox::new();
        assert!(outbox.record("dev", upsert(1, b"a", 1), ts(1)).is_some());
        assert!(outbox.record("dev", upsert(1, b"a", 2), ts(2)).is_none());
        assert!(outbox.record("dev", upsert(1, b"b", 3), ts(3)).is_some());
        // Back to "a": differs from the latest, so it is kept.
        assert!(outbox.record("dev", upsert(1, b"a", 4), ts(4)).is_some());
        assert_eq!(outbox.len(), 3);

        assert!(outbox.record("dev", delete(1, 5), ts(5)).is_some());
        assert!(outbox.record("dev", delete(1, 5), ts(6)).is_none());
        assert_eq!(outbox.pending_for(EntityType::Category, &id(1)).count(), 4);
    }

    #[test]
    fn other_entities_do_not_suppress() {
        let mut outbox = Outbox::new();
        outbox.record("dev", upsert(1, b"a", 1), ts(1));
        assert!(outbox.record("dev", upsert(2, b"a", 1), ts(1)).is_some());
    }

    #[test]
    fn applying_remote_ignores_records() {
        let mut outbox = Outbox::new();
        outbox.set_mode(RecordMode::ApplyingRemote);
        assert!(outbox.record("dev", upsert(1, b"a", 1), ts(1)).is_none());
        outbox.set_mode(RecordMode::Local);
        assert!(outbox.record("dev", upsert(1, b"a", 1), ts(1)).is_some());
    }

    #[test]
    fn drain_removes_acknowledged() {
        let mut outbox = Outbox::new();
        let a = outbox.record("dev", upsert(1, b"a", 1), ts(1)).unwrap();
        let b = outbox.record("dev", upsert(2, b"b", 1), ts(1)).unwrap();
        let c = outbox.record("dev", upsert(3, b"c", 1), ts(1)).unwrap();

        let applied: BTreeSet<Uuid> = [a.event_id].into_iter().collect();
        let ignored: BTreeSet<Uuid> = [c.event_id].into_iter().collect();
        let remaining = outbox.drain(&applied, &ignored);
        assert_eq!(remaining, vec![b]);
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn purge_and_remove() {
        let mut outbox = Outbox::new();
        let a = outbox.record("dev", upsert(1, b"a", 1), ts(1)).unwrap();
        outbox.record("dev", upsert(1, b"b", 2), ts(2));
        outbox.record("dev", upsert(2, b"c", 2), ts(2));

        assert_eq!(outbox.purge_entity(EntityType::Category, &id(1)).len(), 2);
        assert!(!outbox.remove(&a.event_id));
        assert_eq!(outbox.len(), 1);
        assert!(outbox.latest_for(EntityType::Category, &id(2)).is_some());
    }
}
