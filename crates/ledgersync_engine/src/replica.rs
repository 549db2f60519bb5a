//! The local replica: materialized ledger plus all sync bookkeeping.

use crate::conflict::{classify, ConflictMailbox, EventHistory, Verdict};
use crate::error::{SyncError, SyncResult};
use crate::log::{LogEntry, LogLevel, SyncLog};
use crate::outbox::{Mutation, Outbox, RecordMode};
use ledgersync_model::{
    content_hash, Account, AnyEntity, Budget, Category, Collection, DeleteOutcome, EntityId,
    EntityType, Ledger, RecurringRule, Replicable, Timestamp, TombstoneSet, Transaction, Transfer,
    UpsertOutcome,
};
use ledgersync_protocol::{ChangeEvent, Changeset, ConflictRecord, Operation, Resolution};
use ledgersync_storage::{StateStore, StateStoreExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const OUTBOX_KEY: &str = "sync/outbox.json";
const APPLIED_KEY: &str = "sync/applied.json";
const IGNORED_KEY: &str = "sync/ignored.json";
const CONFLICTS_KEY: &str = "sync/conflicts.json";
const WATERMARKS_KEY: &str = "sync/watermarks.json";
const LOG_KEY: &str = "sync/log.json";

fn entities_key(entity_type: EntityType) -> String {
    format!("ledger/{}.json", entity_type.collection_name())
}

fn tombstones_key(entity_type: EntityType) -> String {
    format!("ledger/{}.tombstones.json", entity_type.collection_name())
}

/// What happened to the events of one changeset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Events applied to local state.
    pub applied: usize,
    /// Events consumed without changing local state because a newer local
    /// copy or deletion marker won.
    pub blocked: usize,
    /// Events whose content already matched local state.
    pub acknowledged: usize,
    /// Our own events coming back.
    pub echoes: usize,
    /// Events seen before or already waiting in the mailbox.
    pub skipped: usize,
    /// Conflicts filed by this changeset.
    pub conflicts: Vec<Uuid>,
}

impl ApplyReport {
    /// Adds another report's counts to this one.
    pub fn merge(&mut self, other: ApplyReport) {
        self.applied += other.applied;
        self.blocked += other.blocked;
        self.acknowledged += other.acknowledged;
        self.echoes += other.echoes;
        self.skipped += other.skipped;
        self.conflicts.extend(other.conflicts);
    }
}

/// Result of forcing or offering a remote event to the ledger.
enum Applied {
    Upsert(UpsertOutcome),
    Delete(DeleteOutcome),
}

impl Applied {
    fn changed(&self) -> bool {
        match self {
            Applied::Upsert(outcome) => outcome.is_applied(),
            Applied::Delete(outcome) => *outcome != DeleteOutcome::Survived,
        }
    }

    /// Whether the collection must be saved. A delete always merges its
    /// marker, even when the local entity survives.
    fn needs_save(&self) -> bool {
        match self {
            Applied::Upsert(outcome) => outcome.is_applied(),
            Applied::Delete(_) => true,
        }
    }
}

/// Local state of one device.
///
/// All mutations of entities, deletion markers, the outbox and the conflict
/// mailbox go through this type, and each one is persisted before the call
/// returns. The replica is not shared between threads directly; the session
/// wraps it in a mutex that is never held across an await point.
pub struct Replica {
    store: Arc<dyn StateStore>,
    device_id: String,
    ledger: Ledger,
    outbox: Outbox,
    history: EventHistory,
    mailbox: ConflictMailbox,
    watermarks: BTreeMap<String, u64>,
    log: SyncLog,
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("device_id", &self.device_id)
            .field("outbox", &self.outbox.len())
            .field("conflicts", &self.mailbox.len())
            .finish_non_exhaustive()
    }
}

fn load_collection<T: Replicable>(store: &dyn StateStore, ledger: &mut Ledger) -> SyncResult<()> {
    let entities: Vec<T> = store
        .load_json(&entities_key(T::ENTITY_TYPE))?
        .unwrap_or_default();
    let tombstones: TombstoneSet = store
        .load_json(&tombstones_key(T::ENTITY_TYPE))?
        .unwrap_or_default();
    *ledger.collection_mut::<T>() = Collection::from_parts(entities, tombstones);
    Ok(())
}

fn save_collection<T: Replicable>(store: &dyn StateStore, ledger: &Ledger) -> SyncResult<()> {
    let collection = ledger.collection::<T>();
    let entities: Vec<&T> = collection.iter().collect();
    store.save_json(&entities_key(T::ENTITY_TYPE), &entities)?;
    store.save_json(&tombstones_key(T::ENTITY_TYPE), collection.tombstones())?;
    Ok(())
}

fn save_collection_of(
    store: &dyn StateStore,
    ledger: &Ledger,
    entity_type: EntityType,
) -> SyncResult<()> {
    match entity_type {
        EntityType::Transaction => save_collection::<Transaction>(store, ledger),
        EntityType::Category => save_collection::<Category>(store, ledger),
        EntityType::Account => save_collection::<Account>(store, ledger),
        EntityType::Budget => save_collection::<Budget>(store, ledger),
        EntityType::Transfer => save_collection::<Transfer>(store, ledger),
        EntityType::Recurring => save_collection::<RecurringRule>(store, ledger),
    }
}

/// Checks that an upsert event carries a payload that decodes to the entity
/// it claims to describe.
fn decode_payload(event: &ChangeEvent) -> SyncResult<AnyEntity> {
    let payload = event.payload.as_deref().ok_or_else(|| {
        SyncError::FormatMismatch(format!("upsert event {} has no payload", event.event_id))
    })?;
    if let Some(hash) = &event.payload_hash {
        if &content_hash(payload) != hash {
            return Err(SyncError::FormatMismatch(format!(
                "payload hash mismatch in event {}",
                event.event_id
            )));
        }
    }
    let entity = AnyEntity::decode(event.entity_type, payload)
        .map_err(|e| SyncError::FormatMismatch(format!("event {}: {e}", event.event_id)))?;
    entity
        .expect_identity(event.entity_type, event.entity_id)
        .map_err(|e| SyncError::FormatMismatch(format!("event {}: {e}", event.event_id)))?;
    Ok(entity)
}

impl Replica {
    /// Opens the replica stored in `store`, creating empty state on first use.
    pub fn open(
        store: Arc<dyn StateStore>,
        device_id: impl Into<String>,
        log_capacity: usize,
    ) -> SyncResult<Self> {
        let mut ledger = Ledger::new();
        load_collection::<Transaction>(store.as_ref(), &mut ledger)?;
        load_collection::<Category>(store.as_ref(), &mut ledger)?;
        load_collection::<Account>(store.as_ref(), &mut ledger)?;
        load_collection::<Budget>(store.as_ref(), &mut ledger)?;
        load_collection::<Transfer>(store.as_ref(), &mut ledger)?;
        load_collection::<RecurringRule>(store.as_ref(), &mut ledger)?;

        let outbox = Outbox::from_events(store.load_json(OUTBOX_KEY)?.unwrap_or_default());
        let history = EventHistory {
            applied: store.load_json(APPLIED_KEY)?.unwrap_or_default(),
            ignored: store.load_json(IGNORED_KEY)?.unwrap_or_default(),
        };
        let mailbox: ConflictMailbox = store.load_json(CONFLICTS_KEY)?.unwrap_or_default();
        let watermarks = store.load_json(WATERMARKS_KEY)?.unwrap_or_default();
        let mut log: SyncLog = store
            .load_json(LOG_KEY)?
            .unwrap_or_else(|| SyncLog::new(log_capacity));
        log.set_capacity(log_capacity);

        let device_id = device_id.into();
        debug!(
            device_id = %device_id,
            outbox = outbox.len(),
            conflicts = mailbox.len(),
            "opened replica"
        );
        Ok(Self {
            store,
            device_id,
            ledger,
            outbox,
            history,
            mailbox,
            watermarks,
            log,
        })
    }

    /// This device's id.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The materialized ledger.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Outstanding local events.
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Consumed remote event ids.
    pub fn history(&self) -> &EventHistory {
        &self.history
    }

    /// Pending conflicts, oldest first.
    pub fn conflicts(&self) -> &[ConflictRecord] {
        self.mailbox.records()
    }

    /// Looks up a pending conflict by id or unique id prefix.
    pub fn find_conflict(&self, query: &str) -> Option<&ConflictRecord> {
        self.mailbox.find(query)
    }

    /// Last processed sequence for an endpoint key.
    pub fn watermark(&self, endpoint_key: &str) -> u64 {
        self.watermarks.get(endpoint_key).copied().unwrap_or(0)
    }

    /// Records the last processed sequence for an endpoint key.
    pub fn set_watermark(&mut self, endpoint_key: &str, sequence: u64) -> SyncResult<()> {
        self.watermarks.insert(endpoint_key.to_string(), sequence);
        self.store.save_json(WATERMARKS_KEY, &self.watermarks)?;
        Ok(())
    }

    /// Log entries, oldest first.
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.log.entries()
    }

    /// Appends a log entry and persists the log.
    ///
    /// Persistence failures are reported through `tracing` only.
    pub fn note(&mut self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => info!(target: "ledgersync::sync_log", "{message}"),
            LogLevel::Warning | LogLevel::Error => {
                warn!(target: "ledgersync::sync_log", level = ?level, "{message}")
            }
        }
        self.log.push(level, message);
        if let Err(e) = self.store.save_json(LOG_KEY, &self.log) {
            warn!(error = %e, "failed to persist sync log");
        }
    }

    /// Removes every log entry.
    pub fn clear_log(&mut self) -> SyncResult<()> {
        self.log.clear();
        self.store.save_json(LOG_KEY, &self.log)?;
        Ok(())
    }

    fn save_outbox(&self) -> SyncResult<()> {
        self.store.save_json(OUTBOX_KEY, self.outbox.events())?;
        Ok(())
    }

    fn save_history(&self) -> SyncResult<()> {
        self.store.save_json(APPLIED_KEY, &self.history.applied)?;
        self.store.save_json(IGNORED_KEY, &self.history.ignored)?;
        Ok(())
    }

    fn save_mailbox(&self) -> SyncResult<()> {
        self.store.save_json(CONFLICTS_KEY, &self.mailbox)?;
        Ok(())
    }

    fn save_types(&self, types: &BTreeSet<EntityType>) -> SyncResult<()> {
        for entity_type in types {
            save_collection_of(self.store.as_ref(), &self.ledger, *entity_type)?;
        }
        Ok(())
    }

    /// Persists a local edit: the outbox first, then the entity's collection.
    ///
    /// On failure the in-memory collection and outbox are put back to
    /// `previous`, so an edit is either saved with its outbox event or not
    /// at all. If the collection write fails after the outbox was saved, the
    /// previous collection and outbox are written back. Should that also
    /// fail, the stored state may keep part of the edit.
    fn commit_local_edit<T: Replicable>(
        &mut self,
        previous: (Collection<T>, Outbox),
    ) -> SyncResult<()> {
        let (collection, outbox) = previous;
        if let Err(e) = self.save_outbox() {
            *self.ledger.collection_mut::<T>() = collection;
            self.outbox = outbox;
            return Err(e);
        }
        if let Err(e) = save_collection::<T>(self.store.as_ref(), &self.ledger) {
            *self.ledger.collection_mut::<T>() = collection;
            self.outbox = outbox;
            if let Err(restore) = self
                .save_outbox()
                .and_then(|()| save_collection::<T>(self.store.as_ref(), &self.ledger))
            {
                warn!(error = %restore, "stored state keeps part of an unsaved local edit");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Creates or updates an entity from a local edit and records it in the
    /// outbox.
    ///
    /// The caller sets `updated_at`. A local copy with a later `updated_at`
    /// or a deletion marker at or after it blocks the edit, and nothing is
    /// recorded.
    pub fn upsert<T: Replicable>(&mut self, entity: T, now: Timestamp) -> SyncResult<UpsertOutcome> {
        let id = entity.id();
        let base_updated_at = self.ledger.get::<T>(&id).map(Replicable::updated_at);
        let payload = entity.payload()?;
        let entity_updated_at = entity.updated_at();

        let previous = (self.ledger.collection::<T>().clone(), self.outbox.clone());
        let outcome = self.ledger.collection_mut::<T>().upsert(entity, false);
        if !outcome.is_applied() {
            debug!(entity = %id, ?outcome, "local upsert blocked");
            return Ok(outcome);
        }

        self.outbox.record(
            &self.device_id,
            Mutation {
                entity_type: T::ENTITY_TYPE,
                entity_id: id,
                operation: Operation::Upsert,
                payload: Some(payload),
                entity_updated_at,
                deleted_at: None,
                base_updated_at,
            },
            now,
        );
        self.commit_local_edit(previous)?;
        Ok(outcome)
    }

    /// Deletes an entity from a local edit and records it in the outbox.
    ///
    /// Returns `false` when the entity does not exist or was updated after
    /// `deleted_at`.
    pub fn delete<T: Replicable>(
        &mut self,
        id: EntityId,
        deleted_at: Timestamp,
        now: Timestamp,
    ) -> SyncResult<bool> {
        let Some(base_updated_at) = self.ledger.get::<T>(&id).map(Replicable::updated_at) else {
            return Ok(false);
        };
        if base_updated_at > deleted_at {
            return Ok(false);
        }

        let previous = (self.ledger.collection::<T>().clone(), self.outbox.clone());
        self.ledger
            .collection_mut::<T>()
            .delete(id, deleted_at, false);
        self.outbox.record(
            &self.device_id,
            Mutation {
                entity_type: T::ENTITY_TYPE,
                entity_id: id,
                operation: Operation::Delete,
                payload: None,
                entity_updated_at: deleted_at,
                deleted_at: Some(deleted_at),
                base_updated_at: Some(base_updated_at),
            },
            now,
        );
        self.commit_local_edit(previous)?;
        Ok(true)
    }

    /// Drops acknowledged events from the outbox and returns the rest.
    pub fn pending_events(&mut self) -> SyncResult<Vec<ChangeEvent>> {
        let before = self.outbox.len();
        let events = self
            .outbox
            .drain(&self.history.applied, &self.history.ignored);
        if events.len() != before {
            self.save_outbox()?;
        }
        Ok(events)
    }

    fn apply_event(&mut self, event: &ChangeEvent, force: bool) -> SyncResult<Applied> {
        Ok(match event.operation {
            Operation::Upsert => {
                let entity = decode_payload(event)?;
                Applied::Upsert(self.ledger.apply_upsert(entity, force))
            }
            Operation::Delete => {
                let deleted_at = event.deleted_at.unwrap_or(event.entity_updated_at);
                Applied::Delete(self.ledger.apply_delete(
                    event.entity_type,
                    event.entity_id,
                    deleted_at,
                    force,
                ))
            }
        })
    }

    fn apply_events(
        &mut self,
        changeset: &Changeset,
        now: Timestamp,
        touched: &mut BTreeSet<EntityType>,
    ) -> SyncResult<ApplyReport> {
        let mut report = ApplyReport::default();

        for event in &changeset.changes {
            let local = self.ledger.local_state(event.entity_type, &event.entity_id)?;
            let verdict = classify(
                event,
                &self.device_id,
                &self.history,
                &self.mailbox,
                &local,
                &self.outbox,
            );
            debug!(
                event = %event.event_id,
                entity = %event.entity_id,
                ?verdict,
                "classified remote event"
            );

            match verdict {
                Verdict::AlreadyProcessed | Verdict::AlreadyPending => report.skipped += 1,
                Verdict::Echo => {
                    self.history.mark_applied(event.event_id);
                    self.outbox.remove(&event.event_id);
                    report.echoes += 1;
                }
                Verdict::Acknowledge => {
                    self.history.mark_applied(event.event_id);
                    let matching: Vec<Uuid> = self
                        .outbox
                        .pending_for(event.entity_type, &event.entity_id)
                        .filter(|pending| pending.same_mutation(event))
                        .map(|pending| pending.event_id)
                        .collect();
                    for event_id in matching {
                        self.outbox.remove(&event_id);
                    }
                    report.acknowledged += 1;
                }
                Verdict::Conflict => {
                    let record = ConflictRecord::new(
                        now,
                        event.clone(),
                        self.ledger.payload(event.entity_type, &event.entity_id)?,
                        local.updated_at,
                        local.deleted_at,
                    );
                    report.conflicts.push(record.id);
                    self.note(
                        LogLevel::Warning,
                        format!("conflict: {}", record.summary()),
                    );
                    self.mailbox.push(record);
                }
                Verdict::Apply => {
                    let applied = self.apply_event(event, false)?;
                    self.history.mark_applied(event.event_id);
                    if applied.needs_save() {
                        touched.insert(event.entity_type);
                    }
                    if applied.changed() {
                        report.applied += 1;
                    } else {
                        report.blocked += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    /// Runs every event of a remote changeset through the conflict engine.
    ///
    /// Upsert payloads are validated before anything is applied, so a
    /// corrupt changeset fails with [`SyncError::FormatMismatch`] and leaves
    /// local state untouched. The outbox ignores records while the changeset
    /// is being applied.
    pub fn apply_changeset(
        &mut self,
        changeset: &Changeset,
        now: Timestamp,
    ) -> SyncResult<ApplyReport> {
        for event in &changeset.changes {
            if event.operation == Operation::Upsert && !self.history.is_processed(&event.event_id) {
                decode_payload(event)?;
            }
        }

        let previous = self.outbox.mode();
        self.outbox.set_mode(RecordMode::ApplyingRemote);
        let mut touched = BTreeSet::new();
        let result = self.apply_events(changeset, now, &mut touched);
        self.outbox.set_mode(previous);

        // Persist whatever was applied, even if a later event failed.
        self.save_types(&touched)?;
        self.save_outbox()?;
        self.save_history()?;
        self.save_mailbox()?;

        let report = result?;
        info!(
            sequence = changeset.sequence,
            from = %changeset.device_id,
            applied = report.applied,
            conflicts = report.conflicts.len(),
            "applied changeset"
        );
        Ok(report)
    }

    /// Settles a pending conflict.
    ///
    /// `UseLocal` marks the remote event ignored and applied and leaves local
    /// state alone. `UseRemote` force-applies the remote event, marks it
    /// applied and purges the entity's outbox events so the overwritten local
    /// edit is never pushed.
    pub fn resolve(&mut self, query: &str, resolution: Resolution) -> SyncResult<ConflictRecord> {
        let record = self
            .find_conflict(query)
            .cloned()
            .ok_or_else(|| SyncError::UnknownConflict(query.to_string()))?;
        let id = record.id;
        let event = &record.remote_event;

        match resolution {
            Resolution::UseLocal => {
                self.history.mark_ignored(event.event_id);
                self.history.mark_applied(event.event_id);
            }
            Resolution::UseRemote => {
                let previous = self.outbox.mode();
                self.outbox.set_mode(RecordMode::ApplyingRemote);
                let applied = self.apply_event(event, true);
                self.outbox.set_mode(previous);
                applied?;

                self.history.mark_applied(event.event_id);
                let purged = self.outbox.purge_entity(event.entity_type, &event.entity_id);
                debug!(purged = purged.len(), "purged overwritten local events");
                save_collection_of(self.store.as_ref(), &self.ledger, event.entity_type)?;
                self.save_outbox()?;
            }
        }

        self.mailbox.remove(&id);
        self.save_history()?;
        self.save_mailbox()?;
        self.note(
            LogLevel::Info,
            format!("resolved {} {} using {resolution}", record.entity_type, record.entity_id.short()),
        );
        Ok(record)
    }
}
