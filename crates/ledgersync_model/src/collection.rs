//! Materialized collection of one entity type plus its deletion markers.

use crate::entity::Replicable;
use crate::id::EntityId;
use crate::tombstone::TombstoneSet;
use crate::types::Timestamp;
use std::collections::BTreeMap;

/// Result of offering an entity to a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The id was unknown and the entity was added.
    Inserted,
    /// An existing entity was replaced.
    Replaced,
    /// The entity was added and its deletion marker dropped.
    Resurrected,
    /// The local copy is newer; nothing changed.
    BlockedByNewerLocal,
    /// A deletion marker at or after the entity's `updated_at` wins.
    BlockedByTombstone,
}

impl UpsertOutcome {
    /// Whether the collection changed.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(
            self,
            UpsertOutcome::Inserted | UpsertOutcome::Replaced | UpsertOutcome::Resurrected
        )
    }
}

/// Result of deleting from a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The entity was removed and the marker merged.
    Removed,
    /// No entity was present; only the marker was merged.
    MarkerOnly,
    /// The local entity is newer than the deletion and survives.
    Survived,
}

/// Entities of one type keyed by id, together with the type's deletion markers.
///
/// The collection upholds tombstone precedence: an entity is present only
/// when no marker for its id has `deleted_at >= updated_at`, unless a forced
/// operation overrode the comparison.
#[derive(Debug, Clone)]
pub struct Collection<T> {
    entities: BTreeMap<EntityId, T>,
    tombstones: TombstoneSet,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            entities: BTreeMap::new(),
            tombstones: TombstoneSet::new(),
        }
    }
}

impl<T: Replicable> Collection<T> {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a collection from persisted parts.
    ///
    /// Entities shadowed by a marker are dropped.
    #[must_use]
    pub fn from_parts(entities: Vec<T>, tombstones: TombstoneSet) -> Self {
        let entities = entities
            .into_iter()
            .filter(|e| match tombstones.get(&e.id()) {
                Some(deleted_at) => e.updated_at() > deleted_at,
                None => true,
            })
            .map(|e| (e.id(), e))
            .collect();
        Self {
            entities,
            tombstones,
        }
    }

    /// Returns the entity with the given id.
    #[must_use]
    pub fn get(&self, id: &EntityId) -> Option<&T> {
        self.entities.get(id)
    }

    /// Returns the marker instant for an id.
    #[must_use]
    pub fn deleted_at(&self, id: &EntityId) -> Option<Timestamp> {
        self.tombstones.get(id)
    }

    /// Iterates over live entities in id order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entities.values()
    }

    /// Returns the deletion markers.
    #[must_use]
    pub fn tombstones(&self) -> &TombstoneSet {
        &self.tombstones
    }

    /// Number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether there are no live entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Offers an entity to the collection.
    ///
    /// Without `force`, a local copy with a strictly later `updated_at` or a
    /// marker with `deleted_at >= updated_at` blocks the write. With `force`,
    /// the entity is stored and any marker for its id is dropped.
    pub fn upsert(&mut self, entity: T, force: bool) -> UpsertOutcome {
        let id = entity.id();
        let updated_at = entity.updated_at();

        if !force {
            if let Some(local) = self.entities.get(&id) {
                if local.updated_at() > updated_at {
                    return UpsertOutcome::BlockedByNewerLocal;
                }
            }
            if let Some(deleted_at) = self.tombstones.get(&id) {
                if deleted_at >= updated_at {
                    return UpsertOutcome::BlockedByTombstone;
                }
            }
        }

        let resurrected = self.tombstones.remove(&id).is_some();
        let replaced = self.entities.insert(id, entity).is_some();
        if resurrected {
            UpsertOutcome::Resurrected
        } else if replaced {
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Inserted
        }
    }

    /// Deletes an entity by merging a marker.
    ///
    /// Without `force`, a local entity whose `updated_at` is strictly later
    /// than the merged marker survives.
    pub fn delete(&mut self, id: EntityId, deleted_at: Timestamp, force: bool) -> DeleteOutcome {
        let effective = self.tombstones.merge(id, deleted_at);
        match self.entities.get(&id) {
            None => DeleteOutcome::MarkerOnly,
            Some(local) if !force && local.updated_at() > effective => DeleteOutcome::Survived,
            Some(_) => {
                self.entities.remove(&id);
                DeleteOutcome::Removed
            }
        }
    }
}
