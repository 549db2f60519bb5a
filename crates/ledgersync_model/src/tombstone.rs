//! Deletion markers.

use crate::id::EntityId;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Records that an entity was deleted at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionMarker {
    /// The deleted entity.
    pub entity_id: EntityId,
    /// When it was deleted.
    pub deleted_at: Timestamp,
}

/// At most one deletion marker per entity id.
///
/// Merging keeps the later `deleted_at`, which makes merge commutative,
/// associative and idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<DeletionMarker>", into = "Vec<DeletionMarker>")]
pub struct TombstoneSet {
    markers: BTreeMap<EntityId, Timestamp>,
}

impl TombstoneSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a marker, keeping the later instant. Returns the effective instant.
    pub fn merge(&mut self, entity_id: EntityId, deleted_at: Timestamp) -> Timestamp {
        let slot = self.markers.entry(entity_id).or_insert(deleted_at);
        if deleted_at > *slot {
            *slot = deleted_at;
        }
        *slot
    }

    /// Returns the marker instant for an id.
    #[must_use]
    pub fn get(&self, entity_id: &EntityId) -> Option<Timestamp> {
        self.markers.get(entity_id).copied()
    }

    /// Removes a marker, returning its instant.
    pub fn remove(&mut self, entity_id: &EntityId) -> Option<Timestamp> {
        self.markers.remove(entity_id)
    }

    /// Iterates over all markers in id order.
    pub fn iter(&self) -> impl Iterator<Item = DeletionMarker> + '_ {
        self.markers.iter().map(|(id, at)| DeletionMarker {
            entity_id: *id,
            deleted_at: *at,
        })
    }

    /// Number of markers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

impl From<Vec<DeletionMarker>> for TombstoneSet {
    fn from(markers: Vec<DeletionMarker>) -> Self {
        let mut set = TombstoneSet::new();
        for marker in markers {
            set.merge(marker.entity_id, marker.deleted_at);
        }
        set
    }
}

impl From<TombstoneSet> for Vec<DeletionMarker> {
    fn from(set: TombstoneSet) -> Self {
        set.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn ts(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn id(n: u8) -> EntityId {
        EntityId::from_bytes([n; 16])
    }

    #[test]
    fn merge_keeps_later_instant() {
        let mut set = TombstoneSet::new();
        assert_eq!(set.merge(id(1), ts(20)), ts(20));
        assert_eq!(set.merge(id(1), ts(10)), ts(20));
        assert_eq!(set.merge(id(1), ts(30)), ts(30));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn duplicate_markers_collapse_on_load() {
        let markers = vec![
            DeletionMarker { entity_id: id(1), deleted_at: ts(5) },
            DeletionMarker { entity_id: id(1), deleted_at: ts(9) },
        ];
        let set = TombstoneSet::from(markers);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(&id(1)), Some(ts(9)));
    }

    #[test]
    fn json_form_is_marker_list() {
        let mut set = TombstoneSet::new();
        set.merge(id(2), ts(0));
        let json = serde_json::to_value(&set).unwrap();
        assert!(json.is_array());
        let back: TombstoneSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, set);
    }

    fn arb_set() -> impl Strategy<Value = TombstoneSet> {
        prop::collection::vec((0u8..6, 0i64..1_000), 0..12).prop_map(|pairs| {
            let mut set = TombstoneSet::new();
            for (n, secs) in pairs {
                set.merge(id(n), ts(secs));
            }
            set
        })
    }

    fn merged(mut into: TombstoneSet, from: &TombstoneSet) -> TombstoneSet {
        for marker in from.iter() {
            into.merge(marker.entity_id, marker.deleted_at);
        }
        into
    }

    proptest! {
        #[test]
        fn merge_is_commutative(a in arb_set(), b in arb_set()) {
            prop_assert_eq!(merged(a.clone(), &b), merged(b, &a));
        }

        #[test]
        fn merge_is_idempotent(a in arb_set()) {
            prop_assert_eq!(merged(a.clone(), &a), a);
        }
    }
}
