//! The full materialized ledger.

use crate::canonical::content_hash;
use crate::collection::{Collection, DeleteOutcome, UpsertOutcome};
use crate::entity::{
    Account, AnyEntity, Budget, Category, RecurringRule, Replicable, Transaction, Transfer,
};
use crate::error::ModelResult;
use crate::id::EntityId;
use crate::types::{EntityType, Timestamp};

/// What this device currently knows about one entity id.
///
/// This is the view the conflict engine evaluates incoming events against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalState {
    /// Content hash of the live entity, if present.
    pub payload_hash: Option<String>,
    /// `updated_at` of the live entity, if present.
    pub updated_at: Option<Timestamp>,
    /// Instant of the deletion marker, if any.
    pub deleted_at: Option<Timestamp>,
}

/// One collection per replicable entity type.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    pub(crate) transactions: Collection<Transaction>,
    pub(crate) categories: Collection<Category>,
    pub(crate) accounts: Collection<Account>,
    pub(crate) budgets: Collection<Budget>,
    pub(crate) transfers: Collection<Transfer>,
    pub(crate) recurring: Collection<RecurringRule>,
}

/// Runs `$body` with `$c` bound to the collection for `$ty`.
macro_rules! with_collection {
    ($ledger:expr, $ty:expr, |$c:ident| $body:expr) => {
        match $ty {
            EntityType::Transaction => {
                let $c = &$ledger.transactions;
                $body
            }
            EntityType::Category => {
                let $c = &$ledger.categories;
                $body
            }
            EntityType::Account => {
                let $c = &$ledger.accounts;
                $body
            }
            EntityType::Budget => {
                let $c = &$ledger.budgets;
                $body
            }
            EntityType::Transfer => {
                let $c = &$ledger.transfers;
                $body
            }
            EntityType::Recurring => {
                let $c = &$ledger.recurring;
                $body
            }
        }
    };
}

fn state_of<T: Replicable>(collection: &Collection<T>, id: &EntityId) -> ModelResult<LocalState> {
    let (payload_hash, updated_at) = match collection.get(id) {
        Some(entity) => (Some(content_hash(&entity.payload()?)), Some(entity.updated_at())),
        None => (None, None),
    };
    Ok(LocalState {
        payload_hash,
        updated_at,
        deleted_at: collection.deleted_at(id),
    })
}

impl Ledger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the collection for `T`.
    #[must_use]
    pub fn collection<T: Replicable>(&self) -> &Collection<T> {
        T::collection(self)
    }

    /// Returns the collection for `T`, mutably.
    pub fn collection_mut<T: Replicable>(&mut self) -> &mut Collection<T> {
        T::collection_mut(self)
    }

    /// Returns a live entity by id.
    #[must_use]
    pub fn get<T: Replicable>(&self, id: &EntityId) -> Option<&T> {
        T::collection(self).get(id)
    }

    /// Returns the local view of an entity for conflict evaluation.
    pub fn local_state(&self, entity_type: EntityType, id: &EntityId) -> ModelResult<LocalState> {
        with_collection!(self, entity_type, |c| state_of(c, id))
    }

    /// Returns the canonical payload of a live entity.
    pub fn payload(&self, entity_type: EntityType, id: &EntityId) -> ModelResult<Option<Vec<u8>>> {
        with_collection!(self, entity_type, |c| match c.get(id) {
            Some(entity) => entity.payload().map(Some),
            None => Ok(None),
        })
    }

    /// Applies a decoded entity to its collection.
    pub fn apply_upsert(&mut self, entity: AnyEntity, force: bool) -> UpsertOutcome {
        match entity {
            AnyEntity::Transaction(e) => self.transactions.upsert(e, force),
            AnyEntity::Category(e) => self.categories.upsert(e, force),
            AnyEntity::Account(e) => self.accounts.upsert(e, force),
            AnyEntity::Budget(e) => self.budgets.upsert(e, force),
            AnyEntity::Transfer(e) => self.transfers.upsert(e, force),
            AnyEntity::Recurring(e) => self.recurring.upsert(e, force),
        }
    }

    /// Applies a deletion to the collection of `entity_type`.
    pub fn apply_delete(
        &mut self,
        entity_type: EntityType,
        id: EntityId,
        deleted_at: Timestamp,
        force: bool,
    ) -> DeleteOutcome {
        match entity_type {
            EntityType::Transaction => self.transactions.delete(id, deleted_at, force),
            EntityType::Category => self.categories.delete(id, deleted_at, force),
            EntityType::Account => self.accounts.delete(id, deleted_at, force),
            EntityType::Budget => self.budgets.delete(id, deleted_at, force),
            EntityType::Transfer => self.transfers.delete(id, deleted_at, force),
            EntityType::Recurring => self.recurring.delete(id, deleted_at, force),
        }
    }

    /// Number of live entities of a type.
    #[must_use]
    pub fn count(&self, entity_type: EntityType) -> usize {
        with_collection!(self, entity_type, |c| c.len())
    }

    /// Number of deletion markers of a type.
    #[must_use]
    pub fn tombstone_count(&self, entity_type: EntityType) -> usize {
        with_collection!(self, entity_type, |c| c.tombstones().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionKind;
    use chrono::{TimeZone, Utc};

    fn ts(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn txn(amount: i64, updated: i64) -> Transaction {
        Transaction {
            id: EntityId::from_bytes([3; 16]),
            kind: TransactionKind::Expense,
            amount,
            date: ts(0),
            category_id: EntityId::from_bytes([4; 16]),
            account_id: EntityId::from_bytes([5; 16]),
            note: None,
            created_at: ts(0),
            updated_at: ts(updated),
        }
    }

    #[test]
    fn local_state_reflects_entity_and_marker() {
        let mut ledger = Ledger::new();
        let id = EntityId::from_bytes([3; 16]);

        let empty = ledger.local_state(EntityType::Transaction, &id).unwrap();
        assert_eq!(empty, LocalState::default());

        let t = txn(1_250, 10);
        let hash = t.payload_hash().unwrap();
        ledger.apply_upsert(t.into(), false);

        let state = ledger.local_state(EntityType::Transaction, &id).unwrap();
        assert_eq!(state.payload_hash.as_deref(), Some(hash.as_str()));
        assert_eq!(state.updated_at, Some(ts(10)));
        assert_eq!(state.deleted_at, None);

        ledger.apply_delete(EntityType::Transaction, id, ts(11), false);
        let state = ledger.local_state(EntityType::Transaction, &id).unwrap();
        assert_eq!(state.payload_hash, None);
        assert_eq!(state.deleted_at, Some(ts(11)));
    }

    #[test]
    fn typed_access() {
        let mut ledger = Ledger::new();
        ledger.apply_upsert(txn(900, 1).into(), false);

        let id = EntityId::from_bytes([3; 16]);
        assert_eq!(ledger.get::<Transaction>(&id).unwrap().amount, 900);
        assert_eq!(ledger.count(EntityType::Transaction), 1);
        assert_eq!(ledger.count(EntityType::Account), 0);
        assert!(ledger
            .payload(EntityType::Transaction, &id)
            .unwrap()
            .is_some());
    }

    #[test]
    fn delete_is_scoped_to_its_type() {
        let mut ledger = Ledger::new();
        ledger.apply_upsert(txn(900, 1).into(), false);
        let id = EntityId::from_bytes([3; 16]);

        assert_eq!(
            ledger.apply_delete(EntityType::Budget, id, ts(5), false),
            DeleteOutcome::MarkerOnly
        );
        assert_eq!(ledger.count(EntityType::Transaction), 1);
        assert_eq!(ledger.tombstone_count(EntityType::Budget), 1);
    }
}
