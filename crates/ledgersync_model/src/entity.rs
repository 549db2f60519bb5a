//! The replicable ledger entities.

use crate::canonical::{content_hash, decode_canonical, encode_canonical};
use crate::collection::Collection;
use crate::error::{ModelError, ModelResult};
use crate::id::EntityId;
use crate::ledger::Ledger;
use crate::types::{AccountKind, EntityType, Frequency, Timestamp, TransactionKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Behaviour shared by every replicable aggregate.
///
/// `created_at` is immutable after creation. `updated_at` is bumped by the
/// owning component on every mutation and is what deletion markers and the
/// newer-wins guard compare against.
pub trait Replicable: Clone + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync {
    /// The entity type tag carried in change events.
    const ENTITY_TYPE: EntityType;

    /// Returns the entity id.
    fn id(&self) -> EntityId;

    /// Returns the creation instant.
    fn created_at(&self) -> Timestamp;

    /// Returns the last mutation instant.
    fn updated_at(&self) -> Timestamp;

    /// Returns this type's collection inside a ledger.
    fn collection(ledger: &Ledger) -> &Collection<Self>;

    /// Returns this type's collection inside a ledger, mutably.
    fn collection_mut(ledger: &mut Ledger) -> &mut Collection<Self>;

    /// Returns the canonical payload bytes.
    fn payload(&self) -> ModelResult<Vec<u8>> {
        encode_canonical(self)
    }

    /// Returns the content hash of the canonical payload.
    fn payload_hash(&self) -> ModelResult<String> {
        Ok(content_hash(&self.payload()?))
    }
}

/// A single income or expense entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Entity id.
    pub id: EntityId,
    /// Income or expense.
    pub kind: TransactionKind,
    /// Amount in minor currency units.
    pub amount: i64,
    /// Booking date.
    pub date: Timestamp,
    /// Category id.
    pub category_id: EntityId,
    /// Account id.
    pub account_id: EntityId,
    /// Free-form note.
    pub note: Option<String>,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Last mutation instant.
    pub updated_at: Timestamp,
}

/// A transaction category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    /// Entity id.
    pub id: EntityId,
    /// Income or expense.
    pub kind: TransactionKind,
    /// Display name.
    pub name: String,
    /// Icon identifier.
    pub icon_name: String,
    /// Position among categories of the same kind.
    pub sort_order: i32,
    /// Whether the category shipped with the application.
    pub is_default: bool,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Last mutation instant.
    pub updated_at: Timestamp,
}

/// A money account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Entity id.
    pub id: EntityId,
    /// Display name.
    pub name: String,
    /// Cash, bank or credit.
    pub kind: AccountKind,
    /// Opening balance in minor currency units.
    pub initial_balance: i64,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Last mutation instant.
    pub updated_at: Timestamp,
}

/// A monthly limit, optionally scoped to one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    /// Entity id.
    pub id: EntityId,
    /// First instant of the budgeted month.
    pub month: Timestamp,
    /// Income or expense.
    pub kind: TransactionKind,
    /// Category the limit applies to; `None` for the whole month.
    pub category_id: Option<EntityId>,
    /// Limit in minor currency units.
    pub limit: i64,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Last mutation instant.
    pub updated_at: Timestamp,
}

/// A movement of money between two accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    /// Entity id.
    pub id: EntityId,
    /// Amount in minor currency units.
    pub amount: i64,
    /// Booking date.
    pub date: Timestamp,
    /// Source account.
    pub from_account_id: EntityId,
    /// Destination account.
    pub to_account_id: EntityId,
    /// Free-form note.
    pub note: Option<String>,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Last mutation instant.
    pub updated_at: Timestamp,
}

/// A rule that generates transactions on a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringRule {
    /// Entity id.
    pub id: EntityId,
    /// Income or expense.
    pub kind: TransactionKind,
    /// Amount in minor currency units.
    pub amount: i64,
    /// Category of generated transactions.
    pub category_id: EntityId,
    /// Account of generated transactions.
    pub account_id: EntityId,
    /// Note copied to generated transactions.
    pub note: Option<String>,
    /// Repetition period.
    pub frequency: Frequency,
    /// First occurrence.
    pub start_date: Timestamp,
    /// Last possible occurrence.
    pub end_date: Option<Timestamp>,
    /// When the rule last produced a transaction.
    pub last_generated_at: Option<Timestamp>,
    /// Whether the rule is active.
    pub is_enabled: bool,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Last mutation instant.
    pub updated_at: Timestamp,
}

macro_rules! replicable {
    ($ty:ident, $tag:ident, $field:ident) => {
        impl Replicable for $ty {
            const ENTITY_TYPE: EntityType = EntityType::$tag;

            fn id(&self) -> EntityId {
                self.id
            }

            fn created_at(&self) -> Timestamp {
                self.created_at
            }

            fn updated_at(&self) -> Timestamp {
                self.updated_at
            }

            fn collection(ledger: &Ledger) -> &Collection<Self> {
                &ledger.$field
            }

            fn collection_mut(ledger: &mut Ledger) -> &mut Collection<Self> {
                &mut ledger.$field
            }
        }

        impl From<$ty> for AnyEntity {
            fn from(entity: $ty) -> Self {
                AnyEntity::$tag(entity)
            }
        }
    };
}

replicable!(Transaction, Transaction, transactions);
replicable!(Category, Category, categories);
replicable!(Account, Account, accounts);
replicable!(Budget, Budget, budgets);
replicable!(Transfer, Transfer, transfers);
replicable!(RecurringRule, Recurring, recurring);

/// Any replicable entity, tagged by type.
///
/// Used where the entity type is only known at runtime, such as when an
/// incoming change event carries an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnyEntity {
    /// A transaction.
    Transaction(Transaction),
    /// A category.
    Category(Category),
    /// An account.
    Account(Account),
    /// A budget.
    Budget(Budget),
    /// A transfer.
    Transfer(Transfer),
    /// A recurring rule.
    Recurring(RecurringRule),
}

macro_rules! each_variant {
    ($value:expr, |$e:ident| $body:expr) => {
        match $value {
            AnyEntity::Transaction($e) => $body,
            AnyEntity::Category($e) => $body,
            AnyEntity::Account($e) => $body,
            AnyEntity::Budget($e) => $body,
            AnyEntity::Transfer($e) => $body,
            AnyEntity::Recurring($e) => $body,
        }
    };
}

impl AnyEntity {
    /// Decodes a canonical payload of the given type.
    pub fn decode(entity_type: EntityType, payload: &[u8]) -> ModelResult<Self> {
        Ok(match entity_type {
            EntityType::Transaction => AnyEntity::Transaction(decode_canonical(payload)?),
            EntityType::Category => AnyEntity::Category(decode_canonical(payload)?),
            EntityType::Account => AnyEntity::Account(decode_canonical(payload)?),
            EntityType::Budget => AnyEntity::Budget(decode_canonical(payload)?),
            EntityType::Transfer => AnyEntity::Transfer(decode_canonical(payload)?),
            EntityType::Recurring => AnyEntity::Recurring(decode_canonical(payload)?),
        })
    }

    /// Returns the entity type tag.
    #[must_use]
    pub fn entity_type(&self) -> EntityType {
        match self {
            AnyEntity::Transaction(_) => EntityType::Transaction,
            AnyEntity::Category(_) => EntityType::Category,
            AnyEntity::Account(_) => EntityType::Account,
            AnyEntity::Budget(_) => EntityType::Budget,
            AnyEntity::Transfer(_) => EntityType::Transfer,
            AnyEntity::Recurring(_) => EntityType::Recurring,
        }
    }

    /// Returns the entity id.
    #[must_use]
    pub fn id(&self) -> EntityId {
        each_variant!(self, |e| e.id())
    }

    /// Returns the last mutation instant.
    #[must_use]
    pub fn updated_at(&self) -> Timestamp {
        each_variant!(self, |e| e.updated_at())
    }

    /// Returns the canonical payload bytes.
    pub fn payload(&self) -> ModelResult<Vec<u8>> {
        each_variant!(self, |e| e.payload())
    }

    /// Checks that the decoded entity matches the id and type it was filed under.
    pub fn expect_identity(&self, entity_type: EntityType, id: EntityId) -> ModelResult<()> {
        if self.entity_type() != entity_type {
            return Err(ModelError::TypeMismatch {
                expected: entity_type,
                found: self.entity_type(),
            });
        }
        if self.id() != id {
            return Err(ModelError::IdMismatch { entity_type });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;

    fn ts(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn account() -> Account {
        Account {
            id: EntityId::from_bytes([7; 16]),
            name: "Wallet".into(),
            kind: AccountKind::Cash,
            initial_balance: 0,
            created_at: ts(100),
            updated_at: ts(100),
        }
    }

    #[test]
    fn payload_hash_tracks_content() {
        let a = account();
        let mut b = account();
        assert_eq!(a.payload_hash().unwrap(), b.payload_hash().unwrap());

        b.name = "Pocket".into();
        assert_ne!(a.payload_hash().unwrap(), b.payload_hash().unwrap());
    }

    #[test]
    fn any_entity_decode() {
        let a = account();
        let payload = a.payload().unwrap();

        let any = AnyEntity::decode(EntityType::Account, &payload).unwrap();
        assert_eq!(any, AnyEntity::Account(a.clone()));
        assert_eq!(any.entity_type(), EntityType::Account);
        assert_eq!(any.id(), a.id);
        assert_eq!(any.updated_at(), ts(100));
        assert_eq!(any.payload().unwrap(), payload);
    }

    #[test]
    fn decode_with_wrong_type_fails() {
        let payload = account().payload().unwrap();
        assert!(AnyEntity::decode(EntityType::Transaction, &payload).is_err());
    }

    #[test]
    fn identity_check() {
        let any = AnyEntity::from(account());
        assert!(any
            .expect_identity(EntityType::Account, EntityId::from_bytes([7; 16]))
            .is_ok());
        assert!(matches!(
            any.expect_identity(EntityType::Account, EntityId::from_bytes([8; 16])),
            Err(ModelError::IdMismatch { .. })
        ));
        assert!(matches!(
            any.expect_identity(EntityType::Budget, EntityId::from_bytes([7; 16])),
            Err(ModelError::TypeMismatch { .. })
        ));
    }
}
