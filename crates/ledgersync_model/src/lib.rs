//! # ledgersync model
//!
//! The replicable aggregates of a personal ledger and the local merge rules
//! that keep them consistent across devices.
//!
//! This crate provides:
//! - [`EntityId`] and [`Timestamp`]
//! - The six replicable entities ([`Transaction`], [`Category`], [`Account`],
//!   [`Budget`], [`Transfer`], [`RecurringRule`]) behind the [`Replicable`] trait
//! - Canonical CBOR encoding and content hashing
//! - Deletion markers ([`TombstoneSet`]) with later-wins merging
//! - Materialized collections and the [`Ledger`] that owns them
//!
//! ## Tombstone Precedence
//!
//! For any id, an entity whose `updated_at` is strictly later than the
//! marker's `deleted_at` survives; otherwise the marker wins and the entity
//! is absent from the materialized collection.
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod canonical;
mod collection;
mod entity;
mod error;
mod id;
mod ledger;
mod tombstone;
mod types;

pub use canonical::{content_hash, decode_canonical, encode_canonical};
pub use collection::{Collection, DeleteOutcome, UpsertOutcome};
pub use entity::{
    Account, AnyEntity, Budget, Category, RecurringRule, Replicable, Transaction, Transfer,
};
pub use error::{ModelError, ModelResult};
pub use id::EntityId;
pub use ledger::{Ledger, LocalState};
pub use tombstone::{DeletionMarker, TombstoneSet};
pub use types::{AccountKind, EntityType, Frequency, Timestamp, TransactionKind};
