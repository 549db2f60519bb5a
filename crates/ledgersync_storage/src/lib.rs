//! # ledgersync storage
//!
//! Keyed local state store for the ledgersync engine.
//!
//! Every piece of local state the sync engine owns (materialized entity
//! collections, deletion markers, the outbox, applied/ignored event ids,
//! the conflict mailbox, sequence watermarks and the sync log) is persisted
//! as one opaque document under one key.
//!
//! ## Design Principles
//!
//! - Stores are simple keyed byte stores (load, save, remove, list)
//! - A `save` replaces the whole document atomically
//! - Stores do not interpret the bytes they hold
//! - Must be `Send + Sync` for sharing between the scheduler and callers
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral replicas
//! - [`FileStore`] - One file per key below a root directory
//!
//! ## Example
//!
//! ```rust
//! use ledgersync_storage::{InMemoryStore, StateStore};
//!
//! let store = InMemoryStore::new();
//! store.save("sync/outbox.json", b"[]").unwrap();
//! assert_eq!(store.load("sync/outbox.json").unwrap(), Some(b"[]".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::{validate_key, StateStore, StateStoreExt};
