//! In-memory state store for testing.

use crate::error::StorageResult;
use crate::store::{validate_key, StateStore};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory state store.
///
/// Suitable for unit tests, integration tests and replicas that do not
/// need to survive the process.
///
/// # Example
///
/// ```rust
/// use ledgersync_storage::{InMemoryStore, StateStore};
///
/// let store = InMemoryStore::new();
/// assert_eq!(store.load("missing.json").unwrap(), None);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    documents: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

impl StateStore for InMemoryStore {
    fn load(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.documents.read().get(key).cloned())
    }

    fn save(&self, key: &str, bytes: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        self.documents.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.documents.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.documents.read().keys().cloned().collect())
    }
}
