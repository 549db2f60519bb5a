//! State store trait definition.

use crate::error::{StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A keyed store for local replica state.
///
/// Keys are `/`-separated relative names such as `ledger/transactions.json`.
///
/// # Invariants
///
/// - `load` returns exactly the bytes of the last successful `save`
/// - `save` is all-or-nothing: a crash leaves the old or the new document
/// - `load` of a missing key is `Ok(None)`, never an error
pub trait StateStore: Send + Sync {
    /// Loads the document stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn load(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Replaces the document stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn save(&self, key: &str, bytes: &[u8]) -> StorageResult<()>;

    /// Removes the document stored under `key`. Missing keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Lists all keys currently stored, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    fn keys(&self) -> StorageResult<Vec<String>>;
}

/// JSON helpers available on every [`StateStore`].
pub trait StateStoreExt: StateStore {
    /// Loads and decodes a JSON document.
    fn load_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.load(key)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StorageError::corrupted(key, e)),
            None => Ok(None),
        }
    }

    /// Encodes and saves a JSON document.
    fn save_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| StorageError::corrupted(key, e))?;
        self.save(key, &bytes)
    }
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}

/// Checks that `key` is a relative, `/`-separated name without `.` or `..`
/// segments and without characters outside `[A-Za-z0-9._-]`.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] when the key is rejected.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let valid = !key.is_empty()
        && key.split('/').all(|segment| {
            !segment.is_empty()
                && segment != "."
                && segment != ".."
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        });

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_nested_keys() {
        assert!(validate_key("ledger/transactions.json").is_ok());
        assert!(validate_key("sync/watermarks.json").is_ok());
    }

    #[test]
    fn rejects_escaping_keys() {
        assert!(validate_key("").is_err());
        assert!(validate_key("../outside").is_err());
        assert!(validate_key("/absolute").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("with space").is_err());
    }
}
