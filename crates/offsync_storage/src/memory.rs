//! In-memory key-value store for testing.

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_key, KeyValueStore};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory key-value store.
///
/// This store keeps all values in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Sessions that don't need persistence
///
/// It can also be switched into an unavailable state to exercise the
/// engine's handling of a failing store.
///
/// # Example
///
/// ```rust
/// use offsync_storage::{KeyValueStore, InMemoryStore};
///
/// let store = InMemoryStore::new();
/// store.set("k", b"v").unwrap();
/// store.delete("k").unwrap();
/// assert!(store.get("k").unwrap().is_none());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    values: RwLock<HashMap<String, Vec<u8>>>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`StorageError::Unavailable`]
    /// (or succeed again when `false`).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable)
        } else {
            Ok(())
        }
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        self.check_available()?;
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        self.check_available()?;
        self.values.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.check_available()?;
        self.values.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let store = InMemoryStore::new();
        assert!(store.is_empty());
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn memory_set_replaces() {
        let store = InMemoryStore::new();
        store.set("k", b"one").unwrap();
        store.set("k", b"two").unwrap();
        assert_eq!(store.get("k").unwrap().unwrap(), b"two");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn memory_delete_missing_succeeds() {
        let store = InMemoryStore::new();
        assert!(store.delete("never-set").is_ok());
    }

    #[test]
    fn memory_unavailable() {
        let store = InMemoryStore::new();
        store.set("k", b"v").unwrap();

        store.set_unavailable(true);
        assert!(matches!(store.get("k"), Err(StorageError::Unavailable)));
        assert!(matches!(store.set("k", b"x"), Err(StorageError::Unavailable)));

        store.set_unavailable(false);
        assert_eq!(store.get("k").unwrap().unwrap(), b"v");
    }

    #[test]
    fn memory_invalid_key() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.set("a/b", b"v"),
            Err(StorageError::InvalidKey(_))
        ));
    }
}
