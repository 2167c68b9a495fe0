//! Key-value store trait definition.

use crate::error::{StorageError, StorageResult};

/// A local key-value store for OffSync.
///
/// Stores are **opaque byte maps**. The engine writes the serialized
/// pending queue and cursor under fixed keys and reads them back on
/// startup.
///
/// # Invariants
///
/// - `get` returns exactly the bytes last passed to `set` for that key
/// - `get` of a missing key is `Ok(None)`, not an error
/// - `delete` of a missing key succeeds
/// - Stores must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the store cannot be read.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// After this returns successfully the value survives process
    /// termination (for durable stores).
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the write fails.
    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removes the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the removal fails.
    fn delete(&self, key: &str) -> StorageResult<()>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        (**self).delete(key)
    }
}

/// Checks that a key is non-empty and made of `[A-Za-z0-9._-]`.
///
/// Keys map directly to file names in [`super::FileStore`], so every
/// store applies the same rule.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] otherwise.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accepts_engine_keys() {
        assert!(validate_key("offsync.pending_actions").is_ok());
        assert!(validate_key("offsync.cursor").is_ok());
    }

    #[test]
    fn rejects_path_like_keys() {
        assert!(validate_key("").is_err());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key(".hidden").is_err());
    }

    proptest! {
        #[test]
        fn separators_never_validate(prefix in "[a-z]{0,8}", suffix in "[a-z]{0,8}") {
            let key = format!("{prefix}/{suffix}");
            prop_assert!(validate_key(&key).is_err());
        }
    }
}
