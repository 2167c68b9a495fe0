//! File-based key-value store for persistent storage.

use crate::error::StorageResult;
use crate::store::{validate_key, KeyValueStore};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// A file-based key-value store.
///
/// Each key is stored as one file inside a directory. Data survives
/// process restarts.
///
/// # Durability
///
/// `set` writes to a temporary file, calls `File::sync_all()` and then
/// renames it over the previous value, so a crash mid-write leaves the old
/// value intact.
///
/// # Thread Safety
///
/// Writers are serialized by an internal lock; readers never observe a
/// partially written value.
///
/// # Example
///
/// ```no_run
/// use offsync_storage::{KeyValueStore, FileStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("state")).unwrap();
/// store.set("offsync.cursor", b"42").unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Opens or creates a store rooted at `dir`.
    ///
    /// Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the directory backing this store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.tmp"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        match fs::read(self.value_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        let _guard = self.write_lock.lock();

        let temp = self.temp_path(key);
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp)?;
            file.write_all(value)?;
            file.sync_all()?;
        }
        fs::rename(&temp, self.value_path(key))?;

        // Make the rename itself durable
        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let _guard = self.write_lock.lock();
        match fs::remove_file(self.value_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state");

        let store = FileStore::open(&path).unwrap();
        assert!(path.is_dir());
        assert!(store.get("offsync.cursor").unwrap().is_none());
    }

    #[test]
    fn file_set_and_get() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.set("offsync.cursor", b"one").unwrap();
        store.set("offsync.cursor", b"two").unwrap();
        assert_eq!(store.get("offsync.cursor").unwrap().unwrap(), b"two");
        assert!(!dir.path().join("offsync.cursor.tmp").exists());
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();

        {
            let store = FileStore::open(dir.path()).unwrap();
            store.set("offsync.pending_actions", b"[]").unwrap();
        }

        {
            let store = FileStore::open(dir.path()).unwrap();
            assert_eq!(
                store.get("offsync.pending_actions").unwrap().unwrap(),
                b"[]"
            );
        }
    }

    #[test]
    fn file_delete() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.set("k", b"v").unwrap();
        store.delete("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
        assert!(store.delete("k").is_ok());
    }

    #[test]
    fn file_rejects_traversal() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let result = store.set("../escape", b"v");
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }

    #[test]
    fn file_path() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.path(), dir.path());
    }
}
