//! Durable copy of the pending queue and cursor.
//!
//! The journal serializes engine state as JSON under two fixed keys of a
//! [`KeyValueStore`]. It never caches: every load reads the store and
//! every save writes it.
//!
//! The orchestrator does not call the journal directly. It hands snapshots
//! to a [`JournalWriter`], which writes them on tokio's blocking pool.

use crate::error::{SyncError, SyncResult};
use offsync_protocol::{Cursor, PendingAction};
use offsync_storage::KeyValueStore;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::warn;

/// Key holding the serialized pending queue.
pub const PENDING_ACTIONS_KEY: &str = "offsync.pending_actions";

/// Key holding the pull cursor.
pub const CURSOR_KEY: &str = "offsync.cursor";

/// Typed view over the engine's keys in a store.
#[derive(Debug)]
pub struct SyncJournal<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> SyncJournal<S> {
    /// Wraps a store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reads the pending queue, head first. A missing key is an empty queue.
    pub fn load_pending(&self) -> SyncResult<Vec<PendingAction>> {
        Ok(self.read(PENDING_ACTIONS_KEY)?.unwrap_or_default())
    }

    /// Replaces the persisted queue.
    pub fn save_pending<'a>(
        &self,
        pending: impl IntoIterator<Item = &'a PendingAction>,
    ) -> SyncResult<()> {
        let pending: Vec<&PendingAction> = pending.into_iter().collect();
        self.write(PENDING_ACTIONS_KEY, &pending)
    }

    /// Reads the cursor.
    pub fn load_cursor(&self) -> SyncResult<Option<Cursor>> {
        self.read(CURSOR_KEY)
    }

    /// Persists the cursor, or deletes it when `None`.
    pub fn save_cursor(&self, cursor: Option<&Cursor>) -> SyncResult<()> {
        match cursor {
            Some(cursor) => self.write(CURSOR_KEY, cursor),
            None => Ok(self.store.delete(CURSOR_KEY)?),
        }
    }

    /// Deletes both keys.
    pub fn clear(&self) -> SyncResult<()> {
        self.store.delete(PENDING_ACTIONS_KEY)?;
        self.store.delete(CURSOR_KEY)?;
        Ok(())
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> SyncResult<Option<T>> {
        let Some(bytes) = self.store.get(key)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| SyncError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> SyncResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| SyncError::Corrupt {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.store.set(key, &bytes)?;
        Ok(())
    }
}

/// Snapshots not yet written.
#[derive(Debug, Default)]
struct Dirty {
    pending: Option<Vec<PendingAction>>,
    cursor: Option<Option<Cursor>>,
}

/// Off-thread writer for engine state.
///
/// Snapshots are coalesced: a write always stores the newest queue and
/// cursor handed in so far, so a burst of changes costs one store write.
/// Failures are logged and dropped.
#[derive(Debug)]
pub(crate) struct JournalWriter<S: KeyValueStore> {
    journal: SyncJournal<S>,
    dirty: Mutex<Dirty>,
    io: Mutex<()>,
}

impl<S: KeyValueStore + 'static> JournalWriter<S> {
    pub(crate) fn new(journal: SyncJournal<S>) -> Arc<Self> {
        Arc::new(Self {
            journal,
            dirty: Mutex::new(Dirty::default()),
            io: Mutex::new(()),
        })
    }

    /// Queues a queue snapshot for writing.
    pub(crate) fn save_pending(self: &Arc<Self>, pending: Vec<PendingAction>) {
        self.dirty.lock().pending = Some(pending);
        self.schedule();
    }

    /// Queues a cursor for writing.
    pub(crate) fn save_cursor(self: &Arc<Self>, cursor: Option<Cursor>) {
        self.dirty.lock().cursor = Some(cursor);
        self.schedule();
    }

    /// Resolves once every snapshot handed in before the call is written.
    pub(crate) async fn settle(self: &Arc<Self>) {
        let writer = Arc::clone(self);
        if let Err(e) = tokio::task::spawn_blocking(move || writer.write_dirty()).await {
            warn!(error = %e, "journal write task failed");
        }
    }

    /// Writes outstanding snapshots on the calling thread.
    pub(crate) fn write_dirty(&self) {
        // Taken under `io` so a later snapshot is never overwritten by an older one
        let _io = self.io.lock();
        let dirty = std::mem::take(&mut *self.dirty.lock());

        if let Some(pending) = dirty.pending {
            if let Err(e) = self.journal.save_pending(&pending) {
                warn!(error = %e, "failed to persist pending actions");
            }
        }
        if let Some(cursor) = dirty.cursor {
            if let Err(e) = self.journal.save_cursor(cursor.as_ref()) {
                warn!(error = %e, "failed to persist cursor");
            }
        }
    }

    fn schedule(self: &Arc<Self>) {
        let writer = Arc::clone(self);
        match Handle::try_current() {
            Ok(handle) => drop(handle.spawn_blocking(move || writer.write_dirty())),
            Err(_) => writer.write_dirty(),
        }
    }
}
