//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up stores, queued actions
//! and network snapshots used across the engine's tests.

use chrono::{DateTime, TimeZone, Utc};
use offsync_protocol::{MessageDraft, NetworkState, PendingAction};
use offsync_storage::{FileStore, InMemoryStore};
use std::sync::Arc;
use tempfile::TempDir;

/// A file store in a temporary directory with automatic cleanup.
pub struct TestFileStore {
    /// The store instance.
    pub store: FileStore,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl TestFileStore {
    /// Creates a store in a fresh temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStore::open(temp_dir.path()).expect("Failed to open file store");
        Self {
            store,
            _temp_dir: temp_dir,
        }
    }

    /// Opens a second handle on the same directory, as a restart would.
    pub fn reopen(&self) -> FileStore {
        FileStore::open(self.store.path()).expect("Failed to reopen file store")
    }
}

impl Default for TestFileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestFileStore {
    type Target = FileStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Creates a shared in-memory store.
pub fn memory_store() -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::new())
}

/// A fixed point in time for deterministic timestamps.
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

/// Creates send-message actions with ids `a0..aN` in conversation `conv`.
pub fn queued_messages(bodies: &[&str]) -> Vec<PendingAction> {
    bodies
        .iter()
        .enumerate()
        .map(|(i, body)| {
            PendingAction::send_message("conv", *body)
                .with_id(format!("a{i}"))
                .with_created_at(fixed_time())
        })
        .collect()
}

/// Creates drafts whose client id equals their body.
pub fn drafts(bodies: &[&str]) -> Vec<MessageDraft> {
    bodies
        .iter()
        .map(|body| MessageDraft::new("conv", *body).with_client_id(*body))
        .collect()
}

/// Unconstrained wifi.
pub fn wifi() -> NetworkState {
    NetworkState::wifi()
}

/// Satellite link.
pub fn satellite() -> NetworkState {
    NetworkState::satellite()
}

/// Cellular link flagged ultra-constrained.
pub fn ultra_constrained() -> NetworkState {
    NetworkState::cellular().with_ultra_constrained(true)
}
