//! # OffSync Storage
//!
//! Key-value store trait and implementations for OffSync.
//!
//! The sync engine persists its pending-action queue and pull cursor
//! through this abstraction. Stores are **opaque byte maps**: they do not
//! interpret the values they hold.
//!
//! ## Design Principles
//!
//! - Stores are simple byte maps (get, set, delete)
//! - No knowledge of queue or cursor formats
//! - Must be `Send + Sync` for concurrent access
//! - The engine owns all value interpretation
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral sessions
//! - [`FileStore`] - For persistent storage, one file per key
//!
//! ## Example
//!
//! ```rust
//! use offsync_storage::{KeyValueStore, InMemoryStore};
//!
//! let store = InMemoryStore::new();
//! store.set("offsync.cursor", b"2024-01-01T00:00:00Z").unwrap();
//! assert_eq!(
//!     store.get("offsync.cursor").unwrap().as_deref(),
//!     Some(&b"2024-01-01T00:00:00Z"[..])
//! );
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
pub use store::{validate_key, KeyValueStore};
