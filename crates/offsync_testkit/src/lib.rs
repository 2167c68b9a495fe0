//! # OffSync Testkit
//!
//! Test utilities for OffSync.
//!
//! This crate provides:
//! - A loopback backend that speaks the engine's RPC procedures in memory
//! - Test fixtures for stores, actions and drafts
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use offsync_testkit::prelude::*;
//! use offsync_engine::{RpcRemote, SyncConfig, SyncOrchestrator};
//!
//! #[tokio::test]
//! async fn flushes_against_loopback() {
//!     let backend = LoopbackBackend::new();
//!     let engine = SyncOrchestrator::open(SyncConfig::default(), memory_store(), wifi());
//!     engine.attach_remote(Arc::new(RpcRemote::new(backend.clone())));
//!     // ... enqueue and flush
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use backend::*;
pub use fixtures::*;
pub use generators::*;
