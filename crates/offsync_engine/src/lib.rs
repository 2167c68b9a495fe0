//! # OffSync Engine
//!
//! Offline-first sync engine for OffSync.
//!
//! This crate provides:
//! - Network-driven operating modes (offline → satellite → normal)
//! - A FIFO pending-action queue with per-mode batch limits
//! - Message sanitization with typed per-draft rejections
//! - Backend batch ceilings that clamp silently
//! - Multi-collection pull normalization with a cursor
//! - Single-flight flushes with link-aware exponential backoff
//! - Write-through persistence of the queue and cursor
//! - An RPC remote abstraction plus a scriptable mock
//!
//! ## Architecture
//!
//! The engine implements a **send-then-pull** cycle:
//! 1. Transmit the head of the pending queue, sized for the current link
//! 2. Drop confirmed and permanently rejected actions from the queue
//! 3. Pull updates since the stored cursor and advance it
//!
//! ## Key Invariants
//!
//! - The remote deduplicates on the action id, so resends are safe
//! - A failed cycle never touches the queue
//! - At most one cycle runs at a time; overlapping triggers are dropped
//! - At most one retry timer exists at a time
//! - Persistence failures are logged, never surfaced

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod journal;
mod limiter;
mod orchestrator;
mod outbox;
mod reconciler;
mod remote;
mod rpc;
mod sanitizer;
mod state;

pub use config::{
    BackendLimits, BackoffPolicy, ConfigOverrides, ConfigSource, Setting, SettingDef, SyncConfig,
    ALL_SETTINGS, BACKEND_MAX_MESSAGE_BATCH, BACKEND_MAX_PULL_LIMIT, MAX_MESSAGE_BYTES,
    SYNC_BASE_BACKOFF_MS, SYNC_NORMAL_BATCH_LIMIT, SYNC_SATELLITE_BATCH_LIMIT,
    SYNC_ULTRA_BATCH_LIMIT,
};
pub use error::{SyncError, SyncResult};
pub use journal::{SyncJournal, CURSOR_KEY, PENDING_ACTIONS_KEY};
pub use limiter::BatchLimiter;
pub use orchestrator::{
    FlushOutcome, FlushReport, SkipReason, SyncEvent, SyncOrchestrator, SyncStatus,
};
pub use outbox::{Outbox, SendOutcome};
pub use reconciler::PullReconciler;
pub use remote::{MockRemote, RemoteCall, SyncRemote};
pub use rpc::{RpcClient, RpcFailure, RpcRemote, PULL_UPDATES, SEND_MESSAGE_BATCH};
pub use sanitizer::{
    AcceptedDraft, MessageSanitizer, RejectionReason, SanitizedBatch, SanitizedMessageRejection,
};
pub use state::{BatchLimits, SyncState, SyncStateMachine};
