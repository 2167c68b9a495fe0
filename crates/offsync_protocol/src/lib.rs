//! # OffSync Protocol
//!
//! Data model shared by the OffSync offline sync engine.
//!
//! This crate provides:
//! - [`NetworkState`] snapshots reported by the host's network observer
//! - [`PendingAction`] records queued while the device is offline
//! - [`MessageDraft`] and [`OutboundMessage`] for the message send path
//! - [`Collection`] and [`PulledUpdates`] for incremental pulls
//! - [`Cursor`], the opaque pull watermark
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod collection;
mod cursor;
mod message;
mod network;

pub use action::{ActionKind, PendingAction, SendMessagePayload};
pub use collection::{Collection, PulledUpdates};
pub use cursor::Cursor;
pub use message::{MessageDraft, MessageMetadata, OutboundMessage};
pub use network::{Connectivity, NetworkState};
