//! RPC remote implementation.
//!
//! This module maps the [`SyncRemote`] contract onto a backend-as-a-service
//! that exposes named remote procedures with JSON parameters. The actual
//! client is abstracted via a trait so any RPC library (or a loopback
//! backend in tests) can be plugged in.

use crate::error::{SyncError, SyncResult};
use crate::remote::SyncRemote;
use offsync_protocol::{Cursor, OutboundMessage};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;

/// Procedure that inserts a batch of messages.
pub const SEND_MESSAGE_BATCH: &str = "send_message_batch";

/// Procedure that returns updates since a cursor.
pub const PULL_UPDATES: &str = "pull_updates";

/// Why an RPC call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcFailure {
    /// The request never got a response (network down, timeout).
    Transport(String),
    /// The procedure ran and reported an error.
    Procedure(String),
    /// The caller is not authenticated.
    Unauthenticated,
}

impl fmt::Display for RpcFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcFailure::Transport(message) => write!(f, "transport: {message}"),
            RpcFailure::Procedure(message) => write!(f, "procedure: {message}"),
            RpcFailure::Unauthenticated => f.write_str("unauthenticated"),
        }
    }
}

impl From<RpcFailure> for SyncError {
    fn from(failure: RpcFailure) -> Self {
        match failure {
            RpcFailure::Transport(message) => SyncError::transport_retryable(message),
            RpcFailure::Procedure(message) => SyncError::Remote(message),
            RpcFailure::Unauthenticated => SyncError::NoSession,
        }
    }
}

/// RPC client abstraction.
///
/// Implement this trait to provide the actual transport.
pub trait RpcClient: Send + Sync {
    /// Invokes a remote procedure and returns its JSON result.
    fn call(
        &self,
        procedure: &str,
        params: Value,
    ) -> impl Future<Output = Result<Value, RpcFailure>> + Send;

    /// Returns whether the client holds an authenticated session.
    fn session_active(&self) -> impl Future<Output = Result<bool, RpcFailure>> + Send;
}

/// RPC-based sync remote.
pub struct RpcRemote<C: RpcClient> {
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: RpcClient> RpcRemote<C> {
    /// Creates a remote over the given client.
    pub fn new(client: C) -> Self {
        Self {
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    async fn invoke(&self, procedure: &str, params: Value) -> SyncResult<Value> {
        match self.client.call(procedure, params).await {
            Ok(value) => {
                *self.last_error.write() = None;
                Ok(value)
            }
            Err(failure) => {
                *self.last_error.write() = Some(failure.to_string());
                Err(failure.into())
            }
        }
    }
}

impl<C: RpcClient> SyncRemote for RpcRemote<C> {
    async fn send_message_batch(&self, messages: Vec<OutboundMessage>) -> SyncResult<Vec<Value>> {
        let response = self
            .invoke(SEND_MESSAGE_BATCH, json!({ "messages": messages }))
            .await?;

        match response {
            Value::Array(records) => Ok(records),
            Value::Null => Ok(Vec::new()),
            other => Err(SyncError::Protocol(format!(
                "expected an array of records, got {}",
                json_kind(&other)
            ))),
        }
    }

    async fn pull_updates(&self, since: Option<Cursor>, max_rows: u32) -> SyncResult<Value> {
        self.invoke(PULL_UPDATES, json!({ "since": since, "max_rows": max_rows }))
            .await
    }

    async fn session_active(&self) -> SyncResult<bool> {
        self.client.session_active().await.map_err(SyncError::from)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
