//! In-memory loopback backend.
//!
//! Serves the two procedures the engine calls without any network. Every
//! stored row gets a sequence number from a single counter, and the
//! cursor handed back on pull is that sequence number in decimal.
//!
//! Messages are deduplicated on their client id, the same way the real
//! backend makes resends after an ambiguous failure harmless.

use offsync_engine::{BackendLimits, RpcClient, RpcFailure, PULL_UPDATES, SEND_MESSAGE_BATCH};
use offsync_protocol::{Collection, OutboundMessage};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Ceilings the loopback backend enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendConfig {
    /// Maximum messages accepted per send call.
    pub max_message_batch: usize,
    /// Maximum rows per collection per pull.
    pub max_pull_limit: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendLimits::default().into()
    }
}

impl From<BackendLimits> for BackendConfig {
    fn from(limits: BackendLimits) -> Self {
        Self {
            max_message_batch: limits.max_message_batch,
            max_pull_limit: limits.max_pull_limit,
        }
    }
}

#[derive(Debug, Clone)]
struct Row {
    seq: u64,
    collection: Collection,
    record: Value,
}

#[derive(Debug, Default)]
struct State {
    rows: Vec<Row>,
    by_client_id: HashMap<String, Value>,
    last_seq: u64,
}

impl State {
    fn append(&mut self, collection: Collection, build: impl FnOnce(u64) -> Value) -> Value {
        self.last_seq += 1;
        let record = build(self.last_seq);
        self.rows.push(Row {
            seq: self.last_seq,
            collection,
            record: record.clone(),
        });
        record
    }
}

#[derive(Debug)]
struct Shared {
    config: BackendConfig,
    state: RwLock<State>,
    session: AtomicBool,
    failures: AtomicU32,
    calls: Mutex<Vec<String>>,
}

#[derive(Deserialize)]
struct SendParams {
    messages: Vec<OutboundMessage>,
}

#[derive(Deserialize)]
struct PullParams {
    since: Option<String>,
    max_rows: u32,
}

/// Loopback backend for testing.
///
/// Clones share the same state, so a test can keep a handle while the
/// engine owns another.
#[derive(Debug, Clone)]
pub struct LoopbackBackend {
    shared: Arc<Shared>,
}

impl LoopbackBackend {
    /// Creates a backend with default ceilings and an active session.
    pub fn new() -> Self {
        Self::with_config(BackendConfig::default())
    }

    /// Creates a backend with the given ceilings.
    pub fn with_config(config: BackendConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: RwLock::new(State::default()),
                session: AtomicBool::new(true),
                failures: AtomicU32::new(0),
                calls: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns the ceilings.
    pub fn config(&self) -> BackendConfig {
        self.shared.config
    }

    /// Sets whether the caller is authenticated.
    pub fn set_session_active(&self, active: bool) {
        self.shared.session.store(active, Ordering::SeqCst);
    }

    /// Makes the next `count` calls fail with a transport error.
    pub fn fail_next(&self, count: u32) {
        self.shared.failures.store(count, Ordering::SeqCst);
    }

    /// Stores a row as if another client had written it. Returns its
    /// sequence number.
    pub fn insert(&self, collection: Collection, record: Value) -> u64 {
        let mut state = self.shared.state.write();
        state.append(collection, |_| record);
        state.last_seq
    }

    /// Rows stored in a collection, oldest first.
    pub fn rows(&self, collection: Collection) -> Vec<Value> {
        self.shared
            .state
            .read()
            .rows
            .iter()
            .filter(|row| row.collection == collection)
            .map(|row| row.record.clone())
            .collect()
    }

    /// Stored message records, oldest first.
    pub fn messages(&self) -> Vec<Value> {
        self.rows(Collection::Messages)
    }

    /// Sequence number of the newest row.
    pub fn last_seq(&self) -> u64 {
        self.shared.state.read().last_seq
    }

    /// Procedures called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.shared.calls.lock().clone()
    }

    /// Number of calls to `procedure`.
    pub fn call_count(&self, procedure: &str) -> usize {
        self.shared
            .calls
            .lock()
            .iter()
            .filter(|p| p.as_str() == procedure)
            .count()
    }

    fn take_failure(&self) -> bool {
        self.shared
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn handle_send(&self, params: Value) -> Result<Value, RpcFailure> {
        let params: SendParams = serde_json::from_value(params)
            .map_err(|e| RpcFailure::Procedure(format!("invalid params: {e}")))?;

        let max = self.shared.config.max_message_batch;
        if params.messages.len() > max {
            return Err(RpcFailure::Procedure(format!(
                "too many messages: {} > {max}",
                params.messages.len()
            )));
        }

        let mut state = self.shared.state.write();
        let mut records = Vec::with_capacity(params.messages.len());
        for message in params.messages {
            if let Some(existing) = message
                .client_id
                .as_ref()
                .and_then(|id| state.by_client_id.get(id))
            {
                records.push(existing.clone());
                continue;
            }

            let record = state.append(Collection::Messages, |seq| {
                json!({
                    "id": format!("msg-{seq}"),
                    "seq": seq,
                    "client_id": message.client_id,
                    "conversation_id": message.conversation_id,
                    "body": message.body,
                    "metadata": message.metadata,
                    "created_at": message.created_at,
                })
            });
            if let Some(client_id) = message.client_id {
                state.by_client_id.insert(client_id, record.clone());
            }
            records.push(record);
        }
        Ok(Value::Array(records))
    }

    fn handle_pull(&self, params: Value) -> Result<Value, RpcFailure> {
        let params: PullParams = serde_json::from_value(params)
            .map_err(|e| RpcFailure::Procedure(format!("invalid params: {e}")))?;
        let since = match params.since.as_deref() {
            None => 0,
            Some(cursor) => cursor
                .parse::<u64>()
                .map_err(|_| RpcFailure::Procedure(format!("invalid cursor '{cursor}'")))?,
        };
        let limit = params.max_rows.clamp(1, self.shared.config.max_pull_limit.max(1)) as usize;

        let state = self.shared.state.read();
        let mut response = Map::new();
        // Rows up to the watermark have all been handed out
        let mut watermark = state.last_seq;
        for collection in Collection::ALL {
            let newer: Vec<&Row> = state
                .rows
                .iter()
                .filter(|row| row.collection == collection && row.seq > since)
                .collect();
            if newer.is_empty() {
                continue;
            }
            if let Some(first_omitted) = newer.get(limit) {
                watermark = watermark.min(first_omitted.seq - 1);
            }
            let rows = newer
                .iter()
                .take(limit)
                .map(|row| row.record.clone())
                .collect();
            response.insert(collection.key().to_string(), Value::Array(rows));
        }

        let cursor = watermark.max(since);
        if cursor > 0 {
            response.insert("cursor".to_string(), Value::String(cursor.to_string()));
        }
        Ok(Value::Object(response))
    }
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcClient for LoopbackBackend {
    async fn call(&self, procedure: &str, params: Value) -> Result<Value, RpcFailure> {
        self.shared.calls.lock().push(procedure.to_string());

        if self.take_failure() {
            return Err(RpcFailure::Transport("injected failure".into()));
        }
        if !self.shared.session.load(Ordering::SeqCst) {
            return Err(RpcFailure::Unauthenticated);
        }

        match procedure {
            SEND_MESSAGE_BATCH => self.handle_send(params),
            PULL_UPDATES => self.handle_pull(params),
            other => Err(RpcFailure::Procedure(format!("unknown procedure '{other}'"))),
        }
    }

    async fn session_active(&self) -> Result<bool, RpcFailure> {
        Ok(self.shared.session.load(Ordering::SeqCst))
    }
}
