//! Remote collaborator abstraction.

use crate::error::{SyncError, SyncResult};
use offsync_protocol::{Cursor, OutboundMessage};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// The remote data service the engine reconciles with.
///
/// This trait abstracts the backend, allowing for different
/// implementations (an RPC client, a loopback backend, a mock for
/// testing). The remote is expected to deduplicate messages by their
/// client id, so resending after an ambiguous failure is safe.
pub trait SyncRemote: Send + Sync {
    /// Inserts a batch of messages and returns the stored records.
    fn send_message_batch(
        &self,
        messages: Vec<OutboundMessage>,
    ) -> impl Future<Output = SyncResult<Vec<Value>>> + Send;

    /// Returns updates since `since`, keyed by collection name.
    fn pull_updates(
        &self,
        since: Option<Cursor>,
        max_rows: u32,
    ) -> impl Future<Output = SyncResult<Value>> + Send;

    /// Returns whether an authenticated session exists.
    fn session_active(&self) -> impl Future<Output = SyncResult<bool>> + Send;
}

/// A call recorded by [`MockRemote`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    /// `send_message_batch`.
    Send(Vec<OutboundMessage>),
    /// `pull_updates`.
    Pull {
        /// Cursor passed in.
        since: Option<Cursor>,
        /// Row cap passed in.
        max_rows: u32,
    },
}

/// A mock remote for testing.
///
/// Records every call. Responses are scripted per call; when nothing is
/// scripted, sends echo one record per message and pulls return an empty
/// object.
#[derive(Debug)]
pub struct MockRemote {
    session: AtomicBool,
    session_checks: AtomicUsize,
    calls: Mutex<Vec<RemoteCall>>,
    send_results: Mutex<VecDeque<SyncResult<Vec<Value>>>>,
    pull_results: Mutex<VecDeque<SyncResult<Value>>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockRemote {
    /// Creates a mock remote with an active session.
    pub fn new() -> Self {
        Self {
            session: AtomicBool::new(true),
            session_checks: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            send_results: Mutex::new(VecDeque::new()),
            pull_results: Mutex::new(VecDeque::new()),
            gate: Mutex::new(None),
        }
    }

    /// Sets whether a session exists.
    pub fn set_session_active(&self, active: bool) {
        self.session.store(active, Ordering::SeqCst);
    }

    /// Scripts the result of the next unscripted send.
    pub fn push_send_result(&self, result: SyncResult<Vec<Value>>) {
        self.send_results.lock().push_back(result);
    }

    /// Scripts the result of the next unscripted pull.
    pub fn push_pull_result(&self, result: SyncResult<Value>) {
        self.pull_results.lock().push_back(result);
    }

    /// Makes the next send fail with a retryable transport error.
    pub fn fail_next_send(&self, message: &str) {
        self.push_send_result(Err(SyncError::transport_retryable(message)));
    }

    /// Makes the next pull fail with a retryable transport error.
    pub fn fail_next_pull(&self, message: &str) {
        self.push_pull_result(Err(SyncError::transport_retryable(message)));
    }

    /// Blocks every send until [`MockRemote::resume_sends`] is called.
    pub fn pause_sends(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Releases sends blocked by [`MockRemote::pause_sends`].
    pub fn resume_sends(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.close();
        }
    }

    /// Number of `session_active` calls so far.
    pub fn session_checks(&self) -> usize {
        self.session_checks.load(Ordering::SeqCst)
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    /// Batches passed to `send_message_batch`, in call order.
    pub fn sent_batches(&self) -> Vec<Vec<OutboundMessage>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                RemoteCall::Send(batch) => Some(batch.clone()),
                RemoteCall::Pull { .. } => None,
            })
            .collect()
    }

    /// Cursors passed to `pull_updates`, in call order.
    pub fn pulled_since(&self) -> Vec<Option<Cursor>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                RemoteCall::Pull { since, .. } => Some(since.clone()),
                RemoteCall::Send(_) => None,
            })
            .collect()
    }

    fn echo_records(messages: &[OutboundMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| {
                json!({
                    "id": m.client_id,
                    "conversation_id": m.conversation_id,
                    "body": m.body,
                })
            })
            .collect()
    }
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncRemote for MockRemote {
    async fn send_message_batch(&self, messages: Vec<OutboundMessage>) -> SyncResult<Vec<Value>> {
        self.calls.lock().push(RemoteCall::Send(messages.clone()));

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            // Closed on resume; the error just means "go ahead"
            let _ = gate.acquire().await;
        }

        let scripted = self.send_results.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(Self::echo_records(&messages)))
    }

    async fn pull_updates(&self, since: Option<Cursor>, max_rows: u32) -> SyncResult<Value> {
        self.calls.lock().push(RemoteCall::Pull { since, max_rows });
        let scripted = self.pull_results.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(json!({})))
    }

    async fn session_active(&self) -> SyncResult<bool> {
        self.session_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.session.load(Ordering::SeqCst))
    }
}
