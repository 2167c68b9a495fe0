//! Flush orchestration.
//!
//! A flush is one sync cycle: transmit the head of the pending queue, then
//! pull updates since the stored cursor. Flushes are single-flight; a
//! trigger that arrives while one is running is dropped. A failed flush
//! leaves the queue alone and schedules exactly one retry with
//! link-aware exponential backoff.
//!
//! ```text
//!   idle ──flush──▶ sending ──▶ pulling ──▶ idle
//!                      │           │
//!                      └───error───┴──▶ backoff ──timer──▶ flush
//! ```

use crate::config::{BackoffPolicy, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::journal::{JournalWriter, SyncJournal};
use crate::outbox::{Outbox, SendOutcome};
use crate::remote::SyncRemote;
use crate::sanitizer::SanitizedMessageRejection;
use crate::state::{SyncState, SyncStateMachine};
use offsync_protocol::{Cursor, MessageDraft, NetworkState, PendingAction, PulledUpdates};
use offsync_storage::KeyValueStore;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// User-visible sync status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Nothing running, nothing scheduled.
    #[default]
    Idle,
    /// Transmitting pending actions.
    Sending,
    /// Pulling updates.
    Pulling,
    /// Waiting for the retry timer after a failure.
    Backoff,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Sending => "sending",
            SyncStatus::Pulling => "pulling",
            SyncStatus::Backoff => "backoff",
        })
    }
}

/// Why a flush did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No remote is attached.
    NoRemote,
    /// The session was ended or the remote reports none.
    NoSession,
    /// The link is offline.
    Offline,
}

/// What a completed flush did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    /// Ids of actions the remote accepted.
    pub sent: Vec<String>,
    /// Ids of actions dropped because they can never be sent.
    pub dropped: Vec<String>,
    /// Records the remote returned for the sent actions.
    pub records: usize,
    /// Rows pulled across all collections.
    pub pulled_rows: usize,
    /// Cursor after the pull.
    pub cursor: Option<Cursor>,
}

/// Result of a flush trigger.
#[derive(Debug)]
pub enum FlushOutcome {
    /// Another flush was running; this trigger was dropped.
    AlreadyInFlight,
    /// A precondition failed; nothing was attempted.
    Skipped(SkipReason),
    /// The send and the pull both succeeded.
    Completed(FlushReport),
    /// The flush failed.
    ///
    /// Every failure is retried while the session lasts, whatever
    /// [`SyncError::is_retryable`] says; non-retryable errors are only
    /// logged louder. A failure that lands after [`SyncOrchestrator::end_session`]
    /// schedules nothing.
    Failed {
        /// What went wrong.
        error: SyncError,
        /// Delay before the retry, if one was scheduled.
        retry_in: Option<Duration>,
    },
}

impl FlushOutcome {
    /// Returns true for [`FlushOutcome::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, FlushOutcome::Completed(_))
    }
}

/// Notification delivered to subscribers.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The status changed.
    Status(SyncStatus),
    /// A batch was submitted. Only the attempted subset is reported.
    Sent {
        /// Actions the remote accepted.
        actions: Vec<PendingAction>,
        /// Records the remote returned.
        records: Vec<Value>,
        /// Drafts the sanitizer refused.
        rejected: Vec<SanitizedMessageRejection>,
    },
    /// Updates were pulled.
    Pulled {
        /// Normalized updates.
        updates: PulledUpdates,
    },
}

type FlushFuture<'a> = Pin<Box<dyn Future<Output = FlushOutcome> + Send + 'a>>;

#[derive(Debug, Default)]
struct Flight {
    in_flight: bool,
    status: SyncStatus,
}

/// Clears the in-flight flag even if the flush future is dropped.
struct FlightGuard<'a> {
    flight: &'a Mutex<Flight>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flight.lock().in_flight = false;
    }
}

struct Inner<R, S: KeyValueStore> {
    outbox: Outbox,
    backoff: BackoffPolicy,
    backend_batch: usize,
    pull_rows: u32,
    journal: Arc<JournalWriter<S>>,
    remote: RwLock<Option<Arc<R>>>,
    session_ready: AtomicBool,
    machine: Mutex<SyncStateMachine>,
    cursor: Mutex<Option<Cursor>>,
    flight: Mutex<Flight>,
    attempt: AtomicU32,
    retry: Mutex<Option<JoinHandle<()>>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SyncEvent>>>,
}

/// Drives sync cycles between the local queue and a remote.
///
/// The queue and cursor are written through to the store after every
/// change, on tokio's blocking pool and never under the queue lock. Store
/// failures are logged and otherwise ignored; the in-memory state stays
/// authoritative for the life of the orchestrator. Dropping the
/// orchestrator writes out anything still outstanding.
///
/// # Example
///
/// ```rust,no_run
/// use offsync_engine::{MockRemote, SyncConfig, SyncOrchestrator};
/// use offsync_protocol::{NetworkState, PendingAction};
/// use offsync_storage::InMemoryStore;
/// use std::sync::Arc;
///
/// # async fn demo() {
/// let engine = SyncOrchestrator::open(
///     SyncConfig::default(),
///     InMemoryStore::new(),
///     NetworkState::wifi(),
/// );
/// engine.attach_remote(Arc::new(MockRemote::new()));
/// let outcome = engine.enqueue(PendingAction::send_message("c1", "hello")).await;
/// assert!(outcome.is_completed());
/// # }
/// ```
pub struct SyncOrchestrator<R, S>
where
    R: SyncRemote + 'static,
    S: KeyValueStore + 'static,
{
    inner: Arc<Inner<R, S>>,
}

impl<R, S> SyncOrchestrator<R, S>
where
    R: SyncRemote + 'static,
    S: KeyValueStore + 'static,
{
    /// Opens an orchestrator, restoring the queue and cursor from `store`.
    ///
    /// Unreadable state is logged and treated as empty.
    pub fn open(config: SyncConfig, store: S, network: NetworkState) -> Self {
        let journal = SyncJournal::new(store);
        let pending = journal.load_pending().unwrap_or_else(|e| {
            warn!(error = %e, "failed to restore pending actions, starting empty");
            Vec::new()
        });
        let cursor = journal.load_cursor().unwrap_or_else(|e| {
            warn!(error = %e, "failed to restore cursor, starting from scratch");
            None
        });
        info!(
            pending = pending.len(),
            cursor = ?cursor,
            network = %network.connectivity,
            "sync engine opened"
        );

        let limits = config.backend_limits();
        let inner = Inner {
            outbox: Outbox::new(limits),
            backoff: config.backoff(),
            backend_batch: limits.max_message_batch,
            pull_rows: limits.max_pull_limit,
            journal: JournalWriter::new(journal),
            remote: RwLock::new(None),
            session_ready: AtomicBool::new(true),
            machine: Mutex::new(SyncStateMachine::with_pending(
                network,
                config.batch_limits(),
                pending,
            )),
            cursor: Mutex::new(cursor),
            flight: Mutex::new(Flight::default()),
            attempt: AtomicU32::new(0),
            retry: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Attaches the remote used by subsequent flushes.
    pub fn attach_remote(&self, remote: Arc<R>) {
        *self.inner.remote.write() = Some(remote);
    }

    /// Detaches the remote. Later flushes are skipped.
    pub fn detach_remote(&self) {
        *self.inner.remote.write() = None;
    }

    /// Marks the session ready or not.
    pub fn set_session_ready(&self, ready: bool) {
        self.inner.session_ready.store(ready, Ordering::SeqCst);
    }

    /// Ends the session and cancels any pending retry.
    pub fn end_session(&self) {
        self.inner.session_ready.store(false, Ordering::SeqCst);
        self.inner.cancel_retry();
        self.inner.attempt.store(0, Ordering::SeqCst);
        if self.status() == SyncStatus::Backoff {
            self.inner.set_status(SyncStatus::Idle);
        }
        info!("sync session ended");
    }

    /// Applies a network snapshot.
    ///
    /// Flushes when the new mode can send and work is pending; returns
    /// `None` when no flush was triggered.
    pub async fn handle_network_change(&self, network: NetworkState) -> Option<FlushOutcome> {
        let (state, pending) = {
            let mut machine = self.inner.machine.lock();
            let state = machine.handle_network_change(network);
            (state, machine.pending_len())
        };
        if state.can_send() && pending > 0 {
            Some(self.flush().await)
        } else {
            None
        }
    }

    /// Queues an action, persists the queue and triggers a flush.
    pub async fn enqueue(&self, action: PendingAction) -> FlushOutcome {
        debug!(id = %action.id, "enqueueing action");
        let snapshot = {
            let mut machine = self.inner.machine.lock();
            machine.enqueue(action);
            machine.pending().cloned().collect()
        };
        self.inner.journal.save_pending(snapshot);
        self.flush().await
    }

    /// Runs one sync cycle.
    pub async fn flush(&self) -> FlushOutcome {
        self.inner.flush().await
    }

    /// Waits until every queue and cursor change made so far is in the
    /// store.
    pub async fn wait_persisted(&self) {
        self.inner.journal.settle().await;
    }

    /// Current status.
    pub fn status(&self) -> SyncStatus {
        self.inner.status()
    }

    /// Current operating mode.
    pub fn current_state(&self) -> SyncState {
        self.inner.machine.lock().current_state()
    }

    /// Latest network snapshot.
    pub fn network(&self) -> NetworkState {
        self.inner.machine.lock().network()
    }

    /// Cursor of the last successful pull.
    pub fn cursor(&self) -> Option<Cursor> {
        self.inner.cursor.lock().clone()
    }

    /// Queued actions, head first.
    pub fn pending(&self) -> Vec<PendingAction> {
        self.inner.machine.lock().pending().cloned().collect()
    }

    /// Consecutive failed flushes since the last success.
    pub fn failure_count(&self) -> u32 {
        self.inner.attempt.load(Ordering::SeqCst)
    }

    /// Returns true if a retry timer is pending.
    pub fn retry_scheduled(&self) -> bool {
        self.inner.retry_pending()
    }

    /// Subscribes to sync events.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SyncEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().push(tx);
        rx
    }
}

impl<R, S> Drop for SyncOrchestrator<R, S>
where
    R: SyncRemote + 'static,
    S: KeyValueStore + 'static,
{
    fn drop(&mut self) {
        self.inner.cancel_retry();
        self.inner.journal.write_dirty();
    }
}

impl<R, S> Inner<R, S>
where
    R: SyncRemote + 'static,
    S: KeyValueStore + 'static,
{
    fn flush(self: &Arc<Self>) -> FlushFuture<'_> {
        Box::pin(async move {
            let Some(_guard) = self.begin_flight() else {
                debug!("flush already in flight");
                return FlushOutcome::AlreadyInFlight;
            };
            let remote = match self.preflight() {
                Ok(remote) => remote,
                Err(reason) => {
                    debug!(?reason, "flush skipped");
                    self.settle_skipped();
                    return FlushOutcome::Skipped(reason);
                }
            };

            let previous = self.flight.lock().status;
            match self.run(&remote).await {
                Ok(report) => {
                    self.attempt.store(0, Ordering::SeqCst);
                    self.cancel_retry();
                    self.set_status(SyncStatus::Idle);
                    info!(
                        sent = report.sent.len(),
                        dropped = report.dropped.len(),
                        pulled = report.pulled_rows,
                        "flush completed"
                    );
                    FlushOutcome::Completed(report)
                }
                Err(error) if error.is_precondition() => {
                    self.set_status(previous);
                    self.settle_skipped();
                    debug!(%error, "flush skipped");
                    FlushOutcome::Skipped(SkipReason::NoSession)
                }
                Err(error) => self.fail(error),
            }
        })
    }

    fn fail(self: &Arc<Self>, error: SyncError) -> FlushOutcome {
        if !self.session_ready.load(Ordering::SeqCst) {
            self.abandon_retry();
            warn!(%error, "flush failed after the session ended, not retrying");
            return FlushOutcome::Failed {
                error,
                retry_in: None,
            };
        }

        let network = self.machine.lock().network();
        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst);
        let retry_in = self.backoff.delay_for(attempt, &network);
        self.set_status(SyncStatus::Backoff);
        self.schedule_retry(retry_in);

        // end_session may have run between the check above and the scheduling
        if !self.session_ready.load(Ordering::SeqCst) {
            self.abandon_retry();
            return FlushOutcome::Failed {
                error,
                retry_in: None,
            };
        }

        let retry_in_ms = retry_in.as_millis() as u64;
        if error.is_retryable() {
            warn!(%error, attempt = attempt + 1, retry_in_ms, "flush failed");
        } else {
            error!(
                %error,
                attempt = attempt + 1,
                retry_in_ms,
                "flush failed with a non-retryable error"
            );
        }
        FlushOutcome::Failed {
            error,
            retry_in: Some(retry_in),
        }
    }

    /// Drops any retry and returns to idle.
    fn abandon_retry(&self) {
        self.cancel_retry();
        self.attempt.store(0, Ordering::SeqCst);
        self.set_status(SyncStatus::Idle);
    }

    /// Leaves backoff once no retry is left to wait for.
    fn settle_skipped(&self) {
        if self.status() == SyncStatus::Backoff && !self.retry_pending() {
            self.set_status(SyncStatus::Idle);
        }
    }

    fn begin_flight(&self) -> Option<FlightGuard<'_>> {
        let mut flight = self.flight.lock();
        if flight.in_flight {
            return None;
        }
        flight.in_flight = true;
        Some(FlightGuard {
            flight: &self.flight,
        })
    }

    fn preflight(&self) -> Result<Arc<R>, SkipReason> {
        let remote = self.remote.read().clone();
        let remote = remote.ok_or(SkipReason::NoRemote)?;
        if !self.session_ready.load(Ordering::SeqCst) {
            return Err(SkipReason::NoSession);
        }
        if self.machine.lock().network().is_offline() {
            return Err(SkipReason::Offline);
        }
        Ok(remote)
    }

    async fn run(&self, remote: &R) -> SyncResult<FlushReport> {
        if !remote.session_active().await? {
            return Err(SyncError::NoSession);
        }

        let mut report = FlushReport::default();
        self.send_pending(remote, &mut report).await?;

        self.set_status(SyncStatus::Pulling);
        let since = self.cursor.lock().clone();
        let updates = self
            .outbox
            .pull_in_session(remote, since.clone(), self.pull_rows)
            .await?;
        let cursor = updates.cursor.clone().or(since);
        *self.cursor.lock() = cursor.clone();
        self.journal.save_cursor(cursor.clone());

        report.pulled_rows = updates.total_rows();
        report.cursor = cursor;
        self.emit(SyncEvent::Pulled { updates });
        Ok(report)
    }

    async fn send_pending(&self, remote: &R, report: &mut FlushReport) -> SyncResult<()> {
        let batch = {
            let machine = self.machine.lock();
            let network = machine.network();
            let limit = self
                .backend_batch
                .min(machine.limits().for_network(&network));
            machine.peek_batch(limit)
        };
        if batch.is_empty() {
            return Ok(());
        }

        self.set_status(SyncStatus::Sending);
        let mut attempted = Vec::with_capacity(batch.len());
        let mut drafts = Vec::with_capacity(batch.len());
        for action in batch {
            match action.send_message_payload() {
                Some(payload) => {
                    drafts.push(
                        MessageDraft::from_payload(payload)
                            .with_client_id(action.id.clone())
                            .with_created_at(action.created_at),
                    );
                    attempted.push(action);
                }
                None => {
                    warn!(id = %action.id, "dropping action with unreadable payload");
                    report.dropped.push(action.id);
                }
            }
        }

        if !drafts.is_empty() {
            let requested = drafts.len();
            let (sent, records, rejected) =
                match self.outbox.send_in_session(remote, drafts, requested).await? {
                    SendOutcome::Skipped { rejected } => (Vec::new(), Vec::new(), rejected),
                    SendOutcome::Transmitted {
                        sent,
                        records,
                        rejected,
                    } => (sent, records, rejected),
                };

            let sent_ids: HashSet<&str> =
                sent.iter().filter_map(|m| m.client_id.as_deref()).collect();
            for rejection in &rejected {
                if let Some(id) = rejection.draft.client_id.as_deref() {
                    debug!(id, reason = %rejection.reason, "dropping rejected action");
                    report.dropped.push(id.to_string());
                }
            }
            let actions: Vec<PendingAction> = attempted
                .into_iter()
                .filter(|action| sent_ids.contains(action.id.as_str()))
                .collect();

            report.sent = actions.iter().map(|a| a.id.clone()).collect();
            report.records = records.len();
            self.acknowledge(report.sent.iter().chain(&report.dropped));
            self.emit(SyncEvent::Sent {
                actions,
                records,
                rejected,
            });
        } else {
            self.acknowledge(&report.dropped);
        }
        Ok(())
    }

    fn acknowledge<'a>(&self, ids: impl IntoIterator<Item = &'a String>) {
        let snapshot: Vec<PendingAction> = {
            let mut machine = self.machine.lock();
            if machine.acknowledge(ids.into_iter().map(String::as_str)) == 0 {
                return;
            }
            machine.pending().cloned().collect()
        };
        self.journal.save_pending(snapshot);
    }

    fn status(&self) -> SyncStatus {
        self.flight.lock().status
    }

    fn retry_pending(&self) -> bool {
        self.retry
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn set_status(&self, status: SyncStatus) {
        {
            let mut flight = self.flight.lock();
            if flight.status == status {
                return;
            }
            flight.status = status;
        }
        self.emit(SyncEvent::Status(status));
    }

    fn emit(&self, event: SyncEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn schedule_retry(self: &Arc<Self>, delay: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // Release our own slot so the flush below can schedule the next one
            inner.retry.lock().take();
            debug!("backoff elapsed, retrying flush");
            inner.flush().await;
        });
        if let Some(previous) = self.retry.lock().replace(handle) {
            previous.abort();
        }
    }

    fn cancel_retry(&self) {
        if let Some(handle) = self.retry.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MockRemote, RemoteCall};
    use offsync_storage::InMemoryStore;
    use serde_json::json;

    type Engine = SyncOrchestrator<MockRemote, Arc<InMemoryStore>>;

    fn preload(store: &Arc<InMemoryStore>, actions: &[PendingAction], cursor: Option<&str>) {
        let journal = SyncJournal::new(Arc::clone(store));
        journal.save_pending(actions).unwrap();
        journal.save_cursor(cursor.map(Cursor::new).as_ref()).unwrap();
    }

    fn actions(bodies: &[&str]) -> Vec<PendingAction> {
        bodies
            .iter()
            .enumerate()
            .map(|(i, body)| PendingAction::send_message("conv", *body).with_id(format!("a{i}")))
            .collect()
    }

    fn engine(store: &Arc<InMemoryStore>, network: NetworkState) -> (Engine, Arc<MockRemote>) {
        let engine = SyncOrchestrator::open(SyncConfig::default(), Arc::clone(store), network);
        let remote = Arc::new(MockRemote::new());
        engine.attach_remote(Arc::clone(&remote));
        (engine, remote)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn reconnect_flushes_in_order_then_pulls() {
        let store = Arc::new(InMemoryStore::new());
        preload(&store, &actions(&["one", "two", "three"]), Some("c0"));
        let (engine, remote) = engine(&store, NetworkState::offline());
        remote.push_pull_result(Ok(json!({
            "messages": [{"id": "m9"}],
            "cursor": "c1",
        })));

        let outcome = engine.handle_network_change(NetworkState::wifi()).await;
        let Some(FlushOutcome::Completed(report)) = outcome else {
            panic!("expected a completed flush");
        };

        let calls = remote.calls();
        assert_eq!(calls.len(), 2);
        let RemoteCall::Send(batch) = &calls[0] else {
            panic!("send must come first");
        };
        let bodies: Vec<_> = batch.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["one", "two", "three"]);
        assert_eq!(batch[0].client_id.as_deref(), Some("a0"));
        assert_eq!(
            calls[1],
            RemoteCall::Pull {
                since: Some(Cursor::new("c0")),
                max_rows: 200
            }
        );

        assert_eq!(report.sent, ["a0", "a1", "a2"]);
        assert_eq!(report.pulled_rows, 1);
        assert!(engine.pending().is_empty());
        assert_eq!(engine.cursor(), Some(Cursor::new("c1")));
        assert_eq!(engine.status(), SyncStatus::Idle);
        assert_eq!(remote.session_checks(), 1);

        engine.wait_persisted().await;
        let journal = SyncJournal::new(Arc::clone(&store));
        assert!(journal.load_pending().unwrap().is_empty());
        assert_eq!(journal.load_cursor().unwrap(), Some(Cursor::new("c1")));
    }

    #[tokio::test]
    async fn cursor_kept_when_response_has_none() {
        let store = Arc::new(InMemoryStore::new());
        preload(&store, &[], Some("c5"));
        let (engine, _remote) = engine(&store, NetworkState::wifi());

        assert!(engine.flush().await.is_completed());
        assert_eq!(engine.cursor(), Some(Cursor::new("c5")));
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_schedules_single_retry() {
        let store = Arc::new(InMemoryStore::new());
        preload(&store, &actions(&["hello"]), None);
        let (engine, remote) = engine(&store, NetworkState::wifi());
        remote.fail_next_send("connection reset");

        let outcome = engine.flush().await;
        let FlushOutcome::Failed { error, retry_in } = outcome else {
            panic!("expected a failed flush");
        };
        assert!(error.is_retryable());
        assert_eq!(retry_in, Some(Duration::from_millis(2000)));
        assert_eq!(engine.status(), SyncStatus::Backoff);
        assert_eq!(engine.pending().len(), 1);
        assert_eq!(engine.failure_count(), 1);
        assert!(engine.retry_scheduled());

        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert_eq!(remote.sent_batches().len(), 1);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(remote.sent_batches().len(), 2);
        assert!(engine.pending().is_empty());
        assert_eq!(engine.status(), SyncStatus::Idle);
        assert_eq!(engine.failure_count(), 0);
        assert!(!engine.retry_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_scales_with_link_and_attempts() {
        let store = Arc::new(InMemoryStore::new());
        let network = NetworkState::satellite();
        let (engine, remote) = engine(&store, network);
        remote.fail_next_pull("timeout");
        remote.fail_next_pull("timeout");

        let FlushOutcome::Failed { retry_in, .. } = engine.flush().await else {
            panic!("first flush should fail");
        };
        assert_eq!(retry_in, Some(Duration::from_millis(4000)));

        // The retry fires and fails again
        tokio::time::sleep(Duration::from_millis(4001)).await;
        assert_eq!(remote.pulled_since().len(), 2);
        assert_eq!(engine.failure_count(), 2);
        assert!(engine.retry_scheduled());

        tokio::time::sleep(Duration::from_millis(8001)).await;
        assert_eq!(remote.pulled_since().len(), 3);
        assert_eq!(engine.status(), SyncStatus::Idle);
    }

    #[tokio::test]
    async fn ultra_constrained_backoff_multiplier() {
        let store = Arc::new(InMemoryStore::new());
        let network = NetworkState::cellular().with_ultra_constrained(true);
        let (engine, remote) = engine(&store, network);
        remote.fail_next_pull("timeout");

        let FlushOutcome::Failed { retry_in, .. } = engine.flush().await else {
            panic!("flush should fail");
        };
        assert_eq!(retry_in, Some(Duration::from_millis(8000)));
        engine.end_session();
    }

    #[tokio::test]
    async fn overlapping_flush_is_dropped() {
        let store = Arc::new(InMemoryStore::new());
        preload(&store, &actions(&["a"]), None);
        let (engine, remote) = engine(&store, NetworkState::wifi());
        let engine = Arc::new(engine);
        remote.pause_sends();

        let first = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.flush().await }
        });
        while remote.sent_batches().is_empty() {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            engine.flush().await,
            FlushOutcome::AlreadyInFlight
        ));
        assert_eq!(engine.status(), SyncStatus::Sending);

        remote.resume_sends();
        assert!(first.await.unwrap().is_completed());
        assert_eq!(remote.sent_batches().len(), 1);
        assert!(engine.flush().await.is_completed());
    }

    #[tokio::test]
    async fn queue_survives_reopen() {
        let store = Arc::new(InMemoryStore::new());
        let queued = actions(&["first", "second"]);
        {
            let (engine, _remote) = engine(&store, NetworkState::offline());
            for action in &queued {
                let outcome = engine.enqueue(action.clone()).await;
                assert!(matches!(outcome, FlushOutcome::Skipped(SkipReason::Offline)));
            }
        }

        let (engine, _remote) = engine(&store, NetworkState::offline());
        assert_eq!(engine.pending(), queued);
    }

    #[tokio::test]
    async fn store_failure_never_fails_enqueue() {
        let store = Arc::new(InMemoryStore::new());
        store.set_unavailable(true);
        let (engine, remote) = engine(&store, NetworkState::wifi());

        let outcome = engine
            .enqueue(PendingAction::send_message("c", "still works"))
            .await;
        assert!(outcome.is_completed());
        assert_eq!(remote.sent_batches().len(), 1);
        assert_eq!(engine.cursor(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn end_session_cancels_retry() {
        let store = Arc::new(InMemoryStore::new());
        preload(&store, &actions(&["a"]), None);
        let (engine, remote) = engine(&store, NetworkState::wifi());
        remote.fail_next_send("boom");

        assert!(matches!(engine.flush().await, FlushOutcome::Failed { .. }));
        assert!(engine.retry_scheduled());

        engine.end_session();
        assert!(!engine.retry_scheduled());
        assert_eq!(engine.status(), SyncStatus::Idle);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(remote.sent_batches().len(), 1);
        assert_eq!(engine.pending().len(), 1);
        assert!(matches!(
            engine.flush().await,
            FlushOutcome::Skipped(SkipReason::NoSession)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn skipped_retry_leaves_backoff() {
        let store = Arc::new(InMemoryStore::new());
        preload(&store, &actions(&["a"]), None);
        let (engine, remote) = engine(&store, NetworkState::wifi());
        remote.fail_next_send("connection reset");

        assert!(matches!(engine.flush().await, FlushOutcome::Failed { .. }));
        assert!(engine
            .handle_network_change(NetworkState::offline())
            .await
            .is_none());
        assert_eq!(engine.status(), SyncStatus::Backoff);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(engine.status(), SyncStatus::Idle);
        assert!(!engine.retry_scheduled());
        assert_eq!(remote.sent_batches().len(), 1);
        assert_eq!(engine.pending().len(), 1);
    }

    #[tokio::test]
    async fn failure_after_end_session_schedules_nothing() {
        let store = Arc::new(InMemoryStore::new());
        preload(&store, &actions(&["a"]), None);
        let (engine, remote) = engine(&store, NetworkState::wifi());
        let engine = Arc::new(engine);
        remote.pause_sends();
        remote.fail_next_send("connection reset");

        let flight = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.flush().await }
        });
        while remote.sent_batches().is_empty() {
            tokio::task::yield_now().await;
        }
        engine.end_session();
        remote.resume_sends();

        let FlushOutcome::Failed { retry_in, .. } = flight.await.unwrap() else {
            panic!("the send was scripted to fail");
        };
        assert_eq!(retry_in, None);
        assert!(!engine.retry_scheduled());
        assert_eq!(engine.status(), SyncStatus::Idle);
        assert_eq!(engine.failure_count(), 0);
        assert_eq!(engine.pending().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_still_retry() {
        let store = Arc::new(InMemoryStore::new());
        preload(&store, &actions(&["a"]), None);
        let (engine, remote) = engine(&store, NetworkState::wifi());
        remote.push_send_result(Err(SyncError::transport_fatal("certificate rejected")));

        let FlushOutcome::Failed { error, retry_in } = engine.flush().await else {
            panic!("flush should fail");
        };
        assert!(!error.is_retryable());
        assert_eq!(retry_in, Some(Duration::from_millis(2000)));
        assert_eq!(engine.status(), SyncStatus::Backoff);

        tokio::time::sleep(Duration::from_millis(2001)).await;
        assert_eq!(remote.sent_batches().len(), 2);
        assert!(engine.pending().is_empty());
        assert_eq!(engine.status(), SyncStatus::Idle);
    }

    #[tokio::test]
    async fn session_is_checked_once_per_flush() {
        let store = Arc::new(InMemoryStore::new());
        preload(&store, &actions(&["a", "b"]), None);
        let (engine, remote) = engine(&store, NetworkState::wifi());

        assert!(engine.flush().await.is_completed());
        assert!(engine.flush().await.is_completed());
        assert_eq!(remote.session_checks(), 2);
        assert_eq!(remote.calls().len(), 3);
    }

    /// Store whose writes wait for the test to release them.
    #[derive(Debug)]
    struct GatedStore {
        inner: InMemoryStore,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl KeyValueStore for GatedStore {
        fn get(&self, key: &str) -> offsync_storage::StorageResult<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &[u8]) -> offsync_storage::StorageResult<()> {
            // Disconnected means released
            let _ = self.release.lock().recv();
            self.inner.set(key, value)
        }

        fn delete(&self, key: &str) -> offsync_storage::StorageResult<()> {
            self.inner.delete(key)
        }
    }

    #[tokio::test]
    async fn slow_store_does_not_hold_up_the_queue() {
        let (release, gate) = std::sync::mpsc::channel();
        let store = Arc::new(GatedStore {
            inner: InMemoryStore::new(),
            release: Mutex::new(gate),
        });
        let engine: SyncOrchestrator<MockRemote, _> =
            SyncOrchestrator::open(SyncConfig::default(), Arc::clone(&store), NetworkState::offline());

        let outcome = engine
            .enqueue(PendingAction::send_message("c", "queued").with_id("q1"))
            .await;
        assert!(matches!(outcome, FlushOutcome::Skipped(SkipReason::Offline)));
        assert_eq!(engine.pending().len(), 1);
        assert_eq!(engine.current_state(), SyncState::Offline);
        assert!(store.inner.is_empty());

        drop(release);
        engine.wait_persisted().await;
        let saved = SyncJournal::new(Arc::clone(&store)).load_pending().unwrap();
        assert_eq!(saved, engine.pending());
    }

    #[tokio::test]
    async fn preconditions_skip_without_calls() {
        let store = Arc::new(InMemoryStore::new());
        preload(&store, &actions(&["a"]), None);
        let (engine, remote) = engine(&store, NetworkState::wifi());

        remote.set_session_active(false);
        assert!(matches!(
            engine.flush().await,
            FlushOutcome::Skipped(SkipReason::NoSession)
        ));
        assert_eq!(engine.failure_count(), 0);
        assert!(!engine.retry_scheduled());

        engine.detach_remote();
        assert!(matches!(
            engine.flush().await,
            FlushOutcome::Skipped(SkipReason::NoRemote)
        ));
        assert!(remote.calls().is_empty());
        assert_eq!(engine.pending().len(), 1);
    }

    #[tokio::test]
    async fn satellite_link_sends_constrained_batch() {
        let store = Arc::new(InMemoryStore::new());
        preload(&store, &actions(&["1", "2", "3", "4", "5", "6", "7"]), None);
        let (engine, remote) = engine(&store, NetworkState::wifi().with_constrained(true));

        assert!(engine.flush().await.is_completed());
        assert_eq!(remote.sent_batches()[0].len(), 5);
        let remaining: Vec<_> = engine.pending().into_iter().map(|a| a.id).collect();
        assert_eq!(remaining, ["a5", "a6"]);
    }

    #[tokio::test]
    async fn rejected_actions_leave_the_queue() {
        let store = Arc::new(InMemoryStore::new());
        preload(&store, &actions(&["keep", "   "]), None);
        let (engine, remote) = engine(&store, NetworkState::wifi());
        let mut events = engine.subscribe();

        let FlushOutcome::Completed(report) = engine.flush().await else {
            panic!("flush should complete");
        };
        assert_eq!(report.sent, ["a0"]);
        assert_eq!(report.dropped, ["a1"]);
        assert!(engine.pending().is_empty());
        assert_eq!(remote.sent_batches()[0].len(), 1);

        let events = drain(&mut events);
        assert!(matches!(events[0], SyncEvent::Status(SyncStatus::Sending)));
        let SyncEvent::Sent {
            actions,
            records,
            rejected,
        } = &events[1]
        else {
            panic!("expected a sent event, got {:?}", events[1]);
        };
        assert_eq!(actions.len(), 1);
        assert_eq!(records.len(), 1);
        assert_eq!(rejected.len(), 1);
        assert!(matches!(events[2], SyncEvent::Status(SyncStatus::Pulling)));
        assert!(matches!(events[3], SyncEvent::Pulled { .. }));
        assert!(matches!(events[4], SyncEvent::Status(SyncStatus::Idle)));
    }

    #[tokio::test]
    async fn unreadable_payload_is_dropped() {
        let store = Arc::new(InMemoryStore::new());
        let broken = PendingAction::new(
            offsync_protocol::ActionKind::SendMessage,
            json!({"unexpected": true}),
        )
        .with_id("bad");
        preload(&store, &[broken], None);
        let (engine, remote) = engine(&store, NetworkState::wifi());

        let FlushOutcome::Completed(report) = engine.flush().await else {
            panic!("flush should complete");
        };
        assert_eq!(report.dropped, ["bad"]);
        assert!(remote.sent_batches().is_empty());
        assert!(engine.pending().is_empty());
    }

    #[tokio::test]
    async fn going_offline_does_not_flush() {
        let store = Arc::new(InMemoryStore::new());
        preload(&store, &actions(&["a"]), None);
        let (engine, remote) = engine(&store, NetworkState::wifi());

        assert!(engine
            .handle_network_change(NetworkState::offline())
            .await
            .is_none());
        assert_eq!(engine.current_state(), SyncState::Offline);
        assert!(remote.calls().is_empty());
    }
}
