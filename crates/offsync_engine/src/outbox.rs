//! Send and pull paths against the remote.
//!
//! The outbox is the only place that talks to [`SyncRemote`]. Both paths
//! check the session first and fail fast without one; the send path then
//! sanitizes and clamps before anything is transmitted. Callers that have
//! already checked the session for the current cycle use the
//! `*_in_session` variants, which skip the extra round trip.

use crate::config::BackendLimits;
use crate::error::{SyncError, SyncResult};
use crate::limiter::BatchLimiter;
use crate::reconciler::PullReconciler;
use crate::remote::SyncRemote;
use crate::sanitizer::{MessageSanitizer, SanitizedMessageRejection};
use offsync_protocol::{Cursor, MessageDraft, OutboundMessage, PulledUpdates};
use serde_json::Value;
use tracing::debug;

/// Result of a send call.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// Nothing survived validation and clamping; the remote was not called.
    Skipped {
        /// Drafts refused by the sanitizer.
        rejected: Vec<SanitizedMessageRejection>,
    },
    /// The batch was transmitted.
    Transmitted {
        /// Messages sent, in order.
        sent: Vec<OutboundMessage>,
        /// Records returned by the remote (possibly none).
        records: Vec<Value>,
        /// Drafts refused by the sanitizer.
        rejected: Vec<SanitizedMessageRejection>,
    },
}

impl SendOutcome {
    /// Returns true if the remote was called.
    pub fn is_transmitted(&self) -> bool {
        matches!(self, SendOutcome::Transmitted { .. })
    }

    /// Messages that were sent.
    pub fn sent(&self) -> &[OutboundMessage] {
        match self {
            SendOutcome::Skipped { .. } => &[],
            SendOutcome::Transmitted { sent, .. } => sent,
        }
    }

    /// Records the remote returned.
    pub fn records(&self) -> &[Value] {
        match self {
            SendOutcome::Skipped { .. } => &[],
            SendOutcome::Transmitted { records, .. } => records,
        }
    }

    /// Drafts refused by the sanitizer.
    pub fn rejected(&self) -> &[SanitizedMessageRejection] {
        match self {
            SendOutcome::Skipped { rejected } | SendOutcome::Transmitted { rejected, .. } => {
                rejected
            }
        }
    }
}

/// Validating front end to the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outbox {
    sanitizer: MessageSanitizer,
    limiter: BatchLimiter,
    pull_ceiling: BatchLimiter,
}

impl Outbox {
    /// Creates an outbox for the given backend ceilings.
    pub fn new(limits: BackendLimits) -> Self {
        Self {
            sanitizer: MessageSanitizer::new(limits.max_message_bytes),
            limiter: BatchLimiter::new(limits.max_message_batch),
            pull_ceiling: BatchLimiter::new(limits.max_pull_limit as usize),
        }
    }

    /// The sanitizer used on the send path.
    pub fn sanitizer(&self) -> &MessageSanitizer {
        &self.sanitizer
    }

    /// The limiter used on the send path.
    pub fn limiter(&self) -> &BatchLimiter {
        &self.limiter
    }

    /// Row cap actually sent for a requested pull size.
    pub fn effective_pull_rows(&self, requested: u32) -> u32 {
        self.pull_ceiling.effective_batch_size(requested as usize) as u32
    }

    /// Sanitizes, clamps and transmits a batch of drafts.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NoSession`] if no session exists (nothing is sanitized)
    /// - [`SyncError::BatchTooLarge`] if more than `requested` drafts are
    ///   accepted (nothing is transmitted)
    /// - Whatever the remote returns on failure
    pub async fn send<R: SyncRemote>(
        &self,
        remote: &R,
        drafts: Vec<MessageDraft>,
        requested: usize,
    ) -> SyncResult<SendOutcome> {
        ensure_session(remote).await?;
        self.send_in_session(remote, drafts, requested).await
    }

    /// Like [`Outbox::send`], without the session check.
    pub async fn send_in_session<R: SyncRemote>(
        &self,
        remote: &R,
        drafts: Vec<MessageDraft>,
        requested: usize,
    ) -> SyncResult<SendOutcome> {
        let batch = self.sanitizer.sanitize(drafts);
        let rejected = batch.rejected;
        let accepted = self.limiter.apply(requested, batch.accepted)?;

        if accepted.is_empty() {
            debug!(rejected = rejected.len(), "nothing to transmit");
            return Ok(SendOutcome::Skipped { rejected });
        }

        let sent: Vec<OutboundMessage> = accepted.iter().map(|a| a.to_outbound()).collect();
        debug!(
            count = sent.len(),
            rejected = rejected.len(),
            "sending message batch"
        );
        let records = remote.send_message_batch(sent.clone()).await?;

        Ok(SendOutcome::Transmitted {
            sent,
            records,
            rejected,
        })
    }

    /// Pulls updates since `since`, clamping the row cap to the backend
    /// ceiling.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NoSession`] if no session exists
    /// - Whatever the remote returns on failure
    pub async fn pull<R: SyncRemote>(
        &self,
        remote: &R,
        since: Option<Cursor>,
        requested_rows: u32,
    ) -> SyncResult<PulledUpdates> {
        ensure_session(remote).await?;
        self.pull_in_session(remote, since, requested_rows).await
    }

    /// Like [`Outbox::pull`], without the session check.
    pub async fn pull_in_session<R: SyncRemote>(
        &self,
        remote: &R,
        since: Option<Cursor>,
        requested_rows: u32,
    ) -> SyncResult<PulledUpdates> {
        let max_rows = self.effective_pull_rows(requested_rows);
        debug!(since = ?since, max_rows, "pulling updates");
        let raw = remote.pull_updates(since, max_rows).await?;
        Ok(PullReconciler::new(max_rows).reconcile(raw))
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new(BackendLimits::default())
    }
}

async fn ensure_session<R: SyncRemote>(remote: &R) -> SyncResult<()> {
    if remote.session_active().await? {
        Ok(())
    } else {
        Err(SyncError::NoSession)
    }
}
