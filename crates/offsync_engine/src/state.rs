//! Network-driven sync state machine.

use offsync_protocol::{Connectivity, NetworkState, PendingAction};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use tracing::debug;

/// Operating mode derived from the latest network snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// No link; nothing is sent.
    Offline,
    /// Expensive or degraded link; small batches.
    Satellite,
    /// Unconstrained link.
    Normal,
}

impl SyncState {
    /// Derives the mode from a network snapshot.
    ///
    /// Priority: offline connectivity wins, then any degraded signal
    /// (satellite link, constrained, ultra-constrained), then normal.
    /// A constrained wifi or cellular link is treated exactly like a
    /// satellite one.
    pub fn derive(network: &NetworkState) -> Self {
        if network.connectivity == Connectivity::Offline {
            SyncState::Offline
        } else if network.is_degraded() {
            SyncState::Satellite
        } else {
            SyncState::Normal
        }
    }

    /// Returns true if anything may be sent in this mode.
    pub fn can_send(&self) -> bool {
        !matches!(self, SyncState::Offline)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncState::Offline => "offline",
            SyncState::Satellite => "satellite",
            SyncState::Normal => "normal",
        })
    }
}

/// Per-mode batch targets.
///
/// Every limit is floored to 1 whatever the caller supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    normal: usize,
    satellite: usize,
    ultra: usize,
}

impl BatchLimits {
    /// Creates limits for the normal and satellite modes.
    ///
    /// The ultra-constrained limit defaults to the satellite one.
    pub fn new(normal: usize, satellite: usize) -> Self {
        let satellite = satellite.max(1);
        Self {
            normal: normal.max(1),
            satellite,
            ultra: satellite,
        }
    }

    /// Sets the ultra-constrained limit.
    pub fn with_ultra(mut self, ultra: usize) -> Self {
        self.ultra = ultra.max(1);
        self
    }

    /// Limit on an unconstrained link.
    pub fn normal(&self) -> usize {
        self.normal
    }

    /// Limit on a satellite or constrained link.
    pub fn satellite(&self) -> usize {
        self.satellite
    }

    /// Limit on an ultra-constrained link.
    pub fn ultra(&self) -> usize {
        self.ultra
    }

    /// Limit for a mode; zero while offline.
    pub fn for_state(&self, state: SyncState) -> usize {
        match state {
            SyncState::Offline => 0,
            SyncState::Satellite => self.satellite,
            SyncState::Normal => self.normal,
        }
    }

    /// Most restrictive limit that applies to a link:
    /// ultra-constrained, then constrained/satellite, then normal.
    pub fn for_network(&self, network: &NetworkState) -> usize {
        if network.is_offline() {
            0
        } else if network.ultra_constrained {
            self.ultra
        } else if network.is_degraded() {
            self.satellite
        } else {
            self.normal
        }
    }
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self::new(25, 5).with_ultra(1)
    }
}

/// Derives the operating mode and owns the pending-action queue.
///
/// # Invariants
///
/// - `current_state()` is a pure function of the latest snapshot
/// - The queue is FIFO; nothing reorders it
/// - An offline state machine never hands out actions
#[derive(Debug, Clone)]
pub struct SyncStateMachine {
    network: NetworkState,
    state: SyncState,
    limits: BatchLimits,
    queue: VecDeque<PendingAction>,
}

impl SyncStateMachine {
    /// Creates a state machine with an empty queue.
    pub fn new(network: NetworkState, limits: BatchLimits) -> Self {
        Self::with_pending(network, limits, Vec::new())
    }

    /// Creates a state machine with a queue restored from storage.
    pub fn with_pending(
        network: NetworkState,
        limits: BatchLimits,
        pending: impl IntoIterator<Item = PendingAction>,
    ) -> Self {
        Self {
            network,
            state: SyncState::derive(&network),
            limits,
            queue: pending.into_iter().collect(),
        }
    }

    /// Current operating mode.
    pub fn current_state(&self) -> SyncState {
        self.state
    }

    /// Latest network snapshot.
    pub fn network(&self) -> NetworkState {
        self.network
    }

    /// Configured limits.
    pub fn limits(&self) -> BatchLimits {
        self.limits
    }

    /// Batch limit for the current mode.
    pub fn batch_limit(&self) -> usize {
        self.limits.for_state(self.state)
    }

    /// Applies a new network snapshot. The queue is untouched.
    pub fn handle_network_change(&mut self, network: NetworkState) -> SyncState {
        let next = SyncState::derive(&network);
        if next != self.state {
            debug!(from = %self.state, to = %next, "sync mode changed");
        }
        self.network = network;
        self.state = next;
        next
    }

    /// Appends an action to the tail of the queue.
    pub fn enqueue(&mut self, action: PendingAction) {
        self.queue.push_back(action);
    }

    /// Removes and returns up to the mode's limit from the head.
    ///
    /// Offline returns an empty batch and leaves the queue alone.
    pub fn dequeue_batch(&mut self) -> Vec<PendingAction> {
        let limit = self.batch_limit().min(self.queue.len());
        self.queue.drain(..limit).collect()
    }

    /// Returns up to `limit` actions from the head without removing them.
    pub fn peek_batch(&self, limit: usize) -> Vec<PendingAction> {
        self.queue.iter().take(limit).cloned().collect()
    }

    /// Removes exactly the actions with the given ids.
    ///
    /// Returns the number removed. The remaining actions keep their order.
    pub fn acknowledge<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) -> usize {
        let ids: HashSet<&str> = ids.into_iter().collect();
        let before = self.queue.len();
        self.queue.retain(|action| !ids.contains(action.id.as_str()));
        before - self.queue.len()
    }

    /// Queued actions, head first.
    pub fn pending(&self) -> impl Iterator<Item = &PendingAction> {
        self.queue.iter()
    }

    /// Number of queued actions.
    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    /// Drops every queued action.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
