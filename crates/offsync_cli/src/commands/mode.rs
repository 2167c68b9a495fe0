//! Mode command implementation.

use offsync_engine::{BackoffPolicy, SyncConfig, SyncState};
use offsync_protocol::{Connectivity, NetworkState};
use std::time::Duration;

/// What the engine would do on a given link.
#[derive(Debug, PartialEq, Eq)]
pub struct ModeReport {
    /// Derived mode.
    pub state: SyncState,
    /// Actions sent per flush.
    pub batch_limit: usize,
    /// Backoff multiplier.
    pub multiplier: u32,
    /// Delay after the first failure.
    pub first_retry: Duration,
}

/// Evaluates a network snapshot against a config.
pub fn evaluate(config: &SyncConfig, network: &NetworkState) -> ModeReport {
    let backend = config.backend_limits().max_message_batch;
    ModeReport {
        state: SyncState::derive(network),
        batch_limit: config.batch_limits().for_network(network).min(backend),
        multiplier: BackoffPolicy::multiplier(network),
        first_retry: config.backoff().delay_for(0, network),
    }
}

/// Runs the mode command.
pub fn run(config: &SyncConfig, connectivity: Connectivity, constrained: bool, ultra: bool) {
    let network = NetworkState::new(connectivity)
        .with_constrained(constrained)
        .with_ultra_constrained(ultra);
    let report = evaluate(config, &network);

    println!("Network:     {connectivity} (constrained: {constrained}, ultra: {ultra})");
    println!("Mode:        {}", report.state);
    println!("Batch limit: {}", report.batch_limit);
    println!("Backoff:     x{} (first retry after {:?})", report.multiplier, report.first_retry);
}
