//! Periodic pending/idle report

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::core::Shared;

/// Log schedule sizes every heartbeat interval until aborted
///
/// Read-only: takes the lock just long enough to count.
pub(super) async fn run(shared: Arc<Shared>) {
    let mut ticker = tokio::time::interval(shared.config.heartbeat_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // First tick fires immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        debug!("Checker heartbeat");

        let stats = shared.stats().await;
        info!(
            pending = stats.pending,
            idle = stats.idle,
            "Pending services: {}; Idle services: {}",
            stats.pending,
            stats.idle
        );
    }
}
