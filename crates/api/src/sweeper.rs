//! Periodic cleanup of abandoned located sagas.

use std::time::Duration;

use saga::CorrelationStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Spawns a task that drops `Located` records older than `ttl` every
/// `interval` until `shutdown` is cancelled.
pub fn spawn_sweeper(
    store: CorrelationStore,
    ttl: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let purged = store.purge_stale(ttl);
                    if purged > 0 {
                        metrics::counter!("saga_expired_total").increment(purged as u64);
                    }
                }
            }
        }
        tracing::debug!("sweeper stopped");
    })
}
