//! Weekly session lifecycle sweeper.
//!
//! Runs independently of request handling and holds no per-request state:
//! every `interval` it deactivates sessions idle longer than `max_idle`.

use std::time::Duration;

use crate::store::SessionStore;

/// Spawn the background sweep task. Aborting the handle stops it.
pub fn spawn(
    store: SessionStore,
    interval: Duration,
    max_idle: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick: sweep once at boot.
        loop {
            ticker.tick().await;
            match store.deactivate_older_than(max_idle).await {
                Ok(0) => tracing::debug!("session sweep: nothing to deactivate"),
                Ok(count) => tracing::info!(count, "session sweep: deactivated stale sessions"),
                Err(e) => tracing::warn!(error = %e, "session sweep failed"),
            }
        }
    })
}
