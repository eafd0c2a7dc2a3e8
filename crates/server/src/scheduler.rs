//! Periodic cleanup trigger.
//!
//! Cleanup also runs at the head of every actor operation, so the cadence
//! here only bounds how long expired blobs linger on a quiet instance.

use crate::state::AppState;
use std::time::Duration;

/// Spawn the background cleanup task.
pub fn spawn_cleanup_task(state: AppState, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match state.actor.cleanup().await {
                Ok(retired) => {
                    if !retired.is_empty() {
                        tracing::debug!(count = retired.len(), "cleanup retired expired blobs");
                        state.schedule_deletes(retired);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "scheduled cleanup failed");
                }
            }
        }
    })
}
