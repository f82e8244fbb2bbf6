//! Background keepalive sweeper.
//!
//! Runs on a fixed period. Each cycle enqueues a ping on every live
//! connection and evicts the ones whose last delivered ping is older than
//! the stale threshold. Eviction uses the same teardown path as any other
//! close. The sweeper never touches a connection's stream directly; it only
//! enqueues items and removes table entries.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{StreamItem, STALE_AFTER, SWEEP_INTERVAL};
use crate::state::AppState;

/// Spawn the sweeper task. It stops when `shutdown` flips.
pub fn spawn(state: AppState, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // interval fires immediately; the first sweep should wait a period
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => sweep_once(&state, STALE_AFTER),
                _ = shutdown.changed() => {
                    debug!("Keepalive sweeper stopped");
                    break;
                }
            }
        }
    })
}

/// One sweep cycle over all live connections.
pub fn sweep_once(state: &AppState, stale_after: Duration) {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let mut stale = Vec::new();

    for connection in state.connections().all() {
        if connection.last_ping_elapsed() > stale_after {
            stale.push(connection.id.clone());
        } else if let Err(e) = connection.enqueue(StreamItem::Ping(now_ms)) {
            warn!("Failed to queue ping for {}: {}", connection.id, e);
        }
    }

    for id in stale {
        info!("Closing stale connection: {}", id);
        state.close_connection(&id);
    }
}
