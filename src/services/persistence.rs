//! Persistence service — periodic sweep of dirty whiteboard state.
//!
//! DESIGN
//! ======
//! A background task wakes every `persist_interval`, copies dirty cache
//! entries out under the lock, releases it, then writes each state with
//! `replace_state`. The hot path (update events) only touches memory.
//!
//! After writing, clean entries whose room has no connected clients are
//! evicted so the cache does not grow with every whiteboard ever touched.
//! Settled stroke buffers for those whiteboards go the same way.
//!
//! ERROR HANDLING
//! ==============
//! An entry is marked flushed only after its write succeeds, and only if no
//! newer update arrived meanwhile. A failed board is logged and retried on
//! the next sweep; it does not stop the others.

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::state::AppState;

/// Spawn the background persistence task. Returns a handle for shutdown.
pub fn spawn_persistence_task(state: AppState) -> JoinHandle<()> {
    let persist_interval = state.config.persist_interval;
    info!(persist_interval_ms = persist_interval.as_millis(), "state persistence sweep configured");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(persist_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep(&state).await;
        }
    })
}

/// Write every dirty cached state to the store, then evict idle clean
/// entries. Returns the number of states written.
pub async fn sweep(state: &AppState) -> usize {
    // PHASE: SNAPSHOT DIRTY STATES
    // Clone under lock, perform I/O lock-free.
    let dirty = state.cache.dirty();

    // PHASE: WRITE
    let mut written = 0;
    for entry in dirty {
        match state.store.replace_state(entry.whiteboard_id, &entry.state).await {
            Ok(()) => {
                state.cache.mark_flushed(entry.whiteboard_id, entry.version);
                written += 1;
            }
            Err(e) => {
                error!(error = %e, whiteboard_id = %entry.whiteboard_id, "persistence: state write failed");
            }
        }
    }

    // PHASE: EVICT
    let evicted = state.cache.evict_clean(|id| state.registry.has_room(id));
    let buffers = state.coalescer.evict_settled(|id| state.registry.has_room(id));
    if written > 0 || evicted > 0 || buffers > 0 {
        debug!(written, evicted, buffers, "persistence: sweep complete");
    }
    written
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
