//! Mail sync — drains pending events through the dispatch coordinator.
//!
//! Runs under the single-flight sync lock: overlapping or too-frequent runs
//! are skipped, not queued. Events that fail to dispatch stay pending and
//! are retried on the next tick.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::dispatch::DispatchCoordinator;
use crate::ingest::sync_lock::{Acquire, SyncLock};
use crate::store::Store;

/// One sync pass: load pending events, dispatch each, mark processed.
///
/// Lock contention is a normal outcome — the caller backs off until the
/// next scheduled tick.
pub async fn run_mail_sync(
    store: &Arc<dyn Store>,
    coordinator: &Arc<DispatchCoordinator>,
    lock: &SyncLock,
) {
    let _permit = match lock.try_acquire("mail-sync") {
        Acquire::Allowed(permit) => permit,
        Acquire::Busy { reason, remaining } => {
            debug!(?reason, ?remaining, "Sync skipped: lock busy");
            return;
        }
    };

    let pending = match store.list_pending_events().await {
        Ok(events) => events,
        Err(e) => {
            error!("Failed to load pending events: {e}");
            return;
        }
    };

    if pending.is_empty() {
        return;
    }

    info!("Dispatching {} pending event(s)", pending.len());

    for event in &pending {
        match coordinator.dispatch_event(event).await {
            Ok(outcomes) => {
                debug!(
                    event_id = %event.id,
                    rules = outcomes.len(),
                    "Event dispatched"
                );
                if let Err(e) = store.mark_event_processed(event.id).await {
                    error!(event_id = %event.id, error = %e, "Failed to mark event processed");
                }
            }
            Err(e) => {
                // Leave as pending — retried on the next tick.
                error!(event_id = %event.id, error = %e, "Failed to dispatch event");
            }
        }
    }
}
