//! Idempotency guard — dedup for externally-retried events.
//!
//! Sources like inbound webhooks redeliver on timeout; the guard turns
//! "insert a ticket keyed by the external id" into the dedup signal. The
//! insert is a single constrained statement, so it is race-free under
//! concurrent delivery — no read-then-write window.

use std::sync::Arc;

use tracing::debug;

use crate::error::DatabaseError;
use crate::store::Store;

/// Outcome of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// First delivery — the caller owns processing.
    Claimed,
    /// Already handled. The caller must ack the source and skip processing;
    /// this is a success no-op, not an error.
    Duplicate,
}

/// Deduplicates events by an externally-supplied identifier.
pub struct IdempotencyGuard {
    store: Arc<dyn Store>,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Attempt to claim an external event id.
    ///
    /// A unique-constraint conflict on the ticket insert means another
    /// delivery got there first; every other storage error propagates.
    pub async fn claim(&self, external_id: &str) -> Result<Claim, DatabaseError> {
        match self.store.insert_idempotency_ticket(external_id).await {
            Ok(()) => Ok(Claim::Claimed),
            Err(DatabaseError::Constraint(_)) => {
                debug!(external_id, "Duplicate delivery detected, skipping");
                Ok(Claim::Duplicate)
            }
            Err(e) => Err(e),
        }
    }
}
