//! Single-flight sync lock with cooldown.
//!
//! The ingestion source (IMAP polling) is a shared, rate-limited external
//! resource, so mutual exclusion is process-wide, not per-mailbox. The lock
//! is in-memory only and resets on restart — a crash mid-sync must never
//! require manual unlocking.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

/// Why an acquire attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyReason {
    /// A sync is currently running.
    Running,
    /// The post-sync cooldown window has not elapsed.
    Cooldown,
}

/// Result of [`SyncLock::try_acquire`].
#[derive(Debug)]
pub enum Acquire {
    /// The caller holds the lock until the permit drops.
    Allowed(SyncPermit),
    /// Back off and retry later; `remaining` is zero for `Running`.
    Busy {
        reason: BusyReason,
        remaining: Duration,
    },
}

impl Acquire {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Acquire::Allowed(_))
    }
}

#[derive(Debug)]
struct LockState {
    running: bool,
    last_completed_at: Option<Instant>,
}

/// Process-wide single-flight lock guarding sync runs.
#[derive(Debug)]
pub struct SyncLock {
    state: Arc<Mutex<LockState>>,
    cooldown: Duration,
}

impl SyncLock {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(LockState {
                running: false,
                last_completed_at: None,
            })),
            cooldown,
        }
    }

    /// Try to start a sync on behalf of `owner_id`.
    ///
    /// Only one sync may run at a time process-wide; after a run completes,
    /// the cooldown window must elapse before the next acquire succeeds.
    pub fn try_acquire(&self, owner_id: &str) -> Acquire {
        let mut state = self.state.lock().expect("sync lock mutex poisoned");

        if state.running {
            debug!(owner = owner_id, "Sync lock busy: already running");
            return Acquire::Busy {
                reason: BusyReason::Running,
                remaining: Duration::ZERO,
            };
        }

        if let Some(completed) = state.last_completed_at {
            let elapsed = completed.elapsed();
            if elapsed < self.cooldown {
                let remaining = self.cooldown - elapsed;
                debug!(owner = owner_id, ?remaining, "Sync lock busy: cooldown");
                return Acquire::Busy {
                    reason: BusyReason::Cooldown,
                    remaining,
                };
            }
        }

        state.running = true;
        Acquire::Allowed(SyncPermit {
            state: Arc::clone(&self.state),
        })
    }
}

/// Held while a sync runs. Dropping the permit releases the lock and starts
/// the cooldown window — the drop runs on every exit path, including panics
/// inside the guarded work, so the lock cannot starve.
#[derive(Debug)]
pub struct SyncPermit {
    state: Arc<Mutex<LockState>>,
}

impl Drop for SyncPermit {
    fn drop(&mut self) {
        let mut state = self.state.lock().expect("sync lock mutex poisoned");
        state.running = false;
        state.last_completed_at = Some(Instant::now());
    }
}
