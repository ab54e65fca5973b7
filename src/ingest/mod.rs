//! Ingestion — events, dedup, scheduling, and the sync loop.

pub mod event;
pub mod idempotency;
pub mod scheduler;
pub mod sync;
pub mod sync_lock;

pub use event::EmailEvent;
pub use idempotency::{Claim, IdempotencyGuard};
pub use scheduler::IngestionScheduler;
pub use sync_lock::{Acquire, BusyReason, SyncLock, SyncPermit};
