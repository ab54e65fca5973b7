//! Error types for mailflow.

use std::time::Duration;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Rule config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Destination error: {0}")]
    Destination(#[from] DestinationError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Errors from normalizing a stored rule configuration.
///
/// These are per-rule: the dispatch coordinator logs them and moves on to the
/// next rule. They never abort a batch.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("destination type mismatch: rule is {declared} but config destination is {found}")]
    DestinationTypeMismatch { declared: String, found: String },

    #[error("cannot normalize config: {reason}")]
    Unnormalizable { reason: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A destination call failed.
///
/// Recorded on the execution/dispatch record; never propagated across
/// sibling dispatches for the same event.
#[derive(Debug, thiserror::Error)]
pub enum DestinationError {
    #[error("{kind} send failed: {reason}")]
    SendFailed { kind: String, reason: String },

    #[error("{kind} address invalid: {reason}")]
    InvalidAddress { kind: String, reason: String },

    #[error("{kind} call timed out after {timeout:?}")]
    Timeout { kind: String, timeout: Duration },
}

/// Scheduler lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler is stopped; cannot schedule task {name}")]
    Stopped { name: String },
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
