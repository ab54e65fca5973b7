//! Unified `Store` trait — single async interface for all persistence.
//!
//! The engine core only ever talks to this seam; the libSQL backend is one
//! implementation, test doubles are another.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audit::model::{DispatchLog, ExecutionStatus, WorkflowExecution, WorkflowNodeLog};
use crate::error::DatabaseError;
use crate::ingest::event::EmailEvent;
use crate::rules::config::DestinationKind;

/// A persisted rule or workflow row, config still raw.
///
/// `raw_config` is an untyped blob with an evolving shape — callers pass it
/// through [`crate::rules::config::normalize`] before use.
#[derive(Debug, Clone)]
pub struct StoredRule {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    /// Declared destination type; must agree with the stored config.
    pub kind: DestinationKind,
    /// Workflow-typed automations get execution/node-log audit records.
    pub workflow: bool,
    pub enabled: bool,
    pub raw_config: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Backend-agnostic persistence trait covering rules, the event queue,
/// audit records, and the idempotency ledger.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Rules ───────────────────────────────────────────────────────

    /// Insert a rule row.
    async fn insert_rule(&self, rule: &StoredRule) -> Result<(), DatabaseError>;

    /// All enabled rules/workflows scoped to one owner.
    async fn list_enabled_rules_for_owner(
        &self,
        owner_id: &str,
    ) -> Result<Vec<StoredRule>, DatabaseError>;

    // ── Event queue ─────────────────────────────────────────────────

    /// Queue an inbound email event for dispatch.
    async fn enqueue_event(&self, event: &EmailEvent) -> Result<(), DatabaseError>;

    /// Events not yet dispatched, oldest first.
    async fn list_pending_events(&self) -> Result<Vec<EmailEvent>, DatabaseError>;

    /// Mark an event as dispatched.
    async fn mark_event_processed(&self, id: Uuid) -> Result<(), DatabaseError>;

    // ── Audit ───────────────────────────────────────────────────────

    /// Append a dispatch log row. Write-once; rows are never updated.
    async fn insert_dispatch_log(&self, log: &DispatchLog) -> Result<(), DatabaseError>;

    /// All dispatch logs recorded for one email event.
    async fn list_dispatch_logs_for_email(
        &self,
        email_id: Uuid,
    ) -> Result<Vec<DispatchLog>, DatabaseError>;

    /// Create an execution row (status RUNNING).
    async fn insert_execution(&self, execution: &WorkflowExecution) -> Result<(), DatabaseError>;

    /// Fetch one execution.
    async fn get_execution(&self, id: Uuid)
        -> Result<Option<WorkflowExecution>, DatabaseError>;

    /// Finalize an execution. Only transitions rows still in RUNNING state;
    /// a finalized row is never reopened or overwritten.
    #[allow(clippy::too_many_arguments)]
    async fn finalize_execution(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
        execution_path: &[String],
        nodes_executed: u32,
        finished_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Append a node log row.
    async fn append_node_log(&self, log: &WorkflowNodeLog) -> Result<(), DatabaseError>;

    /// Node logs for one execution, ordered by `step_order`.
    async fn list_node_logs(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<WorkflowNodeLog>, DatabaseError>;

    // ── Idempotency ledger ──────────────────────────────────────────

    /// Insert a ticket keyed by an externally-supplied identifier.
    ///
    /// Must be a single constrained insert: a duplicate key surfaces as
    /// [`DatabaseError::Constraint`], which callers interpret as "already
    /// handled", not as a fault.
    async fn insert_idempotency_ticket(&self, external_id: &str) -> Result<(), DatabaseError>;
}
