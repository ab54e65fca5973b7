//! Audit data model — dispatch logs, workflow executions, per-node logs.
//!
//! These rows are historical facts. A `DispatchLog` is written once per
//! (rule, email) attempt and never mutated; node logs are append-only
//! children of an execution.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row per (rule-or-workflow, email) evaluation attempt.
///
/// `dispatched` records that the destination was *invoked*, not that the
/// invocation succeeded — failures live on the linked execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchLog {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub email_id: Uuid,
    pub dispatched: bool,
    pub execution_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl DispatchLog {
    /// The rule was evaluated but did not fire (no match or bad config).
    pub fn skipped(rule_id: Uuid, email_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_id,
            email_id,
            dispatched: false,
            execution_id: None,
            created_at: Utc::now(),
        }
    }

    /// The destination was invoked for this rule.
    pub fn dispatched(rule_id: Uuid, email_id: Uuid, execution_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_id,
            email_id,
            dispatched: true,
            execution_id,
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
    Cancelled,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "RUNNING"),
            ExecutionStatus::Success => write!(f, "SUCCESS"),
            ExecutionStatus::Failed => write!(f, "FAILED"),
            ExecutionStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(ExecutionStatus::Running),
            "SUCCESS" => Ok(ExecutionStatus::Success),
            "FAILED" => Ok(ExecutionStatus::Failed),
            "CANCELLED" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// One row per workflow run.
///
/// Created at run start with `Running` status, finalized exactly once at run
/// completion, never reopened. `execution_path` and `nodes_executed` reflect
/// exactly the nodes actually logged, even on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// What started the run (e.g. the triggering email id).
    pub triggered_by: String,
    pub status: ExecutionStatus,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub execution_path: Vec<String>,
    pub nodes_executed: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    pub fn begin(workflow_id: Uuid, triggered_by: &str, input: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            triggered_by: triggered_by.to_string(),
            status: ExecutionStatus::Running,
            input,
            output: None,
            error: None,
            execution_path: Vec::new(),
            nodes_executed: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Ordered child row of an execution, one per node visited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNodeLog {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub node_id: String,
    pub node_type: String,
    /// Visitation order, strictly increasing within an execution.
    pub step_order: u32,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_status_display_parse() {
        for status in [
            ExecutionStatus::Running,
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            let s = status.to_string();
            let parsed: ExecutionStatus = s.parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn dispatch_log_constructors() {
        let rule = Uuid::new_v4();
        let email = Uuid::new_v4();

        let skipped = DispatchLog::skipped(rule, email);
        assert!(!skipped.dispatched);
        assert!(skipped.execution_id.is_none());

        let exec = Uuid::new_v4();
        let fired = DispatchLog::dispatched(rule, email, Some(exec));
        assert!(fired.dispatched);
        assert_eq!(fired.execution_id, Some(exec));
    }

    #[test]
    fn execution_begins_running() {
        let execution =
            WorkflowExecution::begin(Uuid::new_v4(), "email-1", serde_json::json!({"a": 1}));
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert!(execution.finished_at.is_none());
        assert_eq!(execution.nodes_executed, 0);
    }
}
