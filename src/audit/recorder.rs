//! Execution recorder — the write path for workflow audit records.
//!
//! A recorder wraps one `WorkflowExecution` row: created RUNNING at `begin`,
//! node logs appended in visitation order, finalized exactly once. The
//! in-memory path/count always mirror what was actually written, so the
//! audit trail is truthful even when a run fails partway.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::audit::model::{ExecutionStatus, WorkflowExecution, WorkflowNodeLog};
use crate::error::DatabaseError;
use crate::store::Store;

/// One node visit, as reported by the interpreter.
#[derive(Debug, Clone)]
pub struct NodeVisit {
    pub node_id: String,
    pub node_type: String,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
    pub error: Option<String>,
    pub duration: Duration,
}

/// Records one workflow execution from start to finalization.
pub struct ExecutionRecorder {
    store: Arc<dyn Store>,
    execution_id: Uuid,
    next_step: u32,
    path: Vec<String>,
    finished: bool,
}

impl ExecutionRecorder {
    /// Open a RUNNING execution row and return its recorder.
    pub async fn begin(
        store: Arc<dyn Store>,
        workflow_id: Uuid,
        triggered_by: &str,
        input: serde_json::Value,
    ) -> Result<Self, DatabaseError> {
        let execution = WorkflowExecution::begin(workflow_id, triggered_by, input);
        store.insert_execution(&execution).await?;
        Ok(Self {
            store,
            execution_id: execution.id,
            next_step: 0,
            path: Vec::new(),
            finished: false,
        })
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Append one node log row. `step_order` is assigned here and is
    /// strictly increasing within the execution.
    pub async fn record_node(&mut self, visit: NodeVisit) -> Result<(), DatabaseError> {
        let log = WorkflowNodeLog {
            id: Uuid::new_v4(),
            execution_id: self.execution_id,
            node_id: visit.node_id.clone(),
            node_type: visit.node_type,
            step_order: self.next_step,
            input: visit.input,
            output: visit.output,
            metadata: visit.metadata,
            error: visit.error,
            duration_ms: visit.duration.as_millis() as u64,
        };
        self.store.append_node_log(&log).await?;
        self.next_step += 1;
        self.path.push(visit.node_id);
        Ok(())
    }

    /// Finalize with SUCCESS and an output value.
    pub async fn finish_success(
        &mut self,
        output: serde_json::Value,
    ) -> Result<(), DatabaseError> {
        self.finalize(ExecutionStatus::Success, Some(output), None)
            .await
    }

    /// Finalize with FAILED and an error message.
    pub async fn finish_failure(&mut self, error: &str) -> Result<(), DatabaseError> {
        self.finalize(ExecutionStatus::Failed, None, Some(error.to_string()))
            .await
    }

    async fn finalize(
        &mut self,
        status: ExecutionStatus,
        output: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), DatabaseError> {
        if self.finished {
            warn!(
                execution_id = %self.execution_id,
                "Ignoring repeated finalize for already-finished execution"
            );
            return Ok(());
        }

        self.store
            .finalize_execution(
                self.execution_id,
                status,
                output.as_ref(),
                error.as_deref(),
                &self.path,
                self.next_step,
                Utc::now(),
            )
            .await?;
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::model::ExecutionStatus;
    use crate::store::LibSqlStore;

    fn visit(node_id: &str, node_type: &str) -> NodeVisit {
        NodeVisit {
            node_id: node_id.into(),
            node_type: node_type.into(),
            input: serde_json::json!({}),
            output: Some(serde_json::json!({"ok": true})),
            metadata: serde_json::json!({}),
            error: None,
            duration: Duration::from_millis(3),
        }
    }

    #[tokio::test]
    async fn records_path_and_finalizes_success() {
        let store: Arc<dyn Store> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let workflow_id = Uuid::new_v4();

        let mut recorder = ExecutionRecorder::begin(
            Arc::clone(&store),
            workflow_id,
            "email-1",
            serde_json::json!({"subject": "hi"}),
        )
        .await
        .unwrap();

        recorder.record_node(visit("n1", "trigger")).await.unwrap();
        recorder.record_node(visit("n2", "action")).await.unwrap();
        recorder
            .finish_success(serde_json::json!({"delivered": true}))
            .await
            .unwrap();

        let execution = store
            .get_execution(recorder.execution_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(execution.nodes_executed, 2);
        assert_eq!(execution.execution_path, vec!["n1", "n2"]);
        assert!(execution.finished_at.is_some());
    }

    #[tokio::test]
    async fn failure_preserves_partial_progress() {
        let store: Arc<dyn Store> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let mut recorder = ExecutionRecorder::begin(
            Arc::clone(&store),
            Uuid::new_v4(),
            "email-2",
            serde_json::json!({}),
        )
        .await
        .unwrap();

        recorder.record_node(visit("n1", "trigger")).await.unwrap();
        recorder.finish_failure("destination unreachable").await.unwrap();

        let execution = store
            .get_execution(recorder.execution_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.nodes_executed, 1);
        assert_eq!(execution.execution_path, vec!["n1"]);
        assert_eq!(execution.error.as_deref(), Some("destination unreachable"));
    }

    #[tokio::test]
    async fn second_finalize_is_a_no_op() {
        let store: Arc<dyn Store> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let mut recorder = ExecutionRecorder::begin(
            Arc::clone(&store),
            Uuid::new_v4(),
            "email-3",
            serde_json::json!({}),
        )
        .await
        .unwrap();

        recorder
            .finish_success(serde_json::json!({"ok": true}))
            .await
            .unwrap();
        recorder.finish_failure("too late").await.unwrap();

        let execution = store
            .get_execution(recorder.execution_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Success);
        assert!(execution.error.is_none());
    }
}
