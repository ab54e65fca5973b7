//! libSQL backend — async `Store` trait implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations; `libsql::Connection` is `Send + Sync` and safe
//! for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::model::{DispatchLog, ExecutionStatus, WorkflowExecution, WorkflowNodeLog};
use crate::error::DatabaseError;
use crate::ingest::event::EmailEvent;
use crate::store::migrations;
use crate::store::traits::{Store, StoredRule};

/// libSQL store backend.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str, context: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s)
        .map_err(|e| DatabaseError::Serialization(format!("{context}: bad uuid {s:?}: {e}")))
}

fn parse_json(s: &str, context: &str) -> Result<serde_json::Value, DatabaseError> {
    serde_json::from_str(s)
        .map_err(|e| DatabaseError::Serialization(format!("{context}: bad JSON: {e}")))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// A unique-index violation is the expected duplicate-detection signal for
/// the idempotency ledger; map it to `Constraint` so callers can branch.
fn map_insert_error(context: &str, e: libsql::Error) -> DatabaseError {
    let message = e.to_string();
    if message.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{context}: {message}"))
    } else {
        DatabaseError::Query(format!("{context}: {message}"))
    }
}

// ── Row mappers ─────────────────────────────────────────────────────

const RULE_COLUMNS: &str = "id, owner_id, name, kind, workflow, enabled, raw_config, created_at";

fn row_to_rule(row: &libsql::Row) -> Result<StoredRule, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("rule row: {e}")))?;
    let owner_id: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("rule row: {e}")))?;
    let name: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("rule row: {e}")))?;
    let kind_str: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("rule row: {e}")))?;
    let workflow: i64 = row
        .get(4)
        .map_err(|e| DatabaseError::Query(format!("rule row: {e}")))?;
    let enabled: i64 = row
        .get(5)
        .map_err(|e| DatabaseError::Query(format!("rule row: {e}")))?;
    let config_str: String = row
        .get(6)
        .map_err(|e| DatabaseError::Query(format!("rule row: {e}")))?;
    let created_str: String = row
        .get(7)
        .map_err(|e| DatabaseError::Query(format!("rule row: {e}")))?;

    Ok(StoredRule {
        id: parse_uuid(&id_str, "rule.id")?,
        owner_id,
        name,
        kind: kind_str
            .parse()
            .map_err(DatabaseError::Serialization)?,
        workflow: workflow != 0,
        enabled: enabled != 0,
        raw_config: parse_json(&config_str, "rule.raw_config")?,
        created_at: parse_datetime(&created_str),
    })
}

const EVENT_COLUMNS: &str = "id, subject, from_address, from_name, to_address, text_body, \
                             html_body, received_at, owner_id, mailbox_id, preview_url";

fn row_to_event(row: &libsql::Row) -> Result<EmailEvent, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("event row: {e}")))?;
    let subject: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("event row: {e}")))?;
    let from_address: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("event row: {e}")))?;
    let from_name: Option<String> = row.get(3).ok();
    let to_address: String = row
        .get(4)
        .map_err(|e| DatabaseError::Query(format!("event row: {e}")))?;
    let text_body: Option<String> = row.get(5).ok();
    let html_body: Option<String> = row.get(6).ok();
    let received_str: String = row
        .get(7)
        .map_err(|e| DatabaseError::Query(format!("event row: {e}")))?;
    let owner_id: String = row
        .get(8)
        .map_err(|e| DatabaseError::Query(format!("event row: {e}")))?;
    let mailbox_id: String = row
        .get(9)
        .map_err(|e| DatabaseError::Query(format!("event row: {e}")))?;
    let preview_url: Option<String> = row.get(10).ok();

    Ok(EmailEvent {
        id: parse_uuid(&id_str, "event.id")?,
        subject,
        from_address,
        from_name,
        to_address,
        text_body,
        html_body,
        received_at: parse_datetime(&received_str),
        owner_id,
        mailbox_id,
        preview_url,
    })
}

fn row_to_dispatch_log(row: &libsql::Row) -> Result<DispatchLog, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("dispatch log row: {e}")))?;
    let rule_str: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("dispatch log row: {e}")))?;
    let email_str: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("dispatch log row: {e}")))?;
    let dispatched: i64 = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("dispatch log row: {e}")))?;
    let execution_str: Option<String> = row.get(4).ok();
    let created_str: String = row
        .get(5)
        .map_err(|e| DatabaseError::Query(format!("dispatch log row: {e}")))?;

    Ok(DispatchLog {
        id: parse_uuid(&id_str, "dispatch_log.id")?,
        rule_id: parse_uuid(&rule_str, "dispatch_log.rule_id")?,
        email_id: parse_uuid(&email_str, "dispatch_log.email_id")?,
        dispatched: dispatched != 0,
        execution_id: match execution_str {
            Some(s) => Some(parse_uuid(&s, "dispatch_log.execution_id")?),
            None => None,
        },
        created_at: parse_datetime(&created_str),
    })
}

const EXECUTION_COLUMNS: &str = "id, workflow_id, triggered_by, status, input, output, error, \
                                 execution_path, nodes_executed, started_at, finished_at";

fn row_to_execution(row: &libsql::Row) -> Result<WorkflowExecution, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("execution row: {e}")))?;
    let workflow_str: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("execution row: {e}")))?;
    let triggered_by: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("execution row: {e}")))?;
    let status_str: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("execution row: {e}")))?;
    let input_str: String = row
        .get(4)
        .map_err(|e| DatabaseError::Query(format!("execution row: {e}")))?;
    let output_str: Option<String> = row.get(5).ok();
    let error: Option<String> = row.get(6).ok();
    let path_str: String = row
        .get(7)
        .map_err(|e| DatabaseError::Query(format!("execution row: {e}")))?;
    let nodes_executed: i64 = row
        .get(8)
        .map_err(|e| DatabaseError::Query(format!("execution row: {e}")))?;
    let started_str: String = row
        .get(9)
        .map_err(|e| DatabaseError::Query(format!("execution row: {e}")))?;
    let finished_str: Option<String> = row.get(10).ok();

    let execution_path: Vec<String> = serde_json::from_str(&path_str).unwrap_or_default();

    Ok(WorkflowExecution {
        id: parse_uuid(&id_str, "execution.id")?,
        workflow_id: parse_uuid(&workflow_str, "execution.workflow_id")?,
        triggered_by,
        status: status_str
            .parse::<ExecutionStatus>()
            .map_err(DatabaseError::Serialization)?,
        input: parse_json(&input_str, "execution.input")?,
        output: match output_str {
            Some(s) => Some(parse_json(&s, "execution.output")?),
            None => None,
        },
        error,
        execution_path,
        nodes_executed: nodes_executed as u32,
        started_at: parse_datetime(&started_str),
        finished_at: finished_str.as_deref().map(parse_datetime),
    })
}

fn row_to_node_log(row: &libsql::Row) -> Result<WorkflowNodeLog, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("node log row: {e}")))?;
    let execution_str: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("node log row: {e}")))?;
    let node_id: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("node log row: {e}")))?;
    let node_type: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("node log row: {e}")))?;
    let step_order: i64 = row
        .get(4)
        .map_err(|e| DatabaseError::Query(format!("node log row: {e}")))?;
    let input_str: String = row
        .get(5)
        .map_err(|e| DatabaseError::Query(format!("node log row: {e}")))?;
    let output_str: Option<String> = row.get(6).ok();
    let metadata_str: String = row
        .get(7)
        .map_err(|e| DatabaseError::Query(format!("node log row: {e}")))?;
    let error: Option<String> = row.get(8).ok();
    let duration_ms: i64 = row
        .get(9)
        .map_err(|e| DatabaseError::Query(format!("node log row: {e}")))?;

    Ok(WorkflowNodeLog {
        id: parse_uuid(&id_str, "node_log.id")?,
        execution_id: parse_uuid(&execution_str, "node_log.execution_id")?,
        node_id,
        node_type,
        step_order: step_order as u32,
        input: parse_json(&input_str, "node_log.input")?,
        output: match output_str {
            Some(s) => Some(parse_json(&s, "node_log.output")?),
            None => None,
        },
        metadata: parse_json(&metadata_str, "node_log.metadata")?,
        error,
        duration_ms: duration_ms as u64,
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Store for LibSqlStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn insert_rule(&self, rule: &StoredRule) -> Result<(), DatabaseError> {
        let config_json = serde_json::to_string(&rule.raw_config)
            .map_err(|e| DatabaseError::Serialization(format!("insert_rule: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO rules (id, owner_id, name, kind, workflow, enabled, raw_config, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    rule.id.to_string(),
                    rule.owner_id.clone(),
                    rule.name.clone(),
                    rule.kind.type_tag(),
                    rule.workflow as i64,
                    rule.enabled as i64,
                    config_json,
                    rule.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_rule: {e}")))?;

        debug!(rule_id = %rule.id, owner = %rule.owner_id, "Rule inserted");
        Ok(())
    }

    async fn list_enabled_rules_for_owner(
        &self,
        owner_id: &str,
    ) -> Result<Vec<StoredRule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RULE_COLUMNS} FROM rules
                     WHERE owner_id = ?1 AND enabled = 1
                     ORDER BY created_at"
                ),
                params![owner_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_enabled_rules_for_owner: {e}")))?;

        let mut rules = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_enabled_rules_for_owner: {e}")))?
        {
            rules.push(row_to_rule(&row)?);
        }
        Ok(rules)
    }

    async fn enqueue_event(&self, event: &EmailEvent) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO email_events (id, subject, from_address, from_name, to_address,
                     text_body, html_body, received_at, owner_id, mailbox_id, preview_url,
                     processed, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12)",
                params![
                    event.id.to_string(),
                    event.subject.clone(),
                    event.from_address.clone(),
                    opt_text(event.from_name.as_deref()),
                    event.to_address.clone(),
                    opt_text(event.text_body.as_deref()),
                    opt_text(event.html_body.as_deref()),
                    event.received_at.to_rfc3339(),
                    event.owner_id.clone(),
                    event.mailbox_id.clone(),
                    opt_text(event.preview_url.as_deref()),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_insert_error("enqueue_event", e))?;
        Ok(())
    }

    async fn list_pending_events(&self) -> Result<Vec<EmailEvent>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM email_events
                     WHERE processed = 0
                     ORDER BY received_at"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_pending_events: {e}")))?;

        let mut events = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_pending_events: {e}")))?
        {
            events.push(row_to_event(&row)?);
        }
        Ok(events)
    }

    async fn mark_event_processed(&self, id: Uuid) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE email_events SET processed = 1 WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_event_processed: {e}")))?;
        Ok(())
    }

    async fn insert_dispatch_log(&self, log: &DispatchLog) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO dispatch_logs (id, rule_id, email_id, dispatched, execution_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    log.id.to_string(),
                    log.rule_id.to_string(),
                    log.email_id.to_string(),
                    log.dispatched as i64,
                    opt_text(log.execution_id.map(|id| id.to_string()).as_deref()),
                    log.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_dispatch_log: {e}")))?;
        Ok(())
    }

    async fn list_dispatch_logs_for_email(
        &self,
        email_id: Uuid,
    ) -> Result<Vec<DispatchLog>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, rule_id, email_id, dispatched, execution_id, created_at
                 FROM dispatch_logs WHERE email_id = ?1 ORDER BY created_at",
                params![email_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_dispatch_logs_for_email: {e}")))?;

        let mut logs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_dispatch_logs_for_email: {e}")))?
        {
            logs.push(row_to_dispatch_log(&row)?);
        }
        Ok(logs)
    }

    async fn insert_execution(&self, execution: &WorkflowExecution) -> Result<(), DatabaseError> {
        let input_json = serde_json::to_string(&execution.input)
            .map_err(|e| DatabaseError::Serialization(format!("insert_execution: {e}")))?;
        let path_json = serde_json::to_string(&execution.execution_path)
            .map_err(|e| DatabaseError::Serialization(format!("insert_execution: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO workflow_executions (id, workflow_id, triggered_by, status, input,
                     execution_path, nodes_executed, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    execution.id.to_string(),
                    execution.workflow_id.to_string(),
                    execution.triggered_by.clone(),
                    execution.status.to_string(),
                    input_json,
                    path_json,
                    execution.nodes_executed as i64,
                    execution.started_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_execution: {e}")))?;

        debug!(execution_id = %execution.id, workflow = %execution.workflow_id, "Execution started");
        Ok(())
    }

    async fn get_execution(
        &self,
        id: Uuid,
    ) -> Result<Option<WorkflowExecution>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_execution: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_execution(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_execution: {e}"))),
        }
    }

    async fn finalize_execution(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
        execution_path: &[String],
        nodes_executed: u32,
        finished_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let output_json = output
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DatabaseError::Serialization(format!("finalize_execution: {e}")))?;
        let path_json = serde_json::to_string(execution_path)
            .map_err(|e| DatabaseError::Serialization(format!("finalize_execution: {e}")))?;

        // Guarded transition: a row that already left RUNNING is never
        // overwritten.
        self.conn()
            .execute(
                "UPDATE workflow_executions
                 SET status = ?1, output = ?2, error = ?3, execution_path = ?4,
                     nodes_executed = ?5, finished_at = ?6
                 WHERE id = ?7 AND status = 'RUNNING'",
                params![
                    status.to_string(),
                    opt_text(output_json.as_deref()),
                    opt_text(error),
                    path_json,
                    nodes_executed as i64,
                    finished_at.to_rfc3339(),
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("finalize_execution: {e}")))?;
        Ok(())
    }

    async fn append_node_log(&self, log: &WorkflowNodeLog) -> Result<(), DatabaseError> {
        let input_json = serde_json::to_string(&log.input)
            .map_err(|e| DatabaseError::Serialization(format!("append_node_log: {e}")))?;
        let output_json = log
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DatabaseError::Serialization(format!("append_node_log: {e}")))?;
        let metadata_json = serde_json::to_string(&log.metadata)
            .map_err(|e| DatabaseError::Serialization(format!("append_node_log: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO workflow_node_logs (id, execution_id, node_id, node_type, step_order,
                     input, output, metadata, error, duration_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    log.id.to_string(),
                    log.execution_id.to_string(),
                    log.node_id.clone(),
                    log.node_type.clone(),
                    log.step_order as i64,
                    input_json,
                    opt_text(output_json.as_deref()),
                    metadata_json,
                    opt_text(log.error.as_deref()),
                    log.duration_ms as i64,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_node_log: {e}")))?;
        Ok(())
    }

    async fn list_node_logs(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<WorkflowNodeLog>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, execution_id, node_id, node_type, step_order, input, output,
                        metadata, error, duration_ms
                 FROM workflow_node_logs WHERE execution_id = ?1 ORDER BY step_order",
                params![execution_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_node_logs: {e}")))?;

        let mut logs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_node_logs: {e}")))?
        {
            logs.push(row_to_node_log(&row)?);
        }
        Ok(logs)
    }

    async fn insert_idempotency_ticket(&self, external_id: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO idempotency_tickets (external_id, created_at) VALUES (?1, ?2)",
                params![external_id, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| map_insert_error("insert_idempotency_ticket", e))?;
        Ok(())
    }
}
