//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS rules (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                workflow INTEGER NOT NULL DEFAULT 0,
                enabled INTEGER NOT NULL DEFAULT 1,
                raw_config TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rules_owner ON rules(owner_id);
            CREATE INDEX IF NOT EXISTS idx_rules_enabled ON rules(enabled);

            CREATE TABLE IF NOT EXISTS email_events (
                id TEXT PRIMARY KEY,
                subject TEXT NOT NULL,
                from_address TEXT NOT NULL,
                from_name TEXT,
                to_address TEXT NOT NULL,
                text_body TEXT,
                html_body TEXT,
                received_at TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                mailbox_id TEXT NOT NULL,
                processed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_email_events_processed ON email_events(processed);
            CREATE INDEX IF NOT EXISTS idx_email_events_owner ON email_events(owner_id);

            CREATE TABLE IF NOT EXISTS dispatch_logs (
                id TEXT PRIMARY KEY,
                rule_id TEXT NOT NULL,
                email_id TEXT NOT NULL,
                dispatched INTEGER NOT NULL,
                execution_id TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_dispatch_logs_rule ON dispatch_logs(rule_id);
            CREATE INDEX IF NOT EXISTS idx_dispatch_logs_email ON dispatch_logs(email_id);

            CREATE TABLE IF NOT EXISTS workflow_executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                triggered_by TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'RUNNING',
                input TEXT NOT NULL,
                output TEXT,
                error TEXT,
                execution_path TEXT NOT NULL DEFAULT '[]',
                nodes_executed INTEGER NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL,
                finished_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_executions_workflow ON workflow_executions(workflow_id);
            CREATE INDEX IF NOT EXISTS idx_executions_status ON workflow_executions(status);

            CREATE TABLE IF NOT EXISTS workflow_node_logs (
                id TEXT PRIMARY KEY,
                execution_id TEXT NOT NULL REFERENCES workflow_executions(id) ON DELETE CASCADE,
                node_id TEXT NOT NULL,
                node_type TEXT NOT NULL,
                step_order INTEGER NOT NULL,
                input TEXT NOT NULL,
                output TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                error TEXT,
                duration_ms INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_node_logs_execution
                ON workflow_node_logs(execution_id, step_order);

            CREATE TABLE IF NOT EXISTS idempotency_tickets (
                external_id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 2,
        name: "event_preview_urls",
        sql: r#"
            ALTER TABLE email_events ADD COLUMN preview_url TEXT;
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    tracing::debug!("Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Record an applied migration version.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
