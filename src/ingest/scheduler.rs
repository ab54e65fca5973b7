//! Ingestion scheduler — named recurring background tasks.
//!
//! Each task owns a timer loop: one immediate run, then a tick every
//! interval. Runs are error-isolated — a failing handler is logged and the
//! timer keeps ticking. Scheduling the same name again replaces the old
//! task instead of duplicating it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{Error, SchedulerError};

/// Factory producing one run future per invocation.
pub type TaskHandler = Arc<dyn Fn() -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

struct ScheduledTask {
    handle: JoinHandle<()>,
    last_run: Arc<std::sync::Mutex<Option<DateTime<Utc>>>>,
}

/// Runs named recurring tasks (e.g. periodic mail sync).
///
/// One instance per process, passed by dependency injection — explicit, not
/// an ambient singleton.
pub struct IngestionScheduler {
    tasks: RwLock<HashMap<String, ScheduledTask>>,
    stopped: AtomicBool,
}

impl Default for IngestionScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestionScheduler {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Arm a named recurring task.
    ///
    /// The handler runs once immediately, then on every interval tick.
    /// Handler errors are caught and logged, never propagated. If a task
    /// with this name already exists it is replaced, not duplicated.
    pub async fn schedule(
        &self,
        name: &str,
        interval: Duration,
        handler: TaskHandler,
    ) -> Result<(), SchedulerError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SchedulerError::Stopped { name: name.into() });
        }

        let mut tasks = self.tasks.write().await;
        if let Some(old) = tasks.remove(name) {
            old.handle.abort();
            debug!(task = name, "Replaced existing scheduled task");
        }

        let last_run = Arc::new(std::sync::Mutex::new(None));
        let last_run_writer = Arc::clone(&last_run);
        let task_name = name.to_string();

        let handle = tokio::spawn(async move {
            info!(task = %task_name, interval_secs = interval.as_secs(), "Task scheduled");
            let mut tick = tokio::time::interval(interval);

            // The first tick fires immediately.
            loop {
                tick.tick().await;

                // Every invocation attempt counts as a run, not only successes.
                *last_run_writer.lock().expect("last_run mutex poisoned") = Some(Utc::now());

                if let Err(e) = handler().await {
                    error!(task = %task_name, error = %e, "Scheduled task run failed");
                }
            }
        });

        tasks.insert(name.to_string(), ScheduledTask { handle, last_run });
        Ok(())
    }

    /// Cancel and remove one task. No-op when absent.
    pub async fn unschedule(&self, name: &str) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.remove(name) {
            task.handle.abort();
            info!(task = name, "Task unscheduled");
        }
    }

    /// When the named task last attempted a run.
    pub async fn last_run(&self, name: &str) -> Option<DateTime<Utc>> {
        let tasks = self.tasks.read().await;
        tasks
            .get(name)
            .and_then(|t| *t.last_run.lock().expect("last_run mutex poisoned"))
    }

    /// Whether a task with this name is currently scheduled.
    pub async fn is_scheduled(&self, name: &str) -> bool {
        self.tasks.read().await.contains_key(name)
    }

    /// Cancel all tasks and refuse further scheduling. Idempotent.
    pub async fn stop(&self) {
        let first_stop = !self.stopped.swap(true, Ordering::SeqCst);
        let mut tasks = self.tasks.write().await;
        for (name, task) in tasks.drain() {
            task.handle.abort();
            debug!(task = %name, "Task cancelled on stop");
        }
        if first_stop {
            info!("Ingestion scheduler stopped");
        }
    }
}
