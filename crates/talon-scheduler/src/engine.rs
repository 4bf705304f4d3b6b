//! Polling engine over the persistent task table.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, Utc};
use tokio::sync::watch;
use tracing::{error, info};

use talon_store::{ScheduledTask, Store};

use crate::schedule::compute_next_run;

/// Poll cadence for due tasks.
pub const SCHEDULER_POLL_MS: u64 = 60_000;

/// A task this late gets called out in the log (typically: the host slept
/// through the window).
const OVERDUE_LOG_SECS: i64 = 300;

/// Runs one due task. The production implementation routes the prompt
/// through the turn queue under the `__task__` key namespace.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &ScheduledTask) -> std::result::Result<String, String>;
}

pub struct SchedulerEngine {
    store: Arc<Store>,
    executor: Arc<dyn TaskExecutor>,
}

impl SchedulerEngine {
    pub fn new(store: Arc<Store>, executor: Arc<dyn TaskExecutor>) -> Self {
        Self { store, executor }
    }

    /// Main loop: one immediate sweep (the interval's first tick fires at
    /// once), then every [`SCHEDULER_POLL_MS`] until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");
        let mut interval = tokio::time::interval(Duration::from_millis(SCHEDULER_POLL_MS));
        loop {
            tokio::select! {
                _ = interval.tick() => self.sweep().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Execute every due task and record the outcome.
    ///
    /// `next_run` is computed from the completion instant, not from the
    /// scheduled slot: a task that runs longer than its period drifts one
    /// period per run and never tries to catch up.
    pub async fn sweep(&self) {
        let now = Utc::now().timestamp();
        let due = match self.store.due_tasks(now) {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "due-task query failed");
                return;
            }
        };

        for task in due {
            let overdue_by = now - task.next_run;
            if overdue_by > OVERDUE_LOG_SECS {
                info!(
                    task_id = %task.id,
                    chat_id = task.chat_id,
                    overdue_by,
                    "running task that missed its window"
                );
            }

            let outcome = self.executor.execute(&task).await;
            let completed_at = Utc::now().timestamp();
            let result = match &outcome {
                Ok(summary) => summary.clone(),
                Err(msg) => format!("ERROR: {msg}"),
            };

            match compute_next_run(&task.schedule, Local::now()) {
                Ok(next) => {
                    if let Err(e) =
                        self.store
                            .record_task_run(&task.id, completed_at, &result, next)
                    {
                        error!(task_id = %task.id, error = %e, "post-run update failed");
                    }
                }
                Err(e) => {
                    // Schedule no longer computable: leave the row as-is.
                    error!(task_id = %task.id, error = %e, "post-run reschedule failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingExecutor {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingExecutor {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    #[async_trait]
    impl TaskExecutor for RecordingExecutor {
        async fn execute(&self, task: &ScheduledTask) -> std::result::Result<String, String> {
            self.calls.lock().unwrap().push(task.id.clone());
            if self.fail {
                Err("executor exploded".to_string())
            } else {
                Ok(format!("ran: {}", task.prompt))
            }
        }
    }

    fn store_with_task(next_run: i64) -> (Arc<Store>, ScheduledTask) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let task = store
            .create_task(42, "daily briefing", "30 6 * * *", next_run, 0)
            .unwrap();
        (store, task)
    }

    #[tokio::test]
    async fn missed_window_runs_exactly_once_and_reschedules() {
        let now = Utc::now().timestamp();
        let (store, task) = store_with_task(now - 3_600);
        let exec = RecordingExecutor::new(false);
        let engine = SchedulerEngine::new(store.clone(), exec.clone());

        engine.sweep().await;

        assert_eq!(exec.calls.lock().unwrap().as_slice(), [task.id.clone()]);
        let updated = store.get_task(&task.id).unwrap().unwrap();
        assert!(updated.next_run > now, "next_run must be strictly future");
        assert!(updated.last_run.is_some());
        assert_eq!(updated.last_result.as_deref(), Some("ran: daily briefing"));

        // The task is no longer due: a second sweep is a no-op.
        engine.sweep().await;
        assert_eq!(exec.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failure_is_recorded_with_error_prefix() {
        let now = Utc::now().timestamp();
        let (store, task) = store_with_task(now - 10);
        let exec = RecordingExecutor::new(true);
        SchedulerEngine::new(store.clone(), exec).sweep().await;

        let updated = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(
            updated.last_result.as_deref(),
            Some("ERROR: executor exploded")
        );
        assert!(updated.next_run > now);
    }

    #[tokio::test]
    async fn paused_tasks_are_never_executed() {
        let now = Utc::now().timestamp();
        let (store, task) = store_with_task(now - 10);
        store
            .set_task_status(&task.id, talon_store::TaskStatus::Paused, None)
            .unwrap();
        let exec = RecordingExecutor::new(false);
        SchedulerEngine::new(store, exec.clone()).sweep().await;
        assert!(exec.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn future_tasks_are_left_alone() {
        let now = Utc::now().timestamp();
        let (store, task) = store_with_task(now + 3_600);
        let exec = RecordingExecutor::new(false);
        SchedulerEngine::new(store.clone(), exec.clone()).sweep().await;
        assert!(exec.calls.lock().unwrap().is_empty());
        assert_eq!(store.get_task(&task.id).unwrap().unwrap().next_run, now + 3_600);
    }
}
