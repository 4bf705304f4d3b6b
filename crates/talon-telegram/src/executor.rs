//! Scheduled-task executor: drives a cron prompt through the same queue and
//! turn pipeline as interactive messages, under the `__task__` key namespace
//! so it can never wedge the user's interactive stream.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use talon_scheduler::TaskExecutor;
use talon_store::ScheduledTask;

use crate::app::App;
use crate::turn::{run_agent_turn, TurnOptions};

pub struct AgentTaskExecutor {
    app: Arc<App>,
}

impl AgentTaskExecutor {
    pub fn new(app: Arc<App>) -> Arc<Self> {
        Arc::new(Self { app })
    }
}

#[async_trait]
impl TaskExecutor for AgentTaskExecutor {
    async fn execute(&self, task: &ScheduledTask) -> Result<String, String> {
        info!(task_id = %task.id, chat_id = task.chat_id, "executing scheduled task");
        let key = talon_queue::task_key(task.chat_id);
        let message = format!("[Scheduled task] {}", task.prompt);
        let opts = TurnOptions {
            typing: false,
            ..Default::default()
        };
        self.app
            .queue
            .enqueue(&key, run_agent_turn(&self.app, task.chat_id, &message, opts))
            .await
    }
}
