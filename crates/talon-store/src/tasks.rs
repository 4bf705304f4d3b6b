//! Scheduled tasks: cron-driven prompts persisted per chat, polled globally.

use rusqlite::params;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{ScheduledTask, TaskStatus};
use crate::Store;

/// Stored `last_result` ceiling.
pub const MAX_RESULT_CHARS: usize = 10_000;

const TASK_COLS: &str =
    "id, chat_id, prompt, schedule, next_run, last_run, last_result, status, created_at";

impl Store {
    pub fn create_task(
        &self,
        chat_id: i64,
        prompt: &str,
        schedule: &str,
        next_run: i64,
        now: i64,
    ) -> Result<ScheduledTask> {
        let id = Uuid::new_v4().to_string();
        self.conn().execute(
            "INSERT INTO scheduled_tasks
             (id, chat_id, prompt, schedule, next_run, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6)",
            params![id, chat_id, prompt, schedule, next_run, now],
        )?;
        Ok(ScheduledTask {
            id,
            chat_id,
            prompt: prompt.to_string(),
            schedule: schedule.to_string(),
            next_run,
            last_run: None,
            last_result: None,
            status: TaskStatus::Active,
            created_at: now,
        })
    }

    pub fn get_task(&self, id: &str) -> Result<Option<ScheduledTask>> {
        let conn = self.conn();
        match conn.query_row(
            &format!("SELECT {TASK_COLS} FROM scheduled_tasks WHERE id = ?1"),
            [id],
            row_to_task,
        ) {
            Ok(t) => Ok(Some(t)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete_task(&self, id: &str) -> Result<bool> {
        let n = self
            .conn()
            .execute("DELETE FROM scheduled_tasks WHERE id = ?1", [id])?;
        Ok(n > 0)
    }

    pub fn list_tasks(&self, chat_id: i64) -> Result<Vec<ScheduledTask>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLS} FROM scheduled_tasks
             WHERE chat_id = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map([chat_id], row_to_task)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Active tasks whose `next_run` has arrived, earliest first, no limit.
    pub fn due_tasks(&self, now: i64) -> Result<Vec<ScheduledTask>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLS} FROM scheduled_tasks
             WHERE status = 'active' AND next_run <= ?1
             ORDER BY next_run"
        ))?;
        let rows = stmt.query_map([now], row_to_task)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Post-run bookkeeping: stamp `last_run`, store the (bounded) result and
    /// advance `next_run`. Returns whether the row still existed.
    pub fn record_task_run(
        &self,
        id: &str,
        last_run: i64,
        result: &str,
        next_run: i64,
    ) -> Result<bool> {
        let bounded = truncate_chars(result, MAX_RESULT_CHARS);
        let n = self.conn().execute(
            "UPDATE scheduled_tasks
             SET last_run = ?1, last_result = ?2, next_run = ?3
             WHERE id = ?4",
            params![last_run, bounded, next_run, id],
        )?;
        Ok(n > 0)
    }

    /// Flip status; `next_run` is supplied on resume so a paused task never
    /// fires for the window it slept through.
    pub fn set_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        next_run: Option<i64>,
    ) -> Result<bool> {
        let n = match next_run {
            Some(next) => self.conn().execute(
                "UPDATE scheduled_tasks SET status = ?1, next_run = ?2 WHERE id = ?3",
                params![status.to_string(), next, id],
            )?,
            None => self.conn().execute(
                "UPDATE scheduled_tasks SET status = ?1 WHERE id = ?2",
                params![status.to_string(), id],
            )?,
        };
        Ok(n > 0)
    }
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let status: String = row.get(7)?;
    Ok(ScheduledTask {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        prompt: row.get(2)?,
        schedule: row.get(3)?,
        next_run: row.get(4)?,
        last_run: row.get(5)?,
        last_result: row.get(6)?,
        status: status.parse().unwrap_or(TaskStatus::Active),
        created_at: row.get(8)?,
    })
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
