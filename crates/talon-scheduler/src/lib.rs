//! `talon-scheduler` — cron-driven prompt execution.
//!
//! Tasks live in the shared store (`scheduled_tasks`); the engine polls for
//! due rows once a minute and hands each to a [`TaskExecutor`]. Schedules
//! are five-field cron expressions evaluated in the host's local timezone.

pub mod engine;
pub mod error;
pub mod schedule;

pub use engine::{SchedulerEngine, TaskExecutor, SCHEDULER_POLL_MS};
pub use error::{Result, SchedulerError};
pub use schedule::{compute_next_run, next_run_after_now, validate};
