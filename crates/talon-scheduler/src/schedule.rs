//! Five-field cron evaluation in local time.

use std::str::FromStr;

use chrono::{DateTime, Local};
use cron::Schedule;

use crate::error::{Result, SchedulerError};

/// Compute the next strict-future fire instant for a five-field cron
/// expression ("min hour dom mon dow"), as unix seconds. Evaluation happens
/// in the host's local timezone.
pub fn compute_next_run(expr: &str, after: DateTime<Local>) -> Result<i64> {
    let schedule = parse(expr)?;
    let next = schedule.after(&after).next().ok_or_else(|| {
        SchedulerError::InvalidSchedule(format!("'{expr}' has no future occurrence"))
    })?;
    Ok(next.timestamp())
}

/// [`compute_next_run`] anchored at the current moment.
pub fn next_run_after_now(expr: &str) -> Result<i64> {
    compute_next_run(expr, Local::now())
}

/// Total, no-throw validity check.
pub fn validate(expr: &str) -> bool {
    parse(expr).is_ok()
}

fn parse(expr: &str) -> Result<Schedule> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(SchedulerError::InvalidSchedule(format!(
            "expected 5 fields (min hour dom mon dow), got {}",
            fields.len()
        )));
    }
    // The cron crate wants a leading seconds field; pin it to zero.
    let with_seconds = format!("0 {}", fields.join(" "));
    Schedule::from_str(&with_seconds)
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))
}
