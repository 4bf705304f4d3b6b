use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The cron expression is malformed or can never fire again.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("store error: {0}")]
    Store(#[from] talon_store::StoreError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
