use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// The internal cancel token was tripped; the runner maps this to
    /// "cancelled" or "timeout" depending on who tripped it.
    #[error("query cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The agent subprocess could not be spawned or exited abnormally.
    #[error("{0}")]
    Process(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
