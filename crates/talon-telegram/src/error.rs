use thiserror::Error;

/// Errors produced by the Telegram transport.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("telegram API error: {0}")]
    Api(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("file too large: {size} bytes (max {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TelegramError>;
