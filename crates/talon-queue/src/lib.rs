//! `talon-queue` — admission control for agent turns.
//!
//! Three gates compose on every admission: a per-chat sliding-window rate
//! limiter, a per-key FIFO that strictly serialises turns within a chat, and
//! a fair global semaphore capping concurrent execution across all chats.
//! Scheduled work shares the semaphore under `__task__`-prefixed keys so a
//! long cron run can never wedge a user's interactive stream.

pub mod rate;
pub mod serial;

pub use rate::{RateLimiter, MAX_MESSAGES_PER_MINUTE};
pub use serial::{TurnQueue, MAX_CONCURRENT_TURNS};

/// Queue-key namespace for scheduled executions, disjoint from interactive
/// per-chat keys.
pub fn task_key(chat_id: i64) -> String {
    format!("__task__{chat_id}")
}

/// Interactive per-chat queue key.
pub fn chat_key(chat_id: i64) -> String {
    chat_id.to_string()
}
