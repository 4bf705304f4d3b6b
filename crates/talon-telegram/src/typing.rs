//! Typing indicator: Telegram's status expires after ~5 s, so refresh every 4.

use std::sync::Arc;
use std::time::Duration;

use crate::transport::Transport;

/// Refresh cadence for the "typing…" chat action.
pub const TYPING_REFRESH_MS: u64 = 4_000;

/// Handle to the background refresh task. Dropping it without `stop()` also
/// aborts the loop.
pub struct TypingHandle(tokio::task::JoinHandle<()>);

impl TypingHandle {
    /// Send the action immediately, then keep refreshing until stopped.
    pub fn start(transport: Arc<dyn Transport>, chat_id: i64) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                let _ = transport.send_action(chat_id).await;
                tokio::time::sleep(Duration::from_millis(TYPING_REFRESH_MS)).await;
            }
        });
        TypingHandle(handle)
    }

    pub fn stop(self) {
        self.0.abort();
    }
}

impl Drop for TypingHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}
