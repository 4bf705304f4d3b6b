//! Chunked delivery with rate-limit retry and plain-text fallback.

use std::time::Duration;

use tracing::warn;

use crate::error::TelegramError;
use crate::split::split_message;
use crate::transport::Transport;

/// Pause between consecutive chunks of one logical message.
const CHUNK_DELAY_MS: u64 = 300;
/// Retry delay when the transport does not advertise one.
const DEFAULT_RETRY_SECS: u64 = 5;

/// Deliver `text` to `chat_id`, split into transport-sized chunks.
///
/// Per chunk: try rich-formatted; on a rate-limit response sleep the
/// advertised (or default) delay and retry once; on persistent rich failure
/// retry once as plain text; log and continue. Delivery never propagates an
/// error into the turn pipeline.
pub async fn deliver_text(transport: &dyn Transport, chat_id: i64, text: &str) {
    let chunks = split_message(text);
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(CHUNK_DELAY_MS)).await;
        }
        send_chunk(transport, chat_id, chunk).await;
    }
}

async fn send_chunk(transport: &dyn Transport, chat_id: i64, chunk: &str) {
    let first = transport.send_text(chat_id, chunk, true).await;
    let Err(e) = first else { return };

    if let Some(wait) = retry_after_secs(&e) {
        tokio::time::sleep(Duration::from_secs(wait)).await;
        if transport.send_text(chat_id, chunk, true).await.is_ok() {
            return;
        }
    }

    // Rich formatting keeps failing: one plain-text attempt, then give up.
    if let Err(e2) = transport.send_text(chat_id, chunk, false).await {
        warn!(chat_id, error = %e2, "plain-text fallback failed, dropping chunk");
    }
}

/// Seconds to wait before retrying, when the error is a rate limit.
fn retry_after_secs(e: &TelegramError) -> Option<u64> {
    match e {
        TelegramError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
        TelegramError::Api(msg) if msg.to_lowercase().contains("too many requests") => {
            Some(parse_retry_after(msg).unwrap_or(DEFAULT_RETRY_SECS))
        }
        _ => None,
    }
}

/// Extract N from a "retry after N" phrase.
fn parse_retry_after(msg: &str) -> Option<u64> {
    let lower = msg.to_lowercase();
    let idx = lower.find("retry after")?;
    lower[idx + "retry after".len()..]
        .split_whitespace()
        .next()
        .and_then(|token| {
            token
                .trim_matches(|c: char| !c.is_ascii_digit())
                .parse()
                .ok()
        })
}
