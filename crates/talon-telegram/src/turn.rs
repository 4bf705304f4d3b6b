//! The agent-turn pipeline: context, session, run, reply, ledger, warnings.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use talon_agent::TurnRequest;
use talon_store::{NewUsage, Role};

use crate::app::App;
use crate::send::deliver_text;
use crate::typing::TypingHandle;

/// Cache-read size past which the user gets a context-occupancy warning.
pub const CONTEXT_WARN_THRESHOLD: u64 = 150_000;
/// Advertised context window the percentage is computed against.
pub const CONTEXT_WINDOW_TOKENS: u64 = 200_000;

#[derive(Debug, Clone, Copy)]
pub struct TurnOptions {
    /// Skipped for respin turns.
    pub save_memory: bool,
    /// The user explicitly asked for a voice reply this turn.
    pub voice_reply: bool,
    /// Scheduled runs skip the typing indicator.
    pub typing: bool,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            save_memory: true,
            voice_reply: false,
            typing: true,
        }
    }
}

/// Run one full turn for a chat. Callers route this through the queue.
///
/// Returns the reply text, or the turn's error string (the user has already
/// been answered either way; the error form feeds scheduled-task records).
pub async fn run_agent_turn(
    app: &Arc<App>,
    chat_id: i64,
    user_text: &str,
    opts: TurnOptions,
) -> Result<String, String> {
    let typing = opts
        .typing
        .then(|| TypingHandle::start(app.transport.clone(), chat_id));
    let now = Utc::now().timestamp();

    let context = app
        .memory
        .build_context(chat_id, user_text, now)
        .unwrap_or_else(|e| {
            warn!(chat_id, error = %e, "context build failed");
            String::new()
        });
    let message = if context.is_empty() {
        user_text.to_string()
    } else {
        format!("{context}\n\n{user_text}")
    };

    let stored_session = app.store.get_session(chat_id).unwrap_or_else(|e| {
        warn!(chat_id, error = %e, "session lookup failed");
        None
    });

    // Replaces any prior in-flight handle for this chat.
    let cancel = CancellationToken::new();
    app.cancellations.insert(chat_id, cancel.clone());

    let outcome = app
        .runner
        .run(TurnRequest {
            message,
            session_id: stored_session.clone(),
            on_progress: None,
            cancel: Some(cancel),
            extra_env: Default::default(),
        })
        .await;

    // Cleanup runs before anything that could fail while replying.
    app.cancellations.remove(&chat_id);
    if let Some(typing) = typing {
        typing.stop();
    }

    info!(
        chat_id,
        duration_ms = outcome.duration_ms,
        num_turns = outcome.num_turns,
        error = outcome.error.as_deref().unwrap_or(""),
        "turn finished"
    );

    let now = Utc::now().timestamp();
    if let Some(sid) = &outcome.session_id {
        if let Err(e) = app.store.set_session(chat_id, sid, now) {
            warn!(chat_id, error = %e, "session upsert failed");
        }
    }
    let session_for_rows = outcome.session_id.clone().or(stored_session);

    if opts.save_memory {
        if outcome.error.is_none() {
            if let Err(e) = app.memory.record_turn(
                chat_id,
                user_text,
                &outcome.text,
                session_for_rows.as_deref(),
                now,
            ) {
                warn!(chat_id, error = %e, "turn ingest failed");
            }
        } else {
            // Failed turns still keep the user's side of the log.
            let _ = app.store.append_conversation(
                chat_id,
                session_for_rows.as_deref(),
                Role::User,
                user_text,
                now,
            );
        }
    }

    let mut reply = outcome.text.clone();
    if let Some(err) = &outcome.error {
        if err.contains("exited with code 1") {
            let last = app.store.last_cache_read(chat_id).unwrap_or(0);
            reply = context_exhaustion_text(last);
        }
    }

    let mut voice_sent = false;
    if app.voice_reply_enabled(chat_id, opts.voice_reply) && outcome.error.is_none() {
        if let Some(speech) = &app.speech {
            match speech.synthesize(&reply).await {
                Ok(audio) => match app.transport.send_voice(chat_id, audio).await {
                    Ok(()) => voice_sent = true,
                    Err(e) => warn!(chat_id, error = %e, "voice send failed, falling back to text"),
                },
                Err(e) => warn!(chat_id, error = %e, "synthesis failed, falling back to text"),
            }
        }
    }
    if !voice_sent && !reply.is_empty() {
        deliver_text(&*app.transport, chat_id, &reply).await;
    }

    if let Some(usage) = outcome.usage {
        let cost = if usage.total_cost_usd > 0.0 {
            usage.total_cost_usd
        } else {
            outcome.cost_usd
        };
        let row = NewUsage {
            chat_id,
            session_id: session_for_rows,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_read: usage.cache_read_input_tokens,
            cost_usd: cost,
            did_compact: outcome.did_compact,
        };
        if let Err(e) = app.store.record_usage(&row, now) {
            warn!(chat_id, error = %e, "usage ledger write failed");
        }
        if let Some(warning) = context_warning(outcome.did_compact, outcome.last_cache_read) {
            deliver_text(&*app.transport, chat_id, &warning).await;
        }
    }

    match outcome.error {
        None => Ok(outcome.text),
        Some(e) => Err(e),
    }
}

/// Post-turn context heuristic: compaction beats the percentage warning.
fn context_warning(did_compact: bool, last_cache_read: u64) -> Option<String> {
    if did_compact {
        Some(
            "⚠️ The agent compacted its context this turn; older details may now be summarized. \
             /newchat starts a fresh session."
                .to_string(),
        )
    } else if last_cache_read > CONTEXT_WARN_THRESHOLD {
        let pct = last_cache_read * 100 / CONTEXT_WINDOW_TOKENS;
        Some(format!(
            "⚠️ Context is at ~{pct}% of {CONTEXT_WINDOW_TOKENS} tokens ({last_cache_read} cached). \
             Consider /newchat soon."
        ))
    } else {
        None
    }
}

fn context_exhaustion_text(last_cache_read: u64) -> String {
    format!(
        "The agent process died, likely out of context (last known cache read: {last_cache_read} \
         tokens). Use /newchat to reset the session, then /respin to carry recent history over."
    )
}
