//! Inbound message handler: admission, media handling, dispatch.

use std::sync::Arc;
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use teloxide::prelude::*;
use tracing::{info, warn};

use talon_core::Config;
use talon_queue::RateLimiter;

use crate::app::App;
use crate::commands;
use crate::send::deliver_text;
use crate::transport::normalize_voice_extension;
use crate::turn::{run_agent_turn, TurnOptions};

const RATE_LIMIT_TEXT: &str =
    "You're sending messages too quickly. Give it a minute and try again.";

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Chat is not on the allow-list: drop silently (one warning log).
    Denied,
    RateLimited,
    Admitted,
}

/// Allow-list check, then the rate gate. Commands use the check-only probe;
/// turn-producing messages record their admission.
pub(crate) fn admit(
    config: &Config,
    rate: &RateLimiter,
    chat_id: i64,
    is_command: bool,
    now_ms: i64,
) -> Admission {
    if !config.is_allowed_chat(chat_id) {
        return Admission::Denied;
    }
    let allowed = if is_command {
        rate.probe(chat_id, now_ms)
    } else {
        rate.admit(chat_id, now_ms)
    };
    if allowed {
        Admission::Admitted
    } else {
        Admission::RateLimited
    }
}

/// Main handler registered in the teloxide Dispatcher; runs per `Message`.
pub async fn handle_message(msg: Message, app: Arc<App>) -> ResponseResult<()> {
    // Other bots never get a turn.
    if msg.from.as_ref().map(|u| u.is_bot).unwrap_or(false) {
        return Ok(());
    }

    let chat_id = msg.chat.id.0;
    let text = msg.text().or(msg.caption()).unwrap_or("").to_string();
    let is_command = text.starts_with('/');
    let now_ms = Utc::now().timestamp_millis();

    match admit(&app.config, &app.rate, chat_id, is_command, now_ms) {
        Admission::Denied => {
            warn!(chat_id, "dropping message from non-allowlisted chat");
            return Ok(());
        }
        Admission::RateLimited => {
            warn!(chat_id, "rate limit hit");
            deliver_text(&*app.transport, chat_id, RATE_LIMIT_TEXT).await;
            return Ok(());
        }
        Admission::Admitted => {}
    }

    if is_command {
        commands::handle_command(&app, chat_id, &text).await;
        return Ok(());
    }

    // Media turns do their downloading inside the spawned task so the
    // dispatcher loop never blocks on Telegram file I/O.
    if let Some(voice) = msg.voice() {
        let file_id = voice.file.id.clone();
        tokio::spawn(handle_voice(app, chat_id, file_id));
        return Ok(());
    }

    if let Some(photos) = msg.photo() {
        // Highest resolution is the last entry.
        if let Some(photo) = photos.last() {
            let file_id = photo.file.id.clone();
            tokio::spawn(handle_photo(app, chat_id, file_id, text));
            return Ok(());
        }
    }

    if let Some(doc) = msg.document() {
        let file_id = doc.file.id.clone();
        let file_name = doc
            .file_name
            .clone()
            .unwrap_or_else(|| "unnamed file".to_string());
        tokio::spawn(handle_document(app, chat_id, file_id, file_name, text));
        return Ok(());
    }

    if text.is_empty() {
        return Ok(());
    }

    spawn_turn(app, chat_id, text, TurnOptions::default());
    Ok(())
}

fn spawn_turn(app: Arc<App>, chat_id: i64, text: String, opts: TurnOptions) {
    tokio::spawn(async move {
        let key = talon_queue::chat_key(chat_id);
        let _ = app
            .queue
            .enqueue(&key, run_agent_turn(&app, chat_id, &text, opts))
            .await;
    });
}

async fn handle_voice(app: Arc<App>, chat_id: i64, file_id: String) {
    let Some(speech) = app.speech.clone() else {
        deliver_text(
            &*app.transport,
            chat_id,
            "Voice notes need a configured speech-to-text provider.",
        )
        .await;
        return;
    };

    let path = match app.transport.download_file(&file_id).await {
        Ok(path) => normalize_voice_extension(path).await,
        Err(e) => {
            warn!(chat_id, error = %e, "voice download failed");
            deliver_text(&*app.transport, chat_id, "Could not download that voice note.").await;
            return;
        }
    };

    let transcribed = match speech.transcribe(&path).await {
        Ok(text) if !text.is_empty() => text,
        Ok(_) => {
            deliver_text(&*app.transport, chat_id, "The voice note came back empty.").await;
            return;
        }
        Err(e) => {
            warn!(chat_id, error = %e, "transcription failed");
            deliver_text(&*app.transport, chat_id, "Could not transcribe that voice note.").await;
            return;
        }
    };

    info!(chat_id, chars = transcribed.len(), "voice note transcribed");
    let voice_back = wants_voice_reply(&transcribed);
    let message = format!("[Voice transcribed]: {transcribed}");
    let opts = TurnOptions {
        voice_reply: voice_back,
        ..Default::default()
    };
    let key = talon_queue::chat_key(chat_id);
    let _ = app
        .queue
        .enqueue(&key, run_agent_turn(&app, chat_id, &message, opts))
        .await;
}

async fn handle_photo(app: Arc<App>, chat_id: i64, file_id: String, caption: String) {
    let path = match app.transport.download_file(&file_id).await {
        Ok(path) => path,
        Err(e) => {
            warn!(chat_id, error = %e, "photo download failed");
            deliver_text(&*app.transport, chat_id, "Could not download that photo.").await;
            return;
        }
    };
    let mut message = format!(
        "[User sent a photo. It is saved at: {}]",
        path.display()
    );
    if !caption.is_empty() {
        message.push_str(&format!("\n{caption}"));
    }
    spawn_turn(app, chat_id, message, TurnOptions::default());
}

async fn handle_document(
    app: Arc<App>,
    chat_id: i64,
    file_id: String,
    file_name: String,
    caption: String,
) {
    let path = match app.transport.download_file(&file_id).await {
        Ok(path) => path,
        Err(e) => {
            warn!(chat_id, error = %e, "document download failed");
            deliver_text(&*app.transport, chat_id, "Could not download that file.").await;
            return;
        }
    };
    let mut message = format!(
        "[User sent a document: {file_name}. It is saved at: {}]",
        path.display()
    );
    if !caption.is_empty() {
        message.push_str(&format!("\n{caption}"));
    }
    spawn_turn(app, chat_id, message, TurnOptions::default());
}

/// Did the (transcribed) message explicitly ask for a spoken reply?
pub(crate) fn wants_voice_reply(text: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:respond|reply|answer|send)\b[^.!?]{0,40}\bvoice\b|\bvoice\s+(?:reply|response|message|note)\b",
        )
        .expect("static pattern")
    })
    .is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_request_phrases_match() {
        assert!(wants_voice_reply("please respond with voice"));
        assert!(wants_voice_reply("Reply in voice if you can"));
        assert!(wants_voice_reply("send voice back"));
        assert!(wants_voice_reply("a voice reply would be great"));
        assert!(wants_voice_reply("answer me as a voice message"));
    }

    #[test]
    fn ordinary_mentions_of_voice_do_not_match() {
        assert!(!wants_voice_reply("the singer's voice was great"));
        assert!(!wants_voice_reply("just text please"));
        assert!(!wants_voice_reply("I sent you a voicemail yesterday"));
    }

    #[test]
    fn admission_denies_unlisted_chats() {
        let mut config = Config::default();
        config.allowed_chat_ids = vec![7];
        let rate = RateLimiter::new();
        assert_eq!(admit(&config, &rate, 8, false, 0), Admission::Denied);
        assert_eq!(admit(&config, &rate, 7, false, 0), Admission::Admitted);
    }

    #[test]
    fn admission_rate_limits_turns_but_commands_only_probe() {
        let mut config = Config::default();
        config.allowed_chat_ids = vec![7];
        let rate = RateLimiter::new();
        for i in 0..10 {
            assert_eq!(admit(&config, &rate, 7, false, i), Admission::Admitted);
        }
        assert_eq!(admit(&config, &rate, 7, false, 50), Admission::RateLimited);
        // Commands still probe (and also see the full window).
        assert_eq!(admit(&config, &rate, 7, true, 50), Admission::RateLimited);
        // After the window slides, both pass again.
        assert_eq!(admit(&config, &rate, 7, true, 70_000), Admission::Admitted);
        assert_eq!(admit(&config, &rate, 7, false, 70_000), Admission::Admitted);
    }

    #[test]
    fn empty_allow_list_denies_everyone() {
        let config = Config::default();
        let rate = RateLimiter::new();
        assert_eq!(admit(&config, &rate, 1, false, 0), Admission::Denied);
    }
}
