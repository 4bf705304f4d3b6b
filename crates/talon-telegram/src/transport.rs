//! The transport boundary: a small interface the orchestrator talks to, with
//! the teloxide-backed production implementation behind it. Tests substitute
//! an in-memory fake.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use talon_adapters::redact::redact;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, InputFile, ParseMode};
use tracing::warn;

use crate::error::{Result, TelegramError};

/// Attachment ceiling, enforced both before (metadata) and after (buffer)
/// download.
pub const MAX_DOWNLOAD_BYTES: u64 = 10 * 1024 * 1024;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message. `markdown` selects the rich-formatted variant.
    async fn send_text(&self, chat_id: i64, text: &str, markdown: bool) -> Result<()>;
    /// Send a voice note (OGG/Opus bytes).
    async fn send_voice(&self, chat_id: i64, audio: Vec<u8>) -> Result<()>;
    /// Send a photo.
    async fn send_photo(&self, chat_id: i64, bytes: Vec<u8>) -> Result<()>;
    /// Refresh the "typing…" indicator.
    async fn send_action(&self, chat_id: i64) -> Result<()>;
    /// Download a file into the uploads directory, returning the local path.
    async fn download_file(&self, file_id: &str) -> Result<PathBuf>;
}

pub struct TelegramTransport {
    bot: Bot,
    uploads_dir: PathBuf,
}

impl TelegramTransport {
    pub fn new(bot: Bot, uploads_dir: PathBuf) -> Self {
        Self { bot, uploads_dir }
    }

    /// Errors can embed the API URL, which carries the bot token; strip it
    /// before anything gets logged or surfaced.
    fn map_err(&self, e: teloxide::RequestError) -> TelegramError {
        match e {
            teloxide::RequestError::RetryAfter(secs) => TelegramError::RateLimited {
                retry_after_secs: secs.seconds() as u64,
            },
            other => TelegramError::Api(redact(&other.to_string(), &[self.bot.token()])),
        }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_text(&self, chat_id: i64, text: &str, markdown: bool) -> Result<()> {
        let req = self.bot.send_message(ChatId(chat_id), text);
        let req = if markdown {
            req.parse_mode(ParseMode::Markdown)
        } else {
            req
        };
        req.await.map_err(|e| self.map_err(e))?;
        Ok(())
    }

    async fn send_voice(&self, chat_id: i64, audio: Vec<u8>) -> Result<()> {
        let input = InputFile::memory(audio).file_name("voice.ogg");
        self.bot
            .send_voice(ChatId(chat_id), input)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(())
    }

    async fn send_photo(&self, chat_id: i64, bytes: Vec<u8>) -> Result<()> {
        let input = InputFile::memory(bytes).file_name("image.png");
        self.bot
            .send_photo(ChatId(chat_id), input)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(())
    }

    async fn send_action(&self, chat_id: i64) -> Result<()> {
        self.bot
            .send_chat_action(ChatId(chat_id), ChatAction::Typing)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> Result<PathBuf> {
        let file = self.bot.get_file(file_id).await.map_err(|e| self.map_err(e))?;

        // Pre-check against the metadata size.
        ensure_within_limit(u64::from(file.size))?;

        let mut buf: Vec<u8> = Vec::new();
        self.bot
            .download_file(&file.path, &mut buf)
            .await
            .map_err(|e| TelegramError::Api(redact(&e.to_string(), &[self.bot.token()])))?;

        // Post-check against what actually arrived.
        ensure_within_limit(buf.len() as u64)?;

        tokio::fs::create_dir_all(&self.uploads_dir).await?;
        let local = self
            .uploads_dir
            .join(upload_filename(file_id, &file.path, now_ms()));
        tokio::fs::write(&local, &buf).await?;
        Ok(local)
    }
}

/// Applied twice per download: to the advertised size before fetching, and
/// to the received buffer after.
fn ensure_within_limit(size: u64) -> Result<()> {
    if size > MAX_DOWNLOAD_BYTES {
        return Err(TelegramError::FileTooLarge {
            size,
            max: MAX_DOWNLOAD_BYTES,
        });
    }
    Ok(())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Local name for a downloaded attachment: `<epoch_ms>-<file_id_prefix>.<ext>`.
/// The extension comes from the remote path, defaulting to `bin`.
pub fn upload_filename(file_id: &str, remote_path: &str, epoch_ms: u64) -> String {
    let prefix: String = file_id.chars().take(8).collect();
    let ext = Path::new(remote_path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin");
    format!("{epoch_ms}-{prefix}.{ext}")
}

/// Rename a downloaded `.oga` voice note to `.ogg` (what the STT endpoint and
/// players expect). Other extensions pass through untouched.
pub async fn normalize_voice_extension(path: PathBuf) -> PathBuf {
    if path.extension().and_then(|e| e.to_str()) != Some("oga") {
        return path;
    }
    let renamed = path.with_extension("ogg");
    match tokio::fs::rename(&path, &renamed).await {
        Ok(()) => renamed,
        Err(e) => {
            warn!(error = %e, "voice rename failed; keeping .oga");
            path
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_limit_boundary() {
        assert!(ensure_within_limit(MAX_DOWNLOAD_BYTES).is_ok());
        let err = ensure_within_limit(MAX_DOWNLOAD_BYTES + 1).unwrap_err();
        assert!(matches!(err, TelegramError::FileTooLarge { .. }));
    }

    #[test]
    fn upload_filename_shape() {
        let name = upload_filename("AgACAgIAAxkBAAI", "photos/file_42.jpg", 1_700_000_000_123);
        assert_eq!(name, "1700000000123-AgACAgIA.jpg");
    }

    #[test]
    fn upload_filename_defaults_extension() {
        let name = upload_filename("abc", "weird/no_extension", 5);
        assert_eq!(name, "5-abc.bin");
    }

    #[tokio::test]
    async fn oga_voice_notes_are_renamed_to_ogg() {
        let dir = tempfile::tempdir().unwrap();
        let oga = dir.path().join("123-abc.oga");
        tokio::fs::write(&oga, b"fake audio").await.unwrap();
        let result = normalize_voice_extension(oga.clone()).await;
        assert_eq!(result.extension().unwrap(), "ogg");
        assert!(!oga.exists());
        assert!(result.exists());
    }

    #[tokio::test]
    async fn non_oga_files_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mp3 = dir.path().join("123-abc.mp3");
        tokio::fs::write(&mp3, b"fake audio").await.unwrap();
        let result = normalize_voice_extension(mp3.clone()).await;
        assert_eq!(result, mp3);
        assert!(mp3.exists());
    }
}
