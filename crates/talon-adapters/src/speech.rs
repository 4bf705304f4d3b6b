//! Speech collaborators: Whisper-style transcription (multipart upload) and
//! ElevenLabs-style synthesis (JSON request, voice id in the path).
//!
//! Both are opt-in: an empty key turns the corresponding direction off.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use tracing::debug;

use crate::error::{AdapterError, Result};
use crate::redact::redact;
use crate::ADAPTER_TIMEOUT_SECS;

const STT_ENDPOINT: &str = "https://api.openai.com/v1/audio/transcriptions";
const STT_MODEL: &str = "whisper-1";
const TTS_ENDPOINT: &str = "https://api.elevenlabs.io/v1/text-to-speech";
const TTS_MODEL: &str = "eleven_multilingual_v2";
/// Telegram voice notes want OGG/Opus.
const TTS_OUTPUT_FORMAT: &str = "opus_48000_64";
/// Synthesis input ceiling; longer replies are cut here.
const MAX_TTS_CHARS: usize = 5_000;

#[async_trait]
pub trait Speech: Send + Sync {
    /// Transcribe an audio file to text.
    async fn transcribe(&self, audio_path: &Path) -> Result<String>;
    /// Synthesize text to OGG/Opus bytes.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

pub struct HttpSpeech {
    http: reqwest::Client,
    stt_api_key: String,
    tts_api_key: String,
    voice_id: String,
}

impl HttpSpeech {
    pub fn new(stt_api_key: String, tts_api_key: String, voice_id: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(ADAPTER_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            http,
            stt_api_key,
            tts_api_key,
            voice_id,
        }
    }

    fn redacted(&self, msg: &str) -> String {
        redact(msg, &[&self.stt_api_key, &self.tts_api_key])
    }
}

#[async_trait]
impl Speech for HttpSpeech {
    async fn transcribe(&self, audio_path: &Path) -> Result<String> {
        if self.stt_api_key.is_empty() {
            return Err(AdapterError::NotConfigured("speech-to-text"));
        }

        let bytes = tokio::fs::read(audio_path).await?;
        let filename = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "voice.ogg".to_string());

        let form = multipart::Form::new()
            .text("model", STT_MODEL)
            .part("file", multipart::Part::bytes(bytes).file_name(filename));

        let resp = self
            .http
            .post(STT_ENDPOINT)
            .bearer_auth(&self.stt_api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.classify(e))?;
        if !status.is_success() {
            return Err(AdapterError::Api {
                status: status.as_u16(),
                message: self.redacted(&body),
            });
        }

        let parsed: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
            AdapterError::Invalid(format!("unparseable transcription response: {e}"))
        })?;
        let text = parsed
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .trim()
            .to_string();
        debug!(chars = text.len(), "transcription complete");
        Ok(text)
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        if self.tts_api_key.is_empty() || self.voice_id.is_empty() {
            return Err(AdapterError::NotConfigured("text-to-speech"));
        }

        let bounded: String = text.chars().take(MAX_TTS_CHARS).collect();
        let url = format!(
            "{TTS_ENDPOINT}/{}?output_format={TTS_OUTPUT_FORMAT}",
            self.voice_id
        );
        let body = serde_json::json!({
            "text": bounded,
            "model_id": TTS_MODEL,
        });

        let resp = self
            .http
            .post(&url)
            .header("xi-api-key", &self.tts_api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AdapterError::Api {
                status: status.as_u16(),
                message: self.redacted(&body),
            });
        }

        let audio = resp.bytes().await.map_err(|e| self.classify(e))?;
        debug!(bytes = audio.len(), "synthesis complete");
        Ok(audio.to_vec())
    }
}

impl HttpSpeech {
    fn classify(&self, e: reqwest::Error) -> AdapterError {
        if e.is_timeout() {
            AdapterError::Timeout
        } else {
            AdapterError::Invalid(self.redacted(&e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transcribe_without_key_is_not_configured() {
        let speech = HttpSpeech::new(String::new(), "tts-key".into(), "voice".into());
        let err = speech.transcribe(Path::new("/tmp/nope.ogg")).await.unwrap_err();
        assert!(matches!(err, AdapterError::NotConfigured("speech-to-text")));
    }

    #[tokio::test]
    async fn synthesize_without_voice_is_not_configured() {
        let speech = HttpSpeech::new("stt-key".into(), "tts-key".into(), String::new());
        let err = speech.synthesize("hello").await.unwrap_err();
        assert!(matches!(err, AdapterError::NotConfigured("text-to-speech")));
    }

    #[test]
    fn redaction_covers_both_keys() {
        let speech = HttpSpeech::new("stt-secret".into(), "tts-secret".into(), "v".into());
        let msg = speech.redacted("failed: stt-secret and tts-secret leaked");
        assert!(!msg.contains("stt-secret"));
        assert!(!msg.contains("tts-secret"));
    }
}
