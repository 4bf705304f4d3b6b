//! Gemini image generation with explicit failure classification.

use std::time::Duration;

use base64::Engine;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::redact::redact;
use crate::ADAPTER_TIMEOUT_SECS;

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
/// Prompts past this length are rejected before any network traffic.
pub const MAX_PROMPT_CHARS: usize = 2_000;

#[derive(Debug, Error, PartialEq)]
pub enum ImageError {
    /// The provider refused the prompt on safety grounds.
    #[error("the image request was blocked by the provider's safety filter")]
    SafetyBlocked,

    #[error("the image provider is rate limiting; try again in a minute")]
    RateLimited,

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime: String,
}

pub struct ImageClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl ImageClient {
    pub fn new(api_key: String, model: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(ADAPTER_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_key,
            model,
        }
    }

    pub async fn generate(&self, prompt: &str) -> Result<GeneratedImage, ImageError> {
        if prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(ImageError::Other(format!(
                "prompt too long ({} chars, max {MAX_PROMPT_CHARS})",
                prompt.chars().count()
            )));
        }

        let url = format!(
            "{GEMINI_ENDPOINT}/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseModalities": ["IMAGE", "TEXT"] },
        });

        let resp = match self.http.post(&url).json(&body).send().await {
            Ok(resp) => resp,
            Err(e) => return Err(self.classify_transport(e)),
        };

        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        if let Some(err) = classify_response(status, &text, &parsed) {
            return Err(match err {
                ImageError::Other(msg) => ImageError::Other(redact(&msg, &[&self.api_key])),
                other => other,
            });
        }

        // First inline-data part of the first candidate is the image.
        let part = parsed
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .and_then(|parts| {
                parts
                    .iter()
                    .find(|p| p.get("inlineData").is_some())
                    .cloned()
            });
        let Some(part) = part else {
            return Err(ImageError::Other("no image in provider response".to_string()));
        };

        let mime = part
            .pointer("/inlineData/mimeType")
            .and_then(Value::as_str)
            .unwrap_or("image/png")
            .to_string();
        let data = part
            .pointer("/inlineData/data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| ImageError::Other(format!("bad image payload: {e}")))?;

        debug!(bytes = bytes.len(), %mime, "image generated");
        Ok(GeneratedImage { bytes, mime })
    }

    fn classify_transport(&self, e: reqwest::Error) -> ImageError {
        if e.is_timeout() {
            ImageError::Other("image request timed out after 30s".to_string())
        } else {
            ImageError::Other(redact(&e.to_string(), &[&self.api_key]))
        }
    }
}

/// Map an HTTP response to a failure, or `None` when it looks usable.
///
/// Safety blocks surface either as structured prompt feedback or as loose
/// message text; both spellings are checked.
fn classify_response(status: u16, raw: &str, parsed: &Value) -> Option<ImageError> {
    if parsed
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
        .is_some()
    {
        return Some(ImageError::SafetyBlocked);
    }
    if (200..300).contains(&status) {
        return None;
    }
    let message = parsed
        .pointer("/error/message")
        .and_then(Value::as_str)
        .unwrap_or(raw);
    let lower = message.to_lowercase();
    if lower.contains("safety") || lower.contains("blocked") {
        return Some(ImageError::SafetyBlocked);
    }
    if status == 429 || lower.contains("rate limit") {
        return Some(ImageError::RateLimited);
    }
    Some(ImageError::Other(format!("HTTP {status}: {message}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn oversized_prompt_is_rejected_before_any_network_call() {
        let client = ImageClient::new("key".into(), "model".into());
        let prompt = "x".repeat(MAX_PROMPT_CHARS + 1);
        let err = client.generate(&prompt).await.unwrap_err();
        assert!(matches!(err, ImageError::Other(ref m) if m.contains("prompt too long")));
    }

    #[test]
    fn structured_block_reason_is_a_safety_block() {
        let parsed: Value =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap();
        assert_eq!(
            classify_response(200, "{}", &parsed),
            Some(ImageError::SafetyBlocked)
        );
    }

    #[test]
    fn message_substrings_classify_as_safety_block() {
        assert_eq!(
            classify_response(400, "request blocked by policy", &Value::Null),
            Some(ImageError::SafetyBlocked)
        );
        assert_eq!(
            classify_response(400, "flagged for Safety reasons", &Value::Null),
            Some(ImageError::SafetyBlocked)
        );
    }

    #[test]
    fn successful_body_mentioning_safety_ratings_is_not_blocked() {
        assert_eq!(
            classify_response(200, r#"{"candidates":[{"safetyRatings":[]}]}"#, &Value::Null),
            None
        );
    }

    #[test]
    fn status_429_and_rate_limit_text_classify_as_rate_limited() {
        assert_eq!(classify_response(429, "", &Value::Null), Some(ImageError::RateLimited));
        assert_eq!(
            classify_response(400, "Rate limit exceeded", &Value::Null),
            Some(ImageError::RateLimited)
        );
    }

    #[test]
    fn other_http_failures_carry_the_message() {
        let parsed: Value =
            serde_json::from_str(r#"{"error":{"message":"model not found"}}"#).unwrap();
        let err = classify_response(404, "ignored", &parsed).unwrap();
        assert_eq!(err, ImageError::Other("HTTP 404: model not found".to_string()));
    }

    #[test]
    fn success_is_not_an_error() {
        assert_eq!(classify_response(200, r#"{"candidates":[]}"#, &Value::Null), None);
    }
}
