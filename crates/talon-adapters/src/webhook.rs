//! n8n webhook invoker.
//!
//! Paths are caller-supplied (the `/n8n` command), so every segment is
//! validated before it goes anywhere near a URL.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::redact::redact;
use crate::ADAPTER_TIMEOUT_SECS;

#[derive(Debug, Clone)]
pub struct WebhookResult {
    pub ok: bool,
    pub data: Value,
    pub error: Option<String>,
}

impl WebhookResult {
    fn failure(error: String) -> Self {
        Self {
            ok: false,
            data: Value::Null,
            error: Some(error),
        }
    }
}

pub struct WebhookClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl WebhookClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(ADAPTER_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// POST `params` to `<base>/<path>`. Failures come back as a value; this
    /// never panics and never throws into the turn pipeline.
    pub async fn call(&self, path: &str, params: Value) -> WebhookResult {
        let path = match sanitize_path(path) {
            Ok(p) => p,
            Err(e) => return WebhookResult::failure(e),
        };
        let url = format!("{}/{}", self.base_url, path);
        debug!(%url, "webhook call");

        let mut req = self.http.post(&url).json(&params);
        if !self.api_key.is_empty() {
            req = req.header("X-N8N-API-KEY", &self.api_key);
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                return WebhookResult::failure("webhook timed out after 30s".to_string());
            }
            Err(e) => {
                return WebhookResult::failure(redact(&e.to_string(), &[&self.api_key]));
            }
        };

        let status = resp.status();
        // Read the body exactly once; keep the raw text when it isn't JSON.
        let text = match resp.text().await {
            Ok(text) => text,
            Err(e) => return WebhookResult::failure(redact(&e.to_string(), &[&self.api_key])),
        };
        let data = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        if status.is_success() {
            WebhookResult {
                ok: true,
                data,
                error: None,
            }
        } else {
            WebhookResult {
                ok: false,
                data,
                error: Some(format!("webhook returned HTTP {}", status.as_u16())),
            }
        }
    }
}

/// Validate a caller-supplied webhook path.
///
/// Every `/`-separated segment must be non-empty, contain only
/// `[A-Za-z0-9_-]`, and must not be `.` or `..`. Backslashes are rejected
/// outright.
pub fn sanitize_path(path: &str) -> Result<String, String> {
    if path.is_empty() {
        return Err("webhook path is empty".to_string());
    }
    if path.contains('\\') {
        return Err("webhook path must not contain backslashes".to_string());
    }
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    for segment in &segments {
        if segment.is_empty() {
            return Err("webhook path has an empty segment".to_string());
        }
        if *segment == "." || *segment == ".." {
            return Err("webhook path must not contain relative segments".to_string());
        }
        if !segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(format!("invalid webhook path segment: {segment}"));
        }
    }
    Ok(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_segments_pass() {
        assert_eq!(sanitize_path("gmail").unwrap(), "gmail");
        assert_eq!(sanitize_path("hooks/todo-list_v2").unwrap(), "hooks/todo-list_v2");
        assert_eq!(sanitize_path("/gmail/").unwrap(), "gmail");
    }

    #[test]
    fn traversal_is_rejected() {
        assert!(sanitize_path("../secrets").is_err());
        assert!(sanitize_path("a/../b").is_err());
        assert!(sanitize_path(".").is_err());
    }

    #[test]
    fn bad_characters_are_rejected() {
        assert!(sanitize_path("a b").is_err());
        assert!(sanitize_path("a\\b").is_err());
        assert!(sanitize_path("a?x=1").is_err());
        assert!(sanitize_path("a//b").is_err());
        assert!(sanitize_path("").is_err());
    }

    #[tokio::test]
    async fn invalid_path_fails_without_a_network_call() {
        let client = WebhookClient::new("http://127.0.0.1:1".to_string(), "key".to_string());
        let result = client.call("../../etc", Value::Null).await;
        assert!(!result.ok);
        assert!(result.error.unwrap().contains("relative segments"));
    }
}
