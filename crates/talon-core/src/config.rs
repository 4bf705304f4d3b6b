//! Typed runtime configuration, built from the parsed `.env` map.
//!
//! Every key is optional at the parsing level; components treat an empty
//! string as "feature disabled". The one hard requirement, a non-empty chat
//! allow-list, is enforced by the gateway at startup, not here.

use std::collections::HashMap;

use tracing::warn;

/// Default agent turn ceiling when `AGENT_TIMEOUT_MS` is unset or invalid.
pub const DEFAULT_AGENT_TIMEOUT_MS: u64 = 300_000;

/// Database + PID file directory, relative to the project root.
pub const STORE_DIR: &str = "store";
/// Downloaded attachment directory, relative to the project root.
pub const UPLOADS_DIR: &str = "workspace/uploads";

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub bot_token: String,
    /// Chats permitted to talk to the bot. Empty means the service refuses to start.
    pub allowed_chat_ids: Vec<i64>,
    pub claude_oauth_token: String,
    pub anthropic_api_key: String,
    pub stt_api_key: String,
    pub elevenlabs_api_key: String,
    pub elevenlabs_voice_id: String,
    pub n8n_base_url: String,
    pub n8n_api_key: String,
    pub gemini_api_key: String,
    pub gemini_image_model: String,
    pub system_prompt_append: String,
    pub agent_timeout_ms: u64,
}

impl Config {
    pub fn from_env(env: &HashMap<String, String>) -> Self {
        let get = |key: &str| env.get(key).cloned().unwrap_or_default();

        let agent_timeout_ms = match get("AGENT_TIMEOUT_MS").parse::<u64>() {
            Ok(ms) if ms > 0 => ms,
            _ => DEFAULT_AGENT_TIMEOUT_MS,
        };

        Self {
            bot_token: get("TELEGRAM_BOT_TOKEN"),
            allowed_chat_ids: parse_chat_ids(&get("ALLOWED_CHAT_IDS")),
            claude_oauth_token: get("CLAUDE_CODE_OAUTH_TOKEN"),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            stt_api_key: get("STT_API_KEY"),
            elevenlabs_api_key: get("ELEVENLABS_API_KEY"),
            elevenlabs_voice_id: get("ELEVENLABS_VOICE_ID"),
            n8n_base_url: get("N8N_BASE_URL"),
            n8n_api_key: get("N8N_API_KEY"),
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_image_model: get("GEMINI_IMAGE_MODEL"),
            system_prompt_append: get("CLAUDE_SYSTEM_PROMPT_APPEND"),
            agent_timeout_ms,
        }
    }

    pub fn is_allowed_chat(&self, chat_id: i64) -> bool {
        self.allowed_chat_ids.contains(&chat_id)
    }

    pub fn stt_enabled(&self) -> bool {
        !self.stt_api_key.is_empty()
    }

    pub fn tts_enabled(&self) -> bool {
        !self.elevenlabs_api_key.is_empty() && !self.elevenlabs_voice_id.is_empty()
    }

    pub fn webhooks_enabled(&self) -> bool {
        !self.n8n_base_url.is_empty()
    }

    pub fn image_enabled(&self) -> bool {
        !self.gemini_api_key.is_empty()
    }
}

/// Parse the comma-separated allow-list. Entries must be an optionally-signed
/// integer; anything else is skipped with a warning.
fn parse_chat_ids(raw: &str) -> Vec<i64> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| {
            if is_chat_id(s) {
                s.parse::<i64>().ok()
            } else {
                warn!(entry = %s, "ignoring malformed ALLOWED_CHAT_IDS entry");
                None
            }
        })
        .collect()
}

fn is_chat_id(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn missing_keys_default_to_disabled() {
        let cfg = Config::from_env(&HashMap::new());
        assert!(cfg.bot_token.is_empty());
        assert!(cfg.allowed_chat_ids.is_empty());
        assert!(!cfg.tts_enabled());
        assert!(!cfg.stt_enabled());
        assert_eq!(cfg.agent_timeout_ms, DEFAULT_AGENT_TIMEOUT_MS);
    }

    #[test]
    fn chat_ids_accept_negative_group_ids() {
        let cfg = Config::from_env(&env_of(&[("ALLOWED_CHAT_IDS", "123, -1001234567890")]));
        assert_eq!(cfg.allowed_chat_ids, vec![123, -1_001_234_567_890]);
    }

    #[test]
    fn malformed_chat_id_entries_are_skipped() {
        let cfg = Config::from_env(&env_of(&[("ALLOWED_CHAT_IDS", "abc, 42, 1.5, +7,")]));
        assert_eq!(cfg.allowed_chat_ids, vec![42]);
    }

    #[test]
    fn tts_requires_key_and_voice() {
        let cfg = Config::from_env(&env_of(&[("ELEVENLABS_API_KEY", "k")]));
        assert!(!cfg.tts_enabled());
        let cfg = Config::from_env(&env_of(&[
            ("ELEVENLABS_API_KEY", "k"),
            ("ELEVENLABS_VOICE_ID", "v"),
        ]));
        assert!(cfg.tts_enabled());
    }

    #[test]
    fn invalid_timeout_falls_back_to_default() {
        let cfg = Config::from_env(&env_of(&[("AGENT_TIMEOUT_MS", "soon")]));
        assert_eq!(cfg.agent_timeout_ms, DEFAULT_AGENT_TIMEOUT_MS);
        let cfg = Config::from_env(&env_of(&[("AGENT_TIMEOUT_MS", "120000")]));
        assert_eq!(cfg.agent_timeout_ms, 120_000);
    }
}
