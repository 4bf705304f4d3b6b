//! Tagged events produced by the streaming query interface, and the JSONL
//! parser that turns raw `stream-json` lines into them.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// First event of a run: carries the session id and advertised
    /// capabilities.
    Init {
        session_id: String,
        model: Option<String>,
        tools: Vec<String>,
    },
    /// The agent auto-compacted its own context.
    CompactBoundary { pre_compact_tokens: Option<u64> },
    /// One model call. `cache_read_input_tokens` proxies context occupancy.
    Assistant {
        cache_read_input_tokens: Option<u64>,
        error: Option<String>,
    },
    AuthStatus { error: Option<String> },
    /// Terminal event.
    Result(ResultEvent),
    /// Unrecognised tag; observed and ignored.
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultEvent {
    pub subtype: ResultSubtype,
    pub text: Option<String>,
    pub cost_usd: f64,
    pub num_turns: u32,
    pub usage: Option<Usage>,
    pub errors: Vec<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSubtype {
    Success,
    ErrorMaxTurns,
    ErrorMaxBudgetUsd,
    ErrorDuringExecution,
    ErrorMaxStructuredOutputRetries,
    Unknown,
}

impl ResultSubtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ErrorMaxTurns => "error_max_turns",
            Self::ErrorMaxBudgetUsd => "error_max_budget_usd",
            Self::ErrorDuringExecution => "error_during_execution",
            Self::ErrorMaxStructuredOutputRetries => "error_max_structured_output_retries",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_input_tokens: u64,
    pub total_cost_usd: f64,
}

/// Parse one stdout line. Non-JSON lines and empty lines yield `None` and
/// are skipped by the backend.
pub fn parse_event(line: &str) -> Option<AgentEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let v: Value = serde_json::from_str(line).ok()?;
    let kind = v.get("type").and_then(Value::as_str)?;

    let event = match kind {
        "system" => match v.get("subtype").and_then(Value::as_str) {
            Some("init") => AgentEvent::Init {
                session_id: v
                    .get("session_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                model: v.get("model").and_then(Value::as_str).map(String::from),
                tools: v
                    .get("tools")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(Value::as_str)
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            Some("compact_boundary") => AgentEvent::CompactBoundary {
                pre_compact_tokens: v
                    .pointer("/compact_metadata/pre_tokens")
                    .and_then(Value::as_u64),
            },
            _ => AgentEvent::Other,
        },
        "assistant" => AgentEvent::Assistant {
            cache_read_input_tokens: v
                .pointer("/message/usage/cache_read_input_tokens")
                .and_then(Value::as_u64),
            error: error_field(&v),
        },
        "auth_status" => AgentEvent::AuthStatus {
            error: error_field(&v),
        },
        "result" => {
            let subtype = match v.get("subtype").and_then(Value::as_str) {
                Some("success") => ResultSubtype::Success,
                Some("error_max_turns") => ResultSubtype::ErrorMaxTurns,
                Some("error_max_budget_usd") => ResultSubtype::ErrorMaxBudgetUsd,
                Some("error_during_execution") => ResultSubtype::ErrorDuringExecution,
                Some("error_max_structured_output_retries") => {
                    ResultSubtype::ErrorMaxStructuredOutputRetries
                }
                _ => ResultSubtype::Unknown,
            };
            AgentEvent::Result(ResultEvent {
                subtype,
                text: v.get("result").and_then(Value::as_str).map(String::from),
                cost_usd: v
                    .get("total_cost_usd")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0),
                num_turns: v.get("num_turns").and_then(Value::as_u64).unwrap_or(0) as u32,
                usage: v.get("usage").map(|u| Usage {
                    input_tokens: u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
                    output_tokens: u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
                    cache_read_input_tokens: u
                        .get("cache_read_input_tokens")
                        .and_then(Value::as_u64)
                        .unwrap_or(0),
                    total_cost_usd: u
                        .get("total_cost_usd")
                        .and_then(Value::as_f64)
                        .unwrap_or(0.0),
                }),
                errors: v
                    .get("errors")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .map(|e| match e.as_str() {
                                Some(s) => s.to_string(),
                                None => e.to_string(),
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
                session_id: v.get("session_id").and_then(Value::as_str).map(String::from),
            })
        }
        _ => AgentEvent::Other,
    };
    Some(event)
}

/// An error field may be a bare string or an object carrying a `type`.
fn error_field(v: &Value) -> Option<String> {
    match v.get("error") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(obj @ Value::Object(_)) => obj
            .get("type")
            .or_else(|| obj.get("message"))
            .and_then(Value::as_str)
            .map(String::from),
        _ => None,
    }
}
