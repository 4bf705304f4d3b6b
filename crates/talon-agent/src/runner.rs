//! Turn runner: drives the event stream, enforces timeout and cancellation,
//! and folds observations into a [`TurnOutcome`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use talon_core::env;

use crate::backend::{QueryBackend, QueryRequest};
use crate::event::{AgentEvent, ResultSubtype};

/// The only env keys forwarded from the `.env` file to the agent subprocess.
const SECRET_KEYS: [&str; 2] = ["CLAUDE_CODE_OAUTH_TOKEN", "ANTHROPIC_API_KEY"];

const CANCELLED_TEXT: &str = "Request cancelled.";
const TIMEOUT_TEXT: &str = "The request timed out before the agent finished. Try again, or split the task into smaller steps.";
const FAILURE_TEXT: &str = "Something went wrong while running the agent.";

pub type ProgressFn = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

#[derive(Default)]
pub struct TurnRequest {
    pub message: String,
    pub session_id: Option<String>,
    /// Invoked once per observed event (typing-indicator refresh).
    pub on_progress: Option<ProgressFn>,
    /// External cancellation (the `/cancel` handle).
    pub cancel: Option<CancellationToken>,
    /// Extra subprocess environment merged over the selected `.env` secrets.
    pub extra_env: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    pub text: String,
    pub session_id: Option<String>,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub num_turns: u32,
    pub usage: Option<crate::event::Usage>,
    /// The agent auto-compacted its context during this turn.
    pub did_compact: bool,
    /// Cache-read size of the latest model call; 0 when never reported.
    pub last_cache_read: u64,
    pub error: Option<String>,
}

pub struct AgentRunner {
    backend: Arc<dyn QueryBackend>,
    timeout_ms: u64,
    system_prompt_append: String,
    /// Explicit `.env` path override; `None` uses the cached default.
    env_path: Option<PathBuf>,
}

impl AgentRunner {
    pub fn new(
        backend: Arc<dyn QueryBackend>,
        timeout_ms: u64,
        system_prompt_append: String,
    ) -> Self {
        Self {
            backend,
            timeout_ms,
            system_prompt_append,
            env_path: None,
        }
    }

    pub fn with_env_path(mut self, path: PathBuf) -> Self {
        self.env_path = Some(path);
        self
    }

    /// Run one agent turn to completion (or cancellation/timeout).
    ///
    /// Never returns an `Err`: every failure mode is folded into the outcome
    /// so the orchestrator still replies, logs and accounts for the turn.
    pub async fn run(&self, req: TurnRequest) -> TurnOutcome {
        let started = Instant::now();
        let mut outcome = TurnOutcome::default();

        if req.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            outcome.text = CANCELLED_TEXT.to_string();
            outcome.error = Some("cancelled".to_string());
            return outcome;
        }

        let internal = CancellationToken::new();
        let query = QueryRequest {
            message: req.message,
            session_id: req.session_id,
            system_prompt_append: self.system_prompt_append.clone(),
            env: self.subprocess_env(&req.extra_env),
        };

        let stream = match self.backend.query(query, internal.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                outcome.text = FAILURE_TEXT.to_string();
                outcome.error = Some(e.to_string());
                outcome.duration_ms = started.elapsed().as_millis() as u64;
                return outcome;
            }
        };
        tokio::pin!(stream);

        let external = req.cancel.unwrap_or_default();
        let timeout = tokio::time::sleep(Duration::from_millis(self.timeout_ms));
        tokio::pin!(timeout);

        // Which side tripped the internal token, when one did.
        let mut trip_reason: Option<&'static str> = None;

        loop {
            tokio::select! {
                _ = external.cancelled(), if trip_reason.is_none() => {
                    trip_reason = Some("cancelled");
                    internal.cancel();
                }
                _ = &mut timeout, if trip_reason.is_none() => {
                    trip_reason = Some("timeout");
                    internal.cancel();
                }
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        if let Some(cb) = &req.on_progress {
                            cb(&event);
                        }
                        if self.observe(&event, &mut outcome) {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        match trip_reason {
                            Some("timeout") => {
                                outcome.text = TIMEOUT_TEXT.to_string();
                                outcome.error = Some("timeout".to_string());
                            }
                            Some(_) => {
                                outcome.text = CANCELLED_TEXT.to_string();
                                outcome.error = Some("cancelled".to_string());
                            }
                            None => {
                                outcome.text = FAILURE_TEXT.to_string();
                                outcome.error = Some(e.to_string());
                            }
                        }
                        break;
                    }
                    None => {
                        if outcome.error.is_none() {
                            outcome.text = FAILURE_TEXT.to_string();
                            outcome.error = Some("agent stream ended without a result".to_string());
                        }
                        break;
                    }
                }
            }
        }

        outcome.duration_ms = started.elapsed().as_millis() as u64;
        outcome
    }

    /// Fold one event into the outcome. Returns `true` on the terminal event.
    /// All bookkeeping is synchronous so the outcome is consistent with
    /// everything observed when `result` arrives.
    fn observe(&self, event: &AgentEvent, outcome: &mut TurnOutcome) -> bool {
        match event {
            AgentEvent::Init { session_id, model, .. } => {
                if !session_id.is_empty() {
                    outcome.session_id = Some(session_id.clone());
                }
                info!(session_id = %session_id, model = model.as_deref().unwrap_or("?"), "agent session started");
                false
            }
            AgentEvent::CompactBoundary { pre_compact_tokens } => {
                outcome.did_compact = true;
                info!(pre_tokens = ?pre_compact_tokens, "agent compacted its context");
                false
            }
            AgentEvent::Assistant {
                cache_read_input_tokens,
                error,
            } => {
                if let Some(cache) = cache_read_input_tokens {
                    if *cache > 0 {
                        outcome.last_cache_read = *cache;
                    }
                }
                if let Some(kind) = error {
                    match kind.as_str() {
                        "authentication_failed" | "billing_error" => {
                            if outcome.error.is_none() {
                                outcome.error = Some(kind.clone());
                            }
                            warn!(kind = %kind, "terminal agent error");
                        }
                        other => {
                            // rate_limit, server_error, max_output_tokens:
                            // transient, the stream continues.
                            warn!(kind = %other, "non-terminal agent error");
                        }
                    }
                }
                false
            }
            AgentEvent::AuthStatus { error } => {
                if let Some(msg) = error {
                    if outcome.error.is_none() {
                        outcome.error = Some(format!("auth: {msg}"));
                    }
                    warn!(error = %msg, "agent auth status error");
                }
                false
            }
            AgentEvent::Result(result) => {
                outcome.cost_usd = result.cost_usd;
                outcome.num_turns = result.num_turns;
                outcome.usage = result.usage;
                if let Some(sid) = &result.session_id {
                    outcome.session_id = Some(sid.clone());
                }
                match result.subtype {
                    ResultSubtype::Success => {
                        outcome.text = result.text.clone().unwrap_or_default();
                    }
                    subtype => {
                        outcome.text = human_error_text(subtype, &result.errors);
                        if outcome.error.is_none() {
                            outcome.error = Some(subtype.as_str().to_string());
                        }
                    }
                }
                true
            }
            AgentEvent::Other => false,
        }
    }

    /// Read the `.env` file, keep only the known secret keys, then merge the
    /// caller's extras on top. The process environment is never touched.
    fn subprocess_env(&self, extra: &HashMap<String, String>) -> HashMap<String, String> {
        let file = match &self.env_path {
            Some(path) => env::load_from(path),
            None => env::load_default(),
        };
        let mut out = HashMap::new();
        for key in SECRET_KEYS {
            if let Some(value) = file.get(key) {
                if !value.is_empty() {
                    out.insert(key.to_string(), value.clone());
                }
            }
        }
        for (key, value) in extra {
            out.insert(key.clone(), value.clone());
        }
        out
    }
}

fn human_error_text(subtype: ResultSubtype, errors: &[String]) -> String {
    match subtype {
        ResultSubtype::ErrorMaxTurns => {
            "The agent hit its turn limit before finishing. Try a narrower request.".to_string()
        }
        ResultSubtype::ErrorMaxBudgetUsd => {
            "The agent hit its spending cap for this run.".to_string()
        }
        ResultSubtype::ErrorDuringExecution => {
            if errors.is_empty() {
                "The agent hit an error during execution.".to_string()
            } else {
                format!(
                    "The agent hit an error during execution:\n{}",
                    errors.join("\n")
                )
            }
        }
        ResultSubtype::ErrorMaxStructuredOutputRetries => {
            "The agent could not produce valid structured output.".to_string()
        }
        ResultSubtype::Success | ResultSubtype::Unknown => FAILURE_TEXT.to_string(),
    }
}
