//! Query backend that spawns the Claude Code CLI (`claude -p`) in
//! `stream-json` mode and parses its stdout line by line.

use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_stream::try_stream;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{EventStream, QueryBackend, QueryRequest};
use crate::error::{AgentError, Result};
use crate::event::parse_event;

pub struct ClaudeCliBackend {
    command: String,
}

impl ClaudeCliBackend {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl QueryBackend for ClaudeCliBackend {
    async fn query(&self, req: QueryRequest, cancel: CancellationToken) -> Result<EventStream> {
        let mut cmd = Command::new(&self.command);
        cmd.arg("-p")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref session_id) = req.session_id {
            cmd.arg("--resume").arg(session_id);
        }
        if !req.system_prompt_append.is_empty() {
            cmd.arg("--append-system-prompt").arg(&req.system_prompt_append);
        }
        for (key, value) in &req.env {
            cmd.env(key, value);
        }

        debug!(
            command = %self.command,
            resume = req.session_id.is_some(),
            prompt_len = req.message.len(),
            "spawning agent CLI"
        );

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AgentError::Process(format!(
                    "claude CLI not found at '{}'; install Claude Code first",
                    self.command
                ))
            } else {
                AgentError::Process(format!("failed to spawn claude CLI: {e}"))
            }
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(req.message.as_bytes()).await?;
            drop(stdin);
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Process("claude CLI stdout unavailable".into()))?;

        // Drain stderr concurrently so the child can't block on a full pipe;
        // keep a bounded tail for the exit error message.
        let stderr_tail: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));
        if let Some(stderr) = child.stderr.take() {
            let tail = Arc::clone(&stderr_tail);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "talon_agent::cli_stderr", "{line}");
                    let mut tail = tail.lock().unwrap();
                    tail.push_str(&line);
                    tail.push('\n');
                    if tail.len() > 2_000 {
                        let cut = tail.len() - 2_000;
                        tail.drain(..cut);
                    }
                }
            });
        }

        let stream = try_stream! {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                // kill_on_drop reaps the child when the stream drops.
                let next = tokio::select! {
                    _ = cancel.cancelled() => None,
                    line = lines.next_line() => Some(line),
                };
                match next {
                    None => {
                        Err(AgentError::Cancelled)?;
                    }
                    Some(line) => match line? {
                        Some(line) => {
                            if let Some(event) = parse_event(&line) {
                                yield event;
                            }
                        }
                        None => break,
                    },
                }
            }

            let status = child.wait().await?;
            if !status.success() {
                let code = status.code().unwrap_or(-1);
                let tail = stderr_tail.lock().unwrap().trim().to_string();
                warn!(code, "agent CLI exited abnormally");
                Err(AgentError::Process(format!(
                    "claude exited with code {code}: {tail}"
                )))?;
            }
        };

        Ok(Box::pin(stream))
    }
}
