//! The streaming query abstraction the runner drives.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::event::AgentEvent;

/// Lazy, finite, non-restartable event sequence. Terminates with a `Result`
/// event unless the cancel token is tripped, in which case it raises.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<AgentEvent>> + Send>>;

#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub message: String,
    /// Resume handle from a previous run, if the chat has one.
    pub session_id: Option<String>,
    pub system_prompt_append: String,
    /// Environment handed to the subprocess. Never applied process-wide.
    pub env: HashMap<String, String>,
}

#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn query(&self, req: QueryRequest, cancel: CancellationToken) -> Result<EventStream>;
}
