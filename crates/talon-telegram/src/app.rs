//! Shared application state handed to every handler.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use talon_adapters::{ImageClient, Speech, WebhookClient};
use talon_agent::AgentRunner;
use talon_core::Config;
use talon_memory::MemoryCore;
use talon_queue::{RateLimiter, TurnQueue};
use talon_store::Store;

use crate::transport::Transport;

/// Everything a turn or command handler needs, shared via `Arc`.
pub struct App {
    pub config: Config,
    pub store: Arc<Store>,
    pub memory: MemoryCore,
    pub queue: Arc<TurnQueue>,
    pub rate: RateLimiter,
    pub runner: AgentRunner,
    pub transport: Arc<dyn Transport>,
    pub speech: Option<Arc<dyn Speech>>,
    pub webhook: Option<WebhookClient>,
    pub image: Option<ImageClient>,
    /// Per-chat "reply as voice" toggle (`/voice`).
    pub voice_replies: DashMap<i64, bool>,
    /// Per-chat cancellation handle for the in-flight turn.
    pub cancellations: DashMap<i64, CancellationToken>,
    /// Flipping this to `true` asks the process to exit (service manager
    /// relaunches it).
    pub shutdown: watch::Sender<bool>,
}

impl App {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        store: Arc<Store>,
        queue: Arc<TurnQueue>,
        runner: AgentRunner,
        transport: Arc<dyn Transport>,
        speech: Option<Arc<dyn Speech>>,
        webhook: Option<WebhookClient>,
        image: Option<ImageClient>,
        shutdown: watch::Sender<bool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            memory: MemoryCore::new(store.clone()),
            config,
            store,
            queue,
            rate: RateLimiter::new(),
            runner,
            transport,
            speech,
            webhook,
            image,
            voice_replies: DashMap::new(),
            cancellations: DashMap::new(),
            shutdown,
        })
    }

    /// Whether voice output applies for a turn in this chat.
    pub fn voice_reply_enabled(&self, chat_id: i64, explicit_request: bool) -> bool {
        if self.speech.is_none() || !self.config.tts_enabled() {
            return false;
        }
        explicit_request
            || self
                .voice_replies
                .get(&chat_id)
                .map(|v| *v)
                .unwrap_or(false)
    }
}
