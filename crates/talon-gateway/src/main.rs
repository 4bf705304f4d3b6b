//! talon — a Telegram gateway in front of a Claude Code agent.
//!
//! Startup wires the store, queue, runner, adapters and scheduler together,
//! then parks on the shutdown signals. Exit code 0 means a clean shutdown
//! (the service manager relaunches us after /restart and /rebuild); exit
//! code 1 means a startup error.

mod lock;
mod maintenance;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use teloxide::prelude::*;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};

use talon_adapters::{HttpSpeech, ImageClient, Speech, WebhookClient};
use talon_agent::{AgentRunner, ClaudeCliBackend};
use talon_core::config::{Config, STORE_DIR, UPLOADS_DIR};
use talon_core::env;
use talon_queue::TurnQueue;
use talon_scheduler::SchedulerEngine;
use talon_store::Store;
use talon_telegram::{
    AgentTaskExecutor, App, TelegramAdapter, TelegramTransport, Transport,
};

/// CLI binary the agent backend spawns.
const AGENT_COMMAND: &str = "claude";
/// Image model used when GEMINI_IMAGE_MODEL is unset.
const DEFAULT_IMAGE_MODEL: &str = "gemini-2.0-flash-preview-image-generation";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "talon=info".into()),
        )
        .init();

    if let Err(code) = run().await {
        std::process::exit(code);
    }
}

async fn run() -> Result<(), i32> {
    let env_map = env::load_default();
    let config = Config::from_env(&env_map);

    if config.bot_token.is_empty() {
        error!("TELEGRAM_BOT_TOKEN is not set");
        return Err(1);
    }
    // Refuse to run an open bot.
    if config.allowed_chat_ids.is_empty() {
        error!("ALLOWED_CHAT_IDS is empty; set at least one chat id");
        return Err(1);
    }

    let store_dir = PathBuf::from(STORE_DIR);
    let lock = match lock::PidLock::acquire(&store_dir.join("talon.pid")) {
        Ok(lock) => lock,
        Err(e) => {
            error!(error = %e, "singleton lock unavailable");
            return Err(1);
        }
    };

    let store = match Store::open(&store_dir.join("talon.db")) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "store open failed");
            lock.release();
            return Err(1);
        }
    };

    let uploads_dir = PathBuf::from(UPLOADS_DIR);
    let bot = Bot::new(&config.bot_token);
    let transport: Arc<dyn Transport> =
        Arc::new(TelegramTransport::new(bot.clone(), uploads_dir.clone()));

    let runner = AgentRunner::new(
        Arc::new(ClaudeCliBackend::new(AGENT_COMMAND)),
        config.agent_timeout_ms,
        config.system_prompt_append.clone(),
    );

    let speech: Option<Arc<dyn Speech>> = if config.stt_enabled() || config.tts_enabled() {
        Some(Arc::new(HttpSpeech::new(
            config.stt_api_key.clone(),
            config.elevenlabs_api_key.clone(),
            config.elevenlabs_voice_id.clone(),
        )))
    } else {
        None
    };
    let webhook = config
        .webhooks_enabled()
        .then(|| WebhookClient::new(config.n8n_base_url.clone(), config.n8n_api_key.clone()));
    let image = config.image_enabled().then(|| {
        let model = if config.gemini_image_model.is_empty() {
            DEFAULT_IMAGE_MODEL.to_string()
        } else {
            config.gemini_image_model.clone()
        };
        ImageClient::new(config.gemini_api_key.clone(), model)
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = App::new(
        config,
        store.clone(),
        Arc::new(TurnQueue::new()),
        runner,
        transport,
        speech,
        webhook,
        image,
        shutdown_tx.clone(),
    );

    let scheduler = SchedulerEngine::new(store.clone(), AgentTaskExecutor::new(app.clone()));
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));
    let maintenance_task = tokio::spawn(maintenance::run(
        app.clone(),
        uploads_dir,
        shutdown_rx.clone(),
    ));
    let adapter_task = tokio::spawn(TelegramAdapter::new(bot, app.clone()).run());

    info!("talon is up");

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "signal handler setup failed");
            return Err(1);
        }
    };
    let mut requested = shutdown_rx.clone();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
        _ = sigterm.recv() => info!("SIGTERM received"),
        _ = requested.changed() => info!("shutdown requested by command"),
    }

    // Best-effort teardown: every failure below is logged and ignored.
    let _ = shutdown_tx.send(true);
    adapter_task.abort();
    let _ = adapter_task.await;
    if tokio::time::timeout(Duration::from_secs(5), scheduler_task)
        .await
        .is_err()
    {
        warn!("scheduler did not stop in time");
    }
    if tokio::time::timeout(Duration::from_secs(5), maintenance_task)
        .await
        .is_err()
    {
        warn!("maintenance timers did not stop in time");
    }

    drop(app);
    match Arc::try_unwrap(store) {
        Ok(store) => store.close(),
        Err(_) => warn!("store handle still shared at shutdown"),
    }
    lock.release();
    info!("shutdown complete");
    Ok(())
}
