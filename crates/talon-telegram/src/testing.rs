//! In-memory fakes shared by this crate's tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use talon_adapters::{AdapterError, Speech};
use talon_agent::{
    AgentError, AgentEvent, AgentRunner, EventStream, QueryBackend, QueryRequest,
};
use talon_core::Config;
use talon_queue::TurnQueue;
use talon_store::Store;

use crate::app::App;
use crate::error::{Result, TelegramError};
use crate::transport::Transport;

#[derive(Default)]
pub struct FakeTransport {
    texts: Mutex<Vec<(i64, bool, String)>>,
    attempts: Mutex<Vec<(bool, String)>>,
    voices: Mutex<Vec<(i64, usize)>>,
    photos: Mutex<Vec<(i64, usize)>>,
    pub actions: AtomicUsize,
    fail_markdown: bool,
    fail_voice: bool,
    rate_limit_once: Mutex<Option<u64>>,
    download: Mutex<Option<PathBuf>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every markdown send fails (plain succeeds).
    pub fn failing_markdown(mut self) -> Self {
        self.fail_markdown = true;
        self
    }

    /// Every voice send fails.
    pub fn failing_voice(mut self) -> Self {
        self.fail_voice = true;
        self
    }

    /// The next send is rate-limited with the given advertised delay.
    pub fn rate_limited_once(self, secs: u64) -> Self {
        *self.rate_limit_once.lock().unwrap() = Some(secs);
        self
    }

    pub fn with_download(self, path: PathBuf) -> Self {
        *self.download.lock().unwrap() = Some(path);
        self
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.texts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, t)| t.clone())
            .collect()
    }

    /// (markdown, text) pairs of every send attempt, including failed ones.
    pub fn calls(&self) -> Vec<(bool, String)> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn voice_count(&self) -> usize {
        self.voices.lock().unwrap().len()
    }

    pub fn photo_count(&self) -> usize {
        self.photos.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_text(&self, chat_id: i64, text: &str, markdown: bool) -> Result<()> {
        self.attempts
            .lock()
            .unwrap()
            .push((markdown, text.to_string()));
        if let Some(secs) = self.rate_limit_once.lock().unwrap().take() {
            return Err(TelegramError::RateLimited {
                retry_after_secs: secs,
            });
        }
        if markdown && self.fail_markdown {
            return Err(TelegramError::Api("can't parse entities".into()));
        }
        self.texts
            .lock()
            .unwrap()
            .push((chat_id, markdown, text.to_string()));
        Ok(())
    }

    async fn send_voice(&self, chat_id: i64, audio: Vec<u8>) -> Result<()> {
        if self.fail_voice {
            return Err(TelegramError::Api("voice upload failed".into()));
        }
        self.voices.lock().unwrap().push((chat_id, audio.len()));
        Ok(())
    }

    async fn send_photo(&self, chat_id: i64, bytes: Vec<u8>) -> Result<()> {
        self.photos.lock().unwrap().push((chat_id, bytes.len()));
        Ok(())
    }

    async fn send_action(&self, _chat_id: i64) -> Result<()> {
        self.actions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn download_file(&self, _file_id: &str) -> Result<PathBuf> {
        self.download
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| TelegramError::Api("no download configured".into()))
    }
}

/// Backend that replays a fixed event script, or raises a fixed error.
pub struct ScriptedBackend {
    events: Vec<AgentEvent>,
    fail_with: Option<String>,
}

impl ScriptedBackend {
    pub fn with_events(events: Vec<AgentEvent>) -> Arc<Self> {
        Arc::new(Self {
            events,
            fail_with: None,
        })
    }

    pub fn failing(message: String) -> Arc<Self> {
        Arc::new(Self {
            events: Vec::new(),
            fail_with: Some(message),
        })
    }
}

#[async_trait]
impl QueryBackend for ScriptedBackend {
    async fn query(
        &self,
        _req: QueryRequest,
        _cancel: CancellationToken,
    ) -> talon_agent::Result<EventStream> {
        if let Some(msg) = &self.fail_with {
            let items = vec![Err(AgentError::Process(msg.clone()))];
            return Ok(Box::pin(tokio_stream::iter(items)));
        }
        let items: Vec<talon_agent::Result<AgentEvent>> =
            self.events.clone().into_iter().map(Ok).collect();
        Ok(Box::pin(tokio_stream::iter(items)))
    }
}

pub struct FakeSpeech {
    fail: bool,
    pub transcript: String,
}

impl FakeSpeech {
    pub fn ok() -> Self {
        Self {
            fail: false,
            transcript: "transcribed words".to_string(),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            transcript: String::new(),
        }
    }
}

#[async_trait]
impl Speech for FakeSpeech {
    async fn transcribe(&self, _audio_path: &std::path::Path) -> talon_adapters::Result<String> {
        if self.fail {
            return Err(AdapterError::Invalid("stt failed".into()));
        }
        Ok(self.transcript.clone())
    }

    async fn synthesize(&self, text: &str) -> talon_adapters::Result<Vec<u8>> {
        if self.fail {
            return Err(AdapterError::Invalid("tts failed".into()));
        }
        Ok(text.as_bytes().to_vec())
    }
}

/// TTS-enabled config so voice paths are reachable in tests.
fn test_config() -> Config {
    let mut config = Config::default();
    config.elevenlabs_api_key = "test-key".to_string();
    config.elevenlabs_voice_id = "test-voice".to_string();
    config.agent_timeout_ms = 5_000;
    config
}

pub fn test_app(transport: Arc<FakeTransport>, events: Vec<AgentEvent>) -> Arc<App> {
    test_app_with(transport, events, None)
}

pub fn test_app_with(
    transport: Arc<FakeTransport>,
    events: Vec<AgentEvent>,
    speech: Option<Arc<dyn Speech>>,
) -> Arc<App> {
    build_app(transport, ScriptedBackend::with_events(events), speech)
}

pub fn test_app_failing(transport: Arc<FakeTransport>, message: String) -> Arc<App> {
    build_app(transport, ScriptedBackend::failing(message), None)
}

fn build_app(
    transport: Arc<FakeTransport>,
    backend: Arc<ScriptedBackend>,
    speech: Option<Arc<dyn Speech>>,
) -> Arc<App> {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let (shutdown, _) = watch::channel(false);
    let runner = AgentRunner::new(backend, 5_000, String::new())
        .with_env_path(PathBuf::from("/nonexistent/.env"));
    App::new(
        test_config(),
        store,
        Arc::new(TurnQueue::new()),
        runner,
        transport,
        speech,
        None,
        None,
        shutdown,
    )
}
