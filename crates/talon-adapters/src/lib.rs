//! `talon-adapters` — thin HTTP clients for the external collaborators:
//! speech-to-text, text-to-speech, the n8n webhook bridge and the image
//! generator. Uniform discipline: 30 s timeouts, failures as values rather
//! than panics, and API keys redacted from anything that surfaces.

pub mod error;
pub mod image;
pub mod redact;
pub mod speech;
pub mod webhook;

pub use error::{AdapterError, Result};
pub use image::{GeneratedImage, ImageClient, ImageError};
pub use speech::{HttpSpeech, Speech};
pub use webhook::{WebhookClient, WebhookResult};

/// Shared request timeout for all adapter calls.
pub const ADAPTER_TIMEOUT_SECS: u64 = 30;
