//! Response model backends
//!
//! A backend takes one user utterance plus the conversation so far and
//! returns the assistant's text and synthesized speech.

mod echo;
mod http;

use std::sync::Arc;

use async_trait::async_trait;

pub use echo::EchoBackend;
pub use http::HttpBackend;

use crate::Result;
use crate::config::{BackendKind, ModelConfig};
use crate::session::HistoryEntry;

/// Input for one turn
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub client_id: String,
    /// Mono user audio
    pub audio: Vec<f32>,
    pub sample_rate: u32,
    pub voice: String,
    pub system_prompt: String,
    /// Earlier turns, oldest first
    pub history: Vec<HistoryEntry>,
}

/// Output of one turn
#[derive(Debug, Clone, Default)]
pub struct ModelResponse {
    /// Assistant reply text
    pub text: String,
    /// What the user said, when the backend transcribes
    pub user_transcript: Option<String>,
    /// Mono reply audio
    pub audio: Vec<f32>,
    pub sample_rate: u32,
}

/// A model that answers spoken turns
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Backend name for logs and status
    fn name(&self) -> &str;

    /// Produce a reply to one utterance
    async fn respond(&self, request: ModelRequest) -> Result<ModelResponse>;
}

/// Build the configured backend
///
/// # Errors
///
/// Returns error if the HTTP backend lacks an endpoint
pub fn from_config(config: &ModelConfig) -> Result<Arc<dyn ModelBackend>> {
    match config.backend {
        BackendKind::Echo => Ok(Arc::new(EchoBackend::new(&config.name))),
        BackendKind::Http => Ok(Arc::new(HttpBackend::from_config(config)?)),
    }
}

/// Pull the assistant's reply out of a decoded generation
///
/// Generations echo the chat template, so the reply is whatever follows the
/// last `assistant` marker. Without a marker the last non-empty line is
/// used.
#[must_use]
pub fn extract_reply(full_text: &str) -> String {
    let lowered = full_text.to_ascii_lowercase();
    let tail = match lowered.rfind("assistant") {
        Some(idx) => &full_text[idx + "assistant".len()..],
        None => full_text
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or_default(),
    };

    let tail = tail.trim_start();
    tail.strip_prefix(':').unwrap_or(tail).trim().to_string()
}
