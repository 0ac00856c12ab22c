//! One request/response exchange with the model

use std::sync::Arc;

use crate::model::{ModelBackend, ModelRequest};
use crate::session::SessionManager;
use crate::voice::samples_to_wav;
use crate::{Error, Result};

/// History text recorded for a user turn the backend did not transcribe
pub const UNTRANSCRIBED_TURN: &str = "[voice message]";

/// Result of a completed turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub user_transcript: Option<String>,
    pub reply_text: String,
    /// PCM16 WAV reply
    pub wav: Vec<u8>,
    pub sample_rate: u32,
}

/// Runs turns against a backend while guarding per-session exclusivity
#[derive(Clone)]
pub struct TurnProcessor {
    sessions: SessionManager,
    backend: Arc<dyn ModelBackend>,
    system_prompt: String,
}

impl TurnProcessor {
    #[must_use]
    pub fn new(
        sessions: SessionManager,
        backend: Arc<dyn ModelBackend>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            sessions,
            backend,
            system_prompt: system_prompt.into(),
        }
    }

    #[must_use]
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Process one utterance
    ///
    /// Unknown sessions are created. A voice override also becomes the
    /// session's voice.
    ///
    /// # Errors
    ///
    /// Returns `Error::Busy` if the session is already processing a turn, or
    /// the backend/encoding error otherwise
    ///
    /// Dropping the future mid-turn still releases the session.
    pub async fn process(
        &self,
        client_id: &str,
        samples: Vec<f32>,
        sample_rate: u32,
        voice_override: Option<&str>,
    ) -> Result<TurnOutcome> {
        self.sessions.ensure(client_id).await;

        let voice = match voice_override {
            Some(v) => self.sessions.set_voice_type(client_id, v).await,
            None => self.sessions.voice_type(client_id).await,
        };

        let Some(guard) = self.sessions.begin_turn(client_id).await else {
            tracing::warn!(client_id, "turn rejected, session busy");
            return Err(Error::Busy(client_id.to_string()));
        };

        let result = self.run(client_id, samples, sample_rate, voice).await;
        guard.release().await;
        result
    }

    async fn run(
        &self,
        client_id: &str,
        samples: Vec<f32>,
        sample_rate: u32,
        voice: String,
    ) -> Result<TurnOutcome> {
        let history = self.sessions.history(client_id).await;
        tracing::info!(
            client_id,
            samples = samples.len(),
            sample_rate,
            voice = %voice,
            backend = self.backend.name(),
            "processing turn"
        );

        let response = self
            .backend
            .respond(ModelRequest {
                client_id: client_id.to_string(),
                audio: samples,
                sample_rate,
                voice,
                system_prompt: self.system_prompt.clone(),
                history,
            })
            .await?;

        let user_text = response
            .user_transcript
            .clone()
            .unwrap_or_else(|| UNTRANSCRIBED_TURN.to_string());
        self.sessions.add_history(client_id, user_text, true).await;
        self.sessions
            .add_history(client_id, response.text.clone(), false)
            .await;

        let wav = samples_to_wav(&response.audio, response.sample_rate)?;

        Ok(TurnOutcome {
            user_transcript: response.user_transcript,
            reply_text: response.text,
            wav,
            sample_rate: response.sample_rate,
        })
    }
}
