//! Loopback backend

use async_trait::async_trait;

use super::{ModelBackend, ModelRequest, ModelResponse};
use crate::Result;

/// Answers every turn by playing the user's audio back
pub struct EchoBackend {
    name: String,
}

impl EchoBackend {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ModelBackend for EchoBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn respond(&self, request: ModelRequest) -> Result<ModelResponse> {
        #[allow(clippy::cast_precision_loss)]
        let secs = request.audio.len() as f32 / request.sample_rate.max(1) as f32;
        tracing::debug!(client_id = %request.client_id, secs, "echoing turn");

        Ok(ModelResponse {
            text: format!(
                "I heard {secs:.1} seconds of audio. Replying as {}.",
                request.voice
            ),
            user_transcript: None,
            audio: request.audio,
            sample_rate: request.sample_rate,
        })
    }
}
