//! Remote inference backend

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use serde::{Deserialize, Serialize};

use super::{ModelBackend, ModelRequest, ModelResponse, extract_reply};
use crate::config::ModelConfig;
use crate::voice::{samples_to_wav_float, wav_to_samples};
use crate::{Error, Result};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InferenceRequest<'a> {
    /// Base64 WAV
    audio: String,
    sample_rate: u32,
    voice: &'a str,
    system_prompt: &'a str,
    history: Vec<InferenceTurn<'a>>,
    max_new_tokens: u32,
}

#[derive(Serialize)]
struct InferenceTurn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InferenceResponse {
    text: String,
    /// Base64 WAV
    audio: String,
    #[serde(default)]
    user_transcript: Option<String>,
}

/// Calls an inference service that speaks the JSON contract above
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
    name: String,
    max_new_tokens: u32,
}

impl HttpBackend {
    /// Create a backend from model configuration
    ///
    /// # Errors
    ///
    /// Returns error if no endpoint is configured or the client cannot be built
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::Config("model url required for http backend".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client,
            url,
            name: config.name.clone(),
            max_new_tokens: config.max_new_tokens,
        })
    }
}

#[async_trait]
impl ModelBackend for HttpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn respond(&self, request: ModelRequest) -> Result<ModelResponse> {
        let wav = samples_to_wav_float(&request.audio, request.sample_rate)?;
        tracing::debug!(
            client_id = %request.client_id,
            audio_bytes = wav.len(),
            history = request.history.len(),
            "sending inference request"
        );

        let body = InferenceRequest {
            audio: B64.encode(&wav),
            sample_rate: request.sample_rate,
            voice: &request.voice,
            system_prompt: &request.system_prompt,
            history: request
                .history
                .iter()
                .map(|h| InferenceTurn {
                    role: if h.is_user { "user" } else { "assistant" },
                    content: &h.text,
                })
                .collect(),
            max_new_tokens: self.max_new_tokens,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "inference request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "inference error");
            return Err(Error::Model(format!("inference error {status}: {body}")));
        }

        let result: InferenceResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse inference response");
            e
        })?;

        let wav = B64.decode(result.audio.trim())?;
        let (audio, sample_rate) = wav_to_samples(&wav)?;
        let text = extract_reply(&result.text);

        tracing::info!(reply = %text, samples = audio.len(), "inference complete");

        Ok(ModelResponse {
            text,
            user_transcript: result.user_transcript.filter(|t| !t.trim().is_empty()),
            audio,
            sample_rate,
        })
    }
}
