//! Session and push-to-talk HTTP endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::Error;
use crate::protocol::{decode_audio_frame, decode_base64_audio};
use crate::session::{HistoryEntry, VoiceInfo};
use crate::voice::{SAMPLE_RATE, resample, wav_to_samples};

/// Build the session router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/voices", get(voices))
        .route("/config", post(configure))
        .route("/chat", post(chat))
        .route("/pause", post(pause))
        .route("/end", post(end))
        .route("/history/{client_id}", get(history))
        .with_state(state)
}

/// Voice listing
#[derive(Debug, Serialize)]
pub struct VoicesResponse {
    pub voices: Vec<VoiceInfo>,
    pub default: String,
}

async fn voices(State(state): State<Arc<ApiState>>) -> Json<VoicesResponse> {
    let catalog = state.sessions.voices();
    Json(VoicesResponse {
        voices: catalog.voices(),
        default: catalog.default_voice().to_string(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRequest {
    pub client_id: String,
    #[serde(default)]
    pub voice_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub status: &'static str,
    pub client_id: String,
    pub voice_type: String,
}

/// Create or reset a session
async fn configure(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ConfigRequest>,
) -> Result<Json<ConfigResponse>, ApiError> {
    let client_id = require_client_id(request.client_id)?;
    let session = state
        .sessions
        .create_or_update(&client_id, request.voice_type.as_deref())
        .await;

    tracing::info!(client_id = %client_id, voice = %session.voice_type, "session configured");

    Ok(Json(ConfigResponse {
        status: "success",
        client_id,
        voice_type: session.voice_type,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub client_id: String,
    #[serde(default)]
    pub voice_type: Option<String>,
    /// Base64 audio
    pub audio: String,
    #[serde(default = "default_audio_type")]
    pub audio_type: String,
}

/// Clips without a declared type are assumed to be browser recordings
fn default_audio_type() -> String {
    "webm".to_string()
}

/// Outcome of a push-to-talk turn
///
/// Failures are reported in-band with HTTP 200.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ChatResponse {
    #[serde(rename_all = "camelCase")]
    Success {
        ai_transcript: String,
        /// Base64 WAV
        audio_response: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_transcript: Option<String>,
    },
    Error { message: String },
}

impl ChatResponse {
    fn error(message: impl Into<String>) -> Json<Self> {
        Json(Self::Error {
            message: message.into(),
        })
    }
}

/// Run one turn from a recorded clip
async fn chat(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let client_id = require_client_id(request.client_id)?;

    let decoded = match request.audio_type.as_str() {
        "wav" => decode_base64_audio(&request.audio).and_then(|bytes| wav_to_samples(&bytes)),
        "pcm_f32" => decode_base64_audio(&request.audio)
            .and_then(|bytes| decode_audio_frame(&bytes, state.audio.sample_rate)),
        other => {
            tracing::warn!(client_id = %client_id, audio_type = other, "unsupported audio type");
            return Ok(ChatResponse::error(format!("Unsupported audio type: {other}")));
        }
    };

    let (samples, rate) = match decoded {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(client_id = %client_id, error = %e, "failed to decode chat audio");
            return Ok(ChatResponse::error(format!("Failed to decode audio: {e}")));
        }
    };

    if samples.is_empty() {
        return Ok(ChatResponse::error("No audio data"));
    }

    #[allow(clippy::cast_precision_loss)]
    let secs = samples.len() as f32 / rate as f32;
    if secs > state.vad.max_segment_secs {
        tracing::warn!(client_id = %client_id, secs, "chat clip too long");
        return Ok(ChatResponse::error(format!(
            "Audio too long: {secs:.1}s exceeds {:.1}s",
            state.vad.max_segment_secs
        )));
    }

    let samples = match resample(&samples, rate, SAMPLE_RATE) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(client_id = %client_id, error = %e, "failed to resample chat audio");
            return Ok(ChatResponse::error(format!("Failed to decode audio: {e}")));
        }
    };

    match state
        .turns
        .process(&client_id, samples, SAMPLE_RATE, request.voice_type.as_deref())
        .await
    {
        Ok(outcome) => Ok(Json(ChatResponse::Success {
            ai_transcript: outcome.reply_text,
            audio_response: B64.encode(&outcome.wav),
            user_transcript: outcome.user_transcript,
        })),
        Err(Error::Busy(_)) => Ok(ChatResponse::error(
            "Session is busy processing another request",
        )),
        Err(e) => {
            tracing::error!(client_id = %client_id, error = %e, "chat turn failed");
            Ok(ChatResponse::error(e.to_string()))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseRequest {
    pub client_id: String,
    pub is_paused: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseResponse {
    pub status: &'static str,
    pub is_paused: bool,
}

async fn pause(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<PauseRequest>,
) -> Result<Json<PauseResponse>, ApiError> {
    if !state
        .sessions
        .set_paused(&request.client_id, request.is_paused)
        .await
    {
        return Err(ApiError::NotFound("Session not found"));
    }

    tracing::info!(client_id = %request.client_id, paused = request.is_paused, "pause updated");
    Ok(Json(PauseResponse {
        status: "success",
        is_paused: request.is_paused,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndRequest {
    pub client_id: String,
}

#[derive(Debug, Serialize)]
pub struct EndResponse {
    pub status: &'static str,
    pub message: &'static str,
}

/// Tear down a session and any sockets it still has open
async fn end(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<EndRequest>,
) -> Json<EndResponse> {
    state.sessions.delete(&request.client_id).await;
    state.connections.close(&request.client_id).await;

    Json(EndResponse {
        status: "success",
        message: "Session ended",
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub client_id: String,
    pub history: Vec<HistoryEntry>,
}

async fn history(
    State(state): State<Arc<ApiState>>,
    Path(client_id): Path<String>,
) -> Json<HistoryResponse> {
    let history = state.sessions.history(&client_id).await;
    Json(HistoryResponse { client_id, history })
}

fn require_client_id(client_id: String) -> Result<String, ApiError> {
    if client_id.trim().is_empty() {
        return Err(ApiError::BadRequest("clientId is required"));
    }
    Ok(client_id)
}

/// Session API errors
#[derive(Debug)]
pub enum ApiError {
    BadRequest(&'static str),
    NotFound(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.to_string()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.to_string()),
        };

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}
