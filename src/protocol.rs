//! Wire protocol shared by the streaming client and the gateway
//!
//! Audio travels as binary WebSocket frames, either raw little-endian `f32`
//! PCM or one complete WAV file per frame. Everything else is JSON text
//! frames tagged by `type`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use serde::{Deserialize, Serialize};

use crate::voice::{samples_to_wav_float, wav_to_samples};
use crate::{Error, Result};

/// Connection state of a streaming call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// How captured audio is framed on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFraming {
    /// Headerless little-endian `f32` samples
    RawPcm,
    /// One float32 WAV file per frame
    Wav,
}

impl AudioFraming {
    /// Parse a framing name ("pcm" or "wav")
    ///
    /// # Errors
    ///
    /// Returns error for unknown names
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pcm" | "raw" | "pcm_f32" => Ok(Self::RawPcm),
            "wav" => Ok(Self::Wav),
            other => Err(Error::Config(format!("unknown audio framing: {other}"))),
        }
    }
}

/// Control message from client to gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientControl {
    /// Select the response voice
    Config {
        #[serde(rename = "voiceType")]
        voice_type: String,
    },
    /// Flip the session between paused and active
    PauseToggle,
    /// Application-level keepalive
    Ping,
}

/// Event from gateway to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The assistant started a response
    AiSpeakStart,
    /// The assistant finished a response
    AiSpeakEnd,
    /// Text of a turn
    Transcript {
        text: String,
        #[serde(rename = "isUser")]
        is_user: bool,
    },
    /// Response audio as base64 WAV (binary frames are preferred)
    Audio { audio: String },
    /// Voice configuration accepted
    ConfigAck {
        status: String,
        #[serde(rename = "voiceType")]
        voice_type: String,
    },
    /// Pause state changed
    Paused {
        #[serde(rename = "isPaused")]
        is_paused: bool,
    },
    /// Something went wrong handling a client message
    Error { code: String, message: String },
    /// Reply to `ping`
    Pong,
}

impl ServerEvent {
    /// Build an error event
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Wrap WAV bytes as a JSON audio event
    #[must_use]
    pub fn audio(wav: &[u8]) -> Self {
        Self::Audio {
            audio: B64.encode(wav),
        }
    }
}

/// Encode samples as headerless little-endian `f32`
#[must_use]
pub fn encode_pcm_frame(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 4);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Encode a captured frame using the given framing
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn encode_frame(samples: &[f32], framing: AudioFraming, sample_rate: u32) -> Result<Vec<u8>> {
    match framing {
        AudioFraming::RawPcm => Ok(encode_pcm_frame(samples)),
        AudioFraming::Wav => samples_to_wav_float(samples, sample_rate),
    }
}

/// Decode a binary audio frame into mono samples and its sample rate
///
/// Frames starting with a RIFF header are parsed as WAV; anything else must
/// be raw little-endian `f32` at `default_rate`.
///
/// # Errors
///
/// Returns error if the frame is neither valid WAV nor whole `f32` samples
pub fn decode_audio_frame(bytes: &[u8], default_rate: u32) -> Result<(Vec<f32>, u32)> {
    if bytes.starts_with(b"RIFF") {
        return wav_to_samples(bytes);
    }

    if bytes.len() % 4 != 0 {
        return Err(Error::Protocol(format!(
            "pcm frame length {} is not a multiple of 4",
            bytes.len()
        )));
    }

    let samples = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok((samples, default_rate))
}

/// Decode base64 audio carried in JSON
///
/// # Errors
///
/// Returns error if the payload is not valid base64
pub fn decode_base64_audio(payload: &str) -> Result<Vec<u8>> {
    Ok(B64.decode(payload.trim())?)
}
