//! Configuration management for the voice chat gateway and client

pub mod file;

use std::path::PathBuf;

use crate::protocol::AudioFraming;
use crate::session::VoiceCatalog;
use crate::{Error, Result};

use file::VoiceChatConfigFile;

/// Default system prompt for speech-capable omni models
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Qwen, a virtual human developed by the Qwen Team, \
    Alibaba Group, capable of perceiving auditory and visual inputs, as well as generating text and speech.";

/// Voice chat configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (client database)
    pub data_dir: PathBuf,

    /// Gateway server configuration
    pub server: ServerConfig,

    /// Audio format configuration
    pub audio: AudioConfig,

    /// Speech segmentation configuration
    pub vad: VadConfig,

    /// Available voices and the default voice
    pub voices: VoiceCatalog,

    /// Session lifecycle configuration
    pub session: SessionConfig,

    /// Model backend configuration
    pub model: ModelConfig,

    /// Client configuration
    pub client: ClientConfig,
}

/// HTTP/WebSocket server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Allowed CORS origins (`*` allows any)
    pub cors_origins: Vec<String>,

    /// Path to static files directory (web UI)
    pub static_dir: Option<PathBuf>,

    /// Interval between WebSocket heartbeat pings
    pub ws_heartbeat_secs: u64,

    /// Global request limit per minute (disabled when `None`)
    pub rate_limit_per_minute: Option<u32>,
}

/// Audio format configuration
#[derive(Debug, Clone, Copy)]
pub struct AudioConfig {
    /// Sample rate the model consumes and produces
    pub sample_rate: u32,

    /// Samples per captured frame
    pub chunk_size: usize,

    /// Frame encoding used by the streaming client
    pub framing: AudioFraming,
}

/// Speech segmentation configuration
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// RMS level above which a frame counts as speech
    pub energy_threshold: f32,

    /// Fraction of speech frames for a chunk to count as speech
    pub speech_ratio: f32,

    /// Analysis frame length in milliseconds
    pub frame_ms: u32,

    /// Consecutive silent chunks that close a segment
    pub silence_chunks: usize,

    /// Upper bound on a single segment's duration
    pub max_segment_secs: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.02,
            speech_ratio: 0.3,
            frame_ms: 30,
            silence_chunks: 10,
            max_segment_secs: 30.0,
        }
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Idle time after which a session expires
    pub timeout_secs: u64,

    /// How often expired sessions are swept
    pub cleanup_interval_secs: u64,
}

/// Which model backend answers turns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Loopback backend for local testing
    Echo,
    /// Remote inference service over HTTP
    Http,
}

impl BackendKind {
    fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "echo" => Ok(Self::Echo),
            "http" => Ok(Self::Http),
            other => Err(Error::Config(format!("unknown model backend: {other}"))),
        }
    }
}

/// Model backend configuration
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub backend: BackendKind,

    /// Inference endpoint (required for the HTTP backend)
    pub url: Option<String>,

    /// Model identifier reported by the status endpoint
    pub name: String,

    pub system_prompt: String,

    pub max_new_tokens: u32,

    /// Request timeout for the HTTP backend
    pub timeout_secs: u64,
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Gateway base URL
    pub server_url: String,

    /// Preferred voice
    pub voice: String,

    /// Send control messages on a dedicated `/config` socket
    pub separate_control: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_sources(VoiceChatConfigFile::default(), |_| None)
            .unwrap_or_else(|_| unreachable!("built-in defaults are valid"))
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load() -> Result<Self> {
        let config = Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())?;

        // Ensure data dir exists
        std::fs::create_dir_all(&config.data_dir).ok();

        Ok(config)
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    #[allow(clippy::too_many_lines)]
    pub fn from_sources<F>(fc: VoiceChatConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server config (env > toml > default)
        let port = match env("VOICECHAT_PORT").or_else(|| env("PORT")) {
            Some(s) => s
                .parse()
                .map_err(|_| Error::Config(format!("invalid port: {s}")))?,
            None => fc.server.port.unwrap_or(8000),
        };
        let cors_origins = env("VOICECHAT_CORS_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .or(fc.server.cors_origins)
            .unwrap_or_else(|| vec!["*".to_string()]);
        let rate_limit_per_minute = match env("VOICECHAT_RATE_LIMIT") {
            Some(s) => Some(
                s.parse()
                    .map_err(|_| Error::Config(format!("invalid rate limit: {s}")))?,
            ),
            None => fc.server.rate_limit_per_minute,
        };
        let server = ServerConfig {
            host: env("VOICECHAT_HOST")
                .or(fc.server.host)
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            cors_origins,
            static_dir: env("VOICECHAT_STATIC_DIR")
                .or(fc.server.static_dir)
                .map(PathBuf::from),
            ws_heartbeat_secs: fc.server.ws_heartbeat_secs.unwrap_or(30).max(1),
            rate_limit_per_minute,
        };

        // Audio config
        let sample_rate = match env("VOICECHAT_SAMPLE_RATE") {
            Some(s) => s
                .parse()
                .map_err(|_| Error::Config(format!("invalid sample rate: {s}")))?,
            None => fc.audio.sample_rate.unwrap_or(24000),
        };
        crate::voice::check_sample_rate(sample_rate).map_err(|e| Error::Config(e.to_string()))?;
        let framing = match fc.audio.framing.as_deref() {
            Some(s) => AudioFraming::parse(s)?,
            None => AudioFraming::RawPcm,
        };
        let audio = AudioConfig {
            sample_rate,
            chunk_size: fc.audio.chunk_size.unwrap_or(1024).max(1),
            framing,
        };

        let defaults = VadConfig::default();
        let vad = VadConfig {
            energy_threshold: fc.vad.energy_threshold.unwrap_or(defaults.energy_threshold),
            speech_ratio: fc.vad.speech_ratio.unwrap_or(defaults.speech_ratio),
            frame_ms: fc.vad.frame_ms.unwrap_or(defaults.frame_ms).max(1),
            silence_chunks: fc.vad.silence_chunks.unwrap_or(defaults.silence_chunks).max(1),
            max_segment_secs: fc.vad.max_segment_secs.unwrap_or(defaults.max_segment_secs),
        };

        // Voice catalog: the default must be one of the available voices
        let available = fc
            .voices
            .available
            .unwrap_or_else(|| vec!["Chelsie".to_string(), "Ethan".to_string()]);
        let default_voice = env("VOICECHAT_DEFAULT_VOICE")
            .or(fc.voices.default)
            .unwrap_or_else(|| "Chelsie".to_string());
        let voices = VoiceCatalog::new(available, default_voice)?;

        let timeout_secs = match env("VOICECHAT_SESSION_TIMEOUT") {
            Some(s) => s
                .parse()
                .map_err(|_| Error::Config(format!("invalid session timeout: {s}")))?,
            None => fc.session.timeout_secs.unwrap_or(7200),
        };
        let session = SessionConfig {
            timeout_secs,
            cleanup_interval_secs: fc.session.cleanup_interval_secs.unwrap_or(60).max(1),
        };

        let backend = match env("VOICECHAT_MODEL_BACKEND").or(fc.model.backend) {
            Some(s) => BackendKind::parse(&s)?,
            None => BackendKind::Echo,
        };
        let model = ModelConfig {
            backend,
            url: env("VOICECHAT_MODEL_URL").or(fc.model.url),
            name: env("VOICECHAT_MODEL_NAME")
                .or(fc.model.name)
                .unwrap_or_else(|| "Qwen/Qwen2.5-Omni-7B".to_string()),
            system_prompt: env("VOICECHAT_SYSTEM_PROMPT")
                .or(fc.model.system_prompt)
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            max_new_tokens: fc.model.max_new_tokens.unwrap_or(256),
            timeout_secs: fc.model.timeout_secs.unwrap_or(120),
        };
        if model.backend == BackendKind::Http && model.url.is_none() {
            return Err(Error::Config(
                "http model backend requires VOICECHAT_MODEL_URL or [model].url".to_string(),
            ));
        }

        let client = ClientConfig {
            server_url: env("VOICECHAT_SERVER_URL")
                .or(fc.client.server_url)
                .unwrap_or_else(|| format!("http://localhost:{port}")),
            voice: fc
                .client
                .voice
                .unwrap_or_else(|| voices.default_voice().to_string()),
            separate_control: fc.client.separate_control.unwrap_or(false),
        };

        // Determine data directory (~/.local/share/omni/voicechat on Linux)
        let data_dir = env("VOICECHAT_DATA_DIR").map_or_else(
            || {
                directories::BaseDirs::new().map_or_else(
                    || PathBuf::from(".local/share/omni/voicechat"),
                    |d| d.data_dir().join("omni").join("voicechat"),
                )
            },
            PathBuf::from,
        );

        Ok(Self {
            data_dir,
            server,
            audio,
            vad,
            voices,
            session,
            model,
            client,
        })
    }

    /// Path of the client message database
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("voicechat.db")
    }

    /// Socket address the server binds
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
