//! TOML configuration file loading
//!
//! Supports `~/.config/omni/voicechat/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoiceChatConfigFile {
    /// Gateway server configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Audio format configuration
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Speech segmentation configuration
    #[serde(default)]
    pub vad: VadFileConfig,

    /// Voice catalog configuration
    #[serde(default)]
    pub voices: VoicesFileConfig,

    /// Session lifecycle configuration
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Model backend configuration
    #[serde(default)]
    pub model: ModelFileConfig,

    /// Client configuration
    #[serde(default)]
    pub client: ClientFileConfig,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub cors_origins: Option<Vec<String>>,
    pub static_dir: Option<String>,
    pub ws_heartbeat_secs: Option<u64>,
    pub rate_limit_per_minute: Option<u32>,
}

/// Audio configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Sample rate expected by the model (Hz)
    pub sample_rate: Option<u32>,
    /// Samples per captured frame
    pub chunk_size: Option<usize>,
    /// Frame encoding on the wire ("pcm" or "wav")
    pub framing: Option<String>,
}

/// Speech segmentation configuration
#[derive(Debug, Default, Deserialize)]
pub struct VadFileConfig {
    pub energy_threshold: Option<f32>,
    pub speech_ratio: Option<f32>,
    pub frame_ms: Option<u32>,
    pub silence_chunks: Option<usize>,
    pub max_segment_secs: Option<f32>,
}

/// Voice catalog configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoicesFileConfig {
    pub available: Option<Vec<String>>,
    pub default: Option<String>,
}

/// Session lifecycle configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    pub timeout_secs: Option<u64>,
    pub cleanup_interval_secs: Option<u64>,
}

/// Model backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct ModelFileConfig {
    /// Backend kind ("echo" or "http")
    pub backend: Option<String>,
    /// Inference endpoint for the HTTP backend
    pub url: Option<String>,
    /// Model identifier reported by the status endpoint
    pub name: Option<String>,
    pub system_prompt: Option<String>,
    pub max_new_tokens: Option<u32>,
    pub timeout_secs: Option<u64>,
}

/// Client configuration
#[derive(Debug, Default, Deserialize)]
pub struct ClientFileConfig {
    /// Gateway base URL (e.g. "http://localhost:8000")
    pub server_url: Option<String>,
    /// Preferred voice
    pub voice: Option<String>,
    /// Open a second socket for control messages
    pub separate_control: Option<bool>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VoiceChatConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VoiceChatConfigFile {
    let Some(path) = config_file_path() else {
        return VoiceChatConfigFile::default();
    };

    if !path.exists() {
        return VoiceChatConfigFile::default();
    }

    match load_config_file_from(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            VoiceChatConfigFile::default()
        }
    }
}

/// Load and parse a config file at an explicit path
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn load_config_file_from(path: &Path) -> crate::Result<VoiceChatConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/omni/voicechat/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("voicechat")
            .join("config.toml")
    })
}
