//! Error types for the voice chat gateway

use thiserror::Error;

/// Result type alias for voice chat operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice chat client and gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// WAV encoding or decoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),

    /// Audio format the pipeline cannot decode
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Malformed frame or control message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// WebSocket transport error
    #[error("transport error: {0}")]
    Transport(String),

    /// Session is already handling a turn
    #[error("session busy: {0}")]
    Busy(String),

    /// Model backend error
    #[error("model error: {0}")]
    Model(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Base64 decoding error
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
