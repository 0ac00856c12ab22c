//! Voicechat - real-time spoken conversation with a multimodal model
//!
//! This library provides both ends of a voice chat:
//! - A gateway serving push-to-talk HTTP and streaming WebSocket calls
//! - Server-side speech segmentation and per-session turn handling
//! - Client cores for streaming calls and push-to-talk chat
//! - Audio capture, playback, WAV framing and resampling
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      Clients                         │
//! │   VoiceCall (WebSocket)  │  VoiceChat (HTTP)         │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Voicechat Gateway                    │
//! │   Sessions  │  Segmenter  │  Turn worker  │  API    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Model backend                       │
//! │   Remote inference (HTTP)  │  Echo                   │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod protocol;
pub mod session;
pub mod turn;
pub mod voice;

pub use api::{ApiServer, ApiServerBuilder, ApiState};
pub use client::{ChatMessage, HistoryStore, MessageStatus, NotificationSink, RenderSurface};
pub use client::{MemoryHistory, VoiceCall, VoiceChat};
pub use config::Config;
pub use db::{DbConn, DbPool, MessageRepo};
pub use error::{Error, Result};
pub use model::{EchoBackend, HttpBackend, ModelBackend, ModelRequest, ModelResponse};
pub use protocol::{AudioFraming, ClientControl, ConnectionStatus, ServerEvent};
pub use session::{ConnectionRegistry, SessionManager, VoiceCatalog};
pub use turn::{TurnOutcome, TurnProcessor};
