//! Client cores for streaming calls and push-to-talk chat
//!
//! The cores own no UI. They report state through a [`RenderSurface`],
//! persist through a [`HistoryStore`] and surface user-facing errors through
//! a [`NotificationSink`]. Audio devices come in as
//! [`AudioSource`](crate::voice::AudioSource) and
//! [`AudioSink`](crate::voice::AudioSink).

mod call;
mod chat;
mod store;

use serde::{Deserialize, Serialize};

pub use call::VoiceCall;
pub use chat::{SEND_FAILED_TEXT, SENDING_TEXT, VOICE_MESSAGE_TEXT, VoiceChat, VoiceType};
pub use store::MemoryHistory;

use crate::Result;
use crate::protocol::ConnectionStatus;

/// Delivery state of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Error,
}

impl MessageStatus {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Error => "error",
        }
    }

    /// Parse the storage representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sending" => Some(Self::Sending),
            "sent" => Some(Self::Sent),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// One entry in the chat transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    pub is_user: bool,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Base64 WAV
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    #[serde(default)]
    pub show_text: bool,
}

/// Where the cores draw their state
///
/// Every method has an empty default so surfaces implement only what they
/// display.
#[allow(unused_variables)]
pub trait RenderSurface: Send + Sync {
    fn status(&self, status: ConnectionStatus) {}

    fn ai_speaking(&self, speaking: bool) {}

    fn transcript(&self, text: &str, is_user: bool) {}

    fn paused(&self, paused: bool) {}

    /// Microphone level in 0..=1
    fn audio_level(&self, level: f32) {}

    fn recording(&self, recording: bool) {}

    /// Full message list after any change
    fn messages(&self, messages: &[ChatMessage]) {}

    fn message_status(&self, id: &str, status: MessageStatus) {}
}

/// Durable storage for chat messages and the client id
pub trait HistoryStore: Send + Sync {
    /// Load saved messages, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    fn load_messages(&self) -> Result<Vec<ChatMessage>>;

    /// Replace saved messages
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be written
    fn save_messages(&self, messages: &[ChatMessage]) -> Result<()>;

    /// Load the persisted client id
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    fn load_client_id(&self) -> Result<Option<String>>;

    /// Persist the client id
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be written
    fn save_client_id(&self, client_id: &str) -> Result<()>;
}

/// Sink for user-visible error messages
pub trait NotificationSink: Send + Sync {
    fn notify(&self, message: &str);
}

/// Notifications written to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, message: &str) {
        tracing::warn!(notification = message, "user notification");
    }
}

/// Surface that renders nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSurface;

impl RenderSurface for NullSurface {}

/// Turn an `http(s)` base URL into the matching `ws(s)` URL
#[must_use]
pub fn ws_base_url(server_url: &str) -> String {
    let trimmed = server_url.trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        trimmed.to_string()
    }
}

/// Current time in epoch milliseconds
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
