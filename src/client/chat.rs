//! Push-to-talk chat over HTTP

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{
    ChatMessage, HistoryStore, MessageStatus, NotificationSink, RenderSurface, now_millis,
};
use crate::voice::{AudioSink, AudioSource, samples_to_wav};
use crate::{Error, Result};

/// Placeholder shown while a recording is in flight
pub const SENDING_TEXT: &str = "Sending voice message...";

/// Content of a sent recording the server did not transcribe
pub const VOICE_MESSAGE_TEXT: &str = "Voice message";

/// Content of a recording that failed to send
pub const SEND_FAILED_TEXT: &str = "Failed to send";

/// Frames buffered while recording
const RECORD_QUEUE_DEPTH: usize = 256;

/// A selectable voice as listed by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceType {
    pub id: String,
    pub name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigBody<'a> {
    client_id: &'a str,
    voice_type: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatBody<'a> {
    audio: &'a str,
    audio_type: &'static str,
    client_id: &'a str,
    voice_type: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatReply {
    status: String,
    #[serde(default)]
    ai_transcript: Option<String>,
    #[serde(default)]
    audio_response: Option<String>,
    #[serde(default)]
    user_transcript: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VoicesReply {
    voices: Vec<VoiceType>,
}

/// An in-progress recording
struct Recording {
    stop: oneshot::Sender<()>,
    collector: JoinHandle<Vec<f32>>,
}

/// Record-then-send conversation with a persisted transcript
pub struct VoiceChat<S: AudioSource> {
    http: reqwest::Client,
    server_url: String,
    source: S,
    sink: Arc<dyn AudioSink>,
    store: Arc<dyn HistoryStore>,
    surface: Arc<dyn RenderSurface>,
    notifier: Arc<dyn NotificationSink>,
    client_id: String,
    voice: String,
    voices: Vec<VoiceType>,
    messages: Vec<ChatMessage>,
    recording: Option<Recording>,
}

impl<S: AudioSource> VoiceChat<S> {
    /// Create a chat against a gateway base URL
    pub fn new(
        server_url: &str,
        source: S,
        sink: Arc<dyn AudioSink>,
        store: Arc<dyn HistoryStore>,
        surface: Arc<dyn RenderSurface>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            server_url: server_url.trim_end_matches('/').to_string(),
            source,
            sink,
            store,
            surface,
            notifier,
            client_id: Uuid::new_v4().to_string(),
            voice: "Chelsie".to_string(),
            voices: vec![
                VoiceType {
                    id: "Chelsie".to_string(),
                    name: "Chelsie".to_string(),
                },
                VoiceType {
                    id: "Ethan".to_string(),
                    name: "Ethan".to_string(),
                },
            ],
            messages: Vec::new(),
            recording: None,
        }
    }

    /// Start with a different voice
    #[must_use]
    pub fn with_voice(mut self, voice: &str) -> Self {
        self.voice = voice.to_string();
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn current_voice(&self) -> &str {
        &self.voice
    }

    #[must_use]
    pub fn available_voices(&self) -> &[VoiceType] {
        &self.voices
    }

    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Restore saved state and register with the gateway
    ///
    /// # Errors
    ///
    /// Returns error if the client id cannot be persisted or the gateway
    /// rejects the session
    pub async fn mount(&mut self) -> Result<()> {
        self.messages = self.store.load_messages().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load chat history");
            Vec::new()
        });

        match self.store.load_client_id() {
            Ok(Some(id)) => self.client_id = id,
            Ok(None) => {
                self.client_id = Uuid::new_v4().to_string();
                self.store.save_client_id(&self.client_id)?;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to load client id, using a fresh one");
                self.client_id = Uuid::new_v4().to_string();
                self.store.save_client_id(&self.client_id)?;
            }
        }

        tracing::info!(client_id = %self.client_id, messages = self.messages.len(), "chat mounted");
        self.surface.messages(&self.messages);
        self.init_chat().await
    }

    /// Register the session with the gateway
    ///
    /// # Errors
    ///
    /// Returns error if the request fails; the user is notified
    pub async fn init_chat(&self) -> Result<()> {
        let result = self.post_config().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "chat init failed");
            self.notifier.notify(&format!("Initialization failed: {e}"));
        }
        result
    }

    async fn post_config(&self) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/api/config", self.server_url))
            .json(&ConfigBody {
                client_id: &self.client_id,
                voice_type: &self.voice,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!("HTTP error! status: {status}")));
        }
        tracing::debug!(client_id = %self.client_id, "session initialized");
        Ok(())
    }

    /// Forget the conversation and start over with a new client id
    ///
    /// # Errors
    ///
    /// Returns error if state cannot be persisted or the gateway rejects the
    /// new session
    pub async fn restart_chat(&mut self) -> Result<()> {
        self.messages.clear();
        self.client_id = Uuid::new_v4().to_string();
        self.store.save_client_id(&self.client_id)?;
        self.persist();
        tracing::info!(client_id = %self.client_id, "chat restarted");
        self.init_chat().await
    }

    /// Begin capturing a recording
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be opened; the user is notified
    pub fn start_recording(&mut self) -> Result<()> {
        if self.recording.is_some() {
            return Ok(());
        }

        let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<f32>>(RECORD_QUEUE_DEPTH);
        if let Err(e) = self.source.start(frame_tx) {
            tracing::error!(error = %e, "failed to start recording");
            self.notifier.notify("Unable to access microphone");
            return Err(e);
        }

        let (stop, mut stopped) = oneshot::channel::<()>();
        let collector = tokio::spawn(async move {
            let mut samples = Vec::new();
            loop {
                tokio::select! {
                    frame = frame_rx.recv() => match frame {
                        Some(f) => samples.extend_from_slice(&f),
                        None => break,
                    },
                    _ = &mut stopped => {
                        while let Ok(f) = frame_rx.try_recv() {
                            samples.extend_from_slice(&f);
                        }
                        break;
                    }
                }
            }
            samples
        });

        self.recording = Some(Recording { stop, collector });
        self.surface.recording(true);
        tracing::info!("started recording");
        Ok(())
    }

    /// Finish the recording and send it when anything was captured
    ///
    /// # Errors
    ///
    /// Returns the send error, if any
    pub async fn stop_recording(&mut self) -> Result<()> {
        let Some(recording) = self.recording.take() else {
            return Ok(());
        };

        self.source.stop();
        let _ = recording.stop.send(());
        let samples = recording.collector.await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "recording collector failed");
            Vec::new()
        });

        self.surface.recording(false);
        tracing::info!(samples = samples.len(), "stopped recording");

        if samples.is_empty() {
            return Ok(());
        }
        let rate = self.source.sample_rate();
        self.send_recording(&samples, rate).await
    }

    /// Send a recorded clip and append the reply
    ///
    /// # Errors
    ///
    /// Returns error if encoding, the request, or the gateway fails; the
    /// message is marked failed and the user is notified
    pub async fn send_recording(&mut self, samples: &[f32], sample_rate: u32) -> Result<()> {
        let message_id = Uuid::new_v4().to_string();

        let audio = match samples_to_wav(samples, sample_rate) {
            Ok(wav) => B64.encode(wav),
            Err(e) => {
                self.notifier.notify("Failed to send message");
                return Err(e);
            }
        };

        self.messages.push(ChatMessage {
            id: message_id.clone(),
            content: SENDING_TEXT.to_string(),
            is_user: true,
            timestamp: now_millis(),
            audio_data: Some(audio.clone()),
            status: Some(MessageStatus::Sending),
            show_text: false,
        });
        self.persist();

        match self.post_chat(&audio).await {
            Ok(reply) => {
                let user_text = reply
                    .user_transcript
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| VOICE_MESSAGE_TEXT.to_string());
                self.update_message(&message_id, MessageStatus::Sent, user_text);

                let audio_response = reply.audio_response.unwrap_or_default();
                self.messages.push(ChatMessage {
                    id: Uuid::new_v4().to_string(),
                    content: reply.ai_transcript.unwrap_or_default(),
                    is_user: false,
                    timestamp: now_millis(),
                    audio_data: Some(audio_response.clone()),
                    status: Some(MessageStatus::Sent),
                    show_text: false,
                });
                self.persist();

                // Replies play once on arrival
                if !audio_response.is_empty() {
                    if let Err(e) = self.play_audio(&audio_response).await {
                        tracing::warn!(error = %e, "failed to play reply");
                    }
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "send error");
                self.update_message(&message_id, MessageStatus::Error, SEND_FAILED_TEXT.to_string());
                self.persist();
                self.notifier.notify("Failed to send message");
                Err(e)
            }
        }
    }

    async fn post_chat(&self, audio: &str) -> Result<ChatReply> {
        let reply: ChatReply = self
            .http
            .post(format!("{}/api/chat", self.server_url))
            .json(&ChatBody {
                audio,
                audio_type: "wav",
                client_id: &self.client_id,
                voice_type: &self.voice,
            })
            .send()
            .await?
            .json()
            .await?;

        if reply.status == "success" {
            Ok(reply)
        } else {
            Err(Error::Transport(
                reply
                    .message
                    .unwrap_or_else(|| "Failed to send message".to_string()),
            ))
        }
    }

    fn update_message(&mut self, id: &str, status: MessageStatus, content: String) {
        if let Some(msg) = self.messages.iter_mut().find(|m| m.id == id) {
            msg.status = Some(status);
            msg.content = content;
            self.surface.message_status(id, status);
        }
    }

    /// Save and redraw the transcript
    fn persist(&self) {
        if let Err(e) = self.store.save_messages(&self.messages) {
            tracing::warn!(error = %e, "failed to save chat history");
        }
        self.surface.messages(&self.messages);
    }

    /// Change the voice used for future turns
    pub fn set_voice_type(&mut self, voice: &str) {
        voice.clone_into(&mut self.voice);
        tracing::info!(voice, "voice type changed");
    }

    /// Replace the voice list with the gateway's
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    pub async fn refresh_voices(&mut self) -> Result<&[VoiceType]> {
        let reply: VoicesReply = self
            .http
            .get(format!("{}/api/voices", self.server_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !reply.voices.is_empty() {
            self.voices = reply.voices;
        }
        Ok(&self.voices)
    }

    /// Play a base64 WAV clip
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    pub async fn play_audio(&self, audio: &str) -> Result<()> {
        let wav = B64.decode(audio.trim())?;
        let sink = Arc::clone(&self.sink);
        tokio::task::spawn_blocking(move || sink.play_wav(&wav))
            .await
            .map_err(|e| Error::Audio(e.to_string()))?
    }

    /// Stop any recording and clear the transcript
    pub fn cleanup(&mut self) {
        if let Some(recording) = self.recording.take() {
            recording.collector.abort();
            self.surface.recording(false);
        }
        self.source.stop();
        self.messages.clear();
        self.persist();
    }
}
