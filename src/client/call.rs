//! Streaming voice call over WebSocket

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{RenderSurface, ws_base_url};
use crate::protocol::{
    AudioFraming, ClientControl, ConnectionStatus, ServerEvent, decode_base64_audio, encode_frame,
};
use crate::voice::{AudioLevelMeter, AudioSink, AudioSource};
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Captured frames buffered between the device callback and the socket
const FRAME_QUEUE_DEPTH: usize = 64;

/// Outgoing messages buffered per socket
const OUTBOUND_DEPTH: usize = 64;

/// State shared between the call and its background tasks
struct Shared {
    status: watch::Sender<ConnectionStatus>,
    surface: Arc<dyn RenderSurface>,
    muted: AtomicBool,
}

impl Shared {
    fn set_status(&self, status: ConnectionStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
        if changed {
            tracing::debug!(%status, "call status changed");
            self.surface.status(status);
        }
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }
}

/// A live, hands-free call with the gateway
///
/// Captured audio streams to `/ws/{client_id}` while the call is connected;
/// replies are queued and played back one at a time.
pub struct VoiceCall<S: AudioSource> {
    source: S,
    sink: Arc<dyn AudioSink>,
    shared: Arc<Shared>,
    ws_url: String,
    client_id: String,
    framing: AudioFraming,
    separate_control: bool,
    audio_tx: Option<mpsc::Sender<Message>>,
    control_tx: Option<mpsc::Sender<Message>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<S: AudioSource> VoiceCall<S> {
    /// Create a call bound to a gateway URL (`http(s)://` or `ws(s)://`)
    pub fn new(
        server_url: &str,
        client_id: impl Into<String>,
        source: S,
        sink: Arc<dyn AudioSink>,
        surface: Arc<dyn RenderSurface>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            source,
            sink,
            shared: Arc::new(Shared {
                status,
                surface,
                muted: AtomicBool::new(false),
            }),
            ws_url: ws_base_url(server_url),
            client_id: client_id.into(),
            framing: AudioFraming::RawPcm,
            separate_control: false,
            audio_tx: None,
            control_tx: None,
            tasks: Vec::new(),
        }
    }

    /// Frame format for captured audio
    #[must_use]
    pub const fn with_framing(mut self, framing: AudioFraming) -> Self {
        self.framing = framing;
        self
    }

    /// Send control messages on the dedicated `/config` socket
    #[must_use]
    pub const fn with_separate_control(mut self, enabled: bool) -> Self {
        self.separate_control = enabled;
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    /// Watch status transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::Relaxed)
    }

    /// Start capturing and connect
    ///
    /// # Errors
    ///
    /// Returns error if capture cannot start, a socket cannot connect, or the
    /// initial configuration cannot be sent. The call is left disconnected.
    #[allow(clippy::future_not_send)]
    pub async fn start_call(&mut self, voice: &str) -> Result<()> {
        if self.status() != ConnectionStatus::Disconnected {
            return Err(Error::Transport(format!("call already {}", self.status())));
        }

        // Leftovers from a call the server dropped
        if !self.tasks.is_empty() {
            self.teardown();
        }

        self.shared.set_status(ConnectionStatus::Connecting);

        match self.connect(voice).await {
            Ok(()) => {
                self.shared.set_status(ConnectionStatus::Connected);
                tracing::info!(client_id = %self.client_id, voice, "call connected");
                Ok(())
            }
            Err(e) => {
                tracing::error!(client_id = %self.client_id, error = %e, "failed to start call");
                self.teardown();
                self.shared.set_status(ConnectionStatus::Disconnected);
                Err(e)
            }
        }
    }

    #[allow(clippy::future_not_send)]
    async fn connect(&mut self, voice: &str) -> Result<()> {
        let (frame_tx, frame_rx) = mpsc::channel::<Vec<f32>>(FRAME_QUEUE_DEPTH);
        self.source.start(frame_tx)?;

        let url = format!("{}/ws/{}", self.ws_url, self.client_id);
        tracing::debug!(url = %url, "connecting audio socket");
        let (stream, _) = connect_async(url.as_str()).await?;
        let (write, read) = stream.split();

        let (playback_tx, playback_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (audio_tx, writer) = spawn_writer(write);
        self.tasks.push(writer);
        self.tasks.push(spawn_playback(Arc::clone(&self.sink), playback_rx));
        self.tasks.push(spawn_reader(
            read,
            Arc::clone(&self.shared),
            playback_tx.clone(),
            true,
        ));
        self.audio_tx = Some(audio_tx.clone());

        let control_tx = if self.separate_control {
            let url = format!("{}/ws/{}/config", self.ws_url, self.client_id);
            tracing::debug!(url = %url, "connecting control socket");
            let (stream, _) = connect_async(url.as_str()).await?;
            let (write, read) = stream.split();
            let (tx, writer) = spawn_writer(write);
            self.tasks.push(writer);
            self.tasks
                .push(spawn_reader(read, Arc::clone(&self.shared), playback_tx, false));
            tx
        } else {
            audio_tx.clone()
        };
        self.control_tx = Some(control_tx.clone());

        send_control(
            &control_tx,
            &ClientControl::Config {
                voice_type: voice.to_string(),
            },
        )
        .await?;

        self.tasks.push(spawn_uplink(
            frame_rx,
            audio_tx,
            Arc::clone(&self.shared),
            self.framing,
            self.source.sample_rate(),
        ));

        Ok(())
    }

    /// Hang up
    pub async fn end_call(&mut self) {
        for tx in [self.control_tx.take(), self.audio_tx.take()].into_iter().flatten() {
            let _ = tx.send(Message::Close(None)).await;
        }
        // Give writers a moment to flush the close frame
        tokio::task::yield_now().await;

        self.teardown();
        self.shared.set_status(ConnectionStatus::Disconnected);
        tracing::info!(client_id = %self.client_id, "call ended");
    }

    /// Stop capture and background tasks
    fn teardown(&mut self) {
        self.source.stop();
        self.audio_tx = None;
        self.control_tx = None;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.shared.muted.store(false, Ordering::Relaxed);
        self.shared.surface.audio_level(0.0);
        self.shared.surface.ai_speaking(false);
    }

    /// Flip the microphone mute; `None` when nothing is capturing
    pub fn toggle_mute(&self) -> Option<bool> {
        if !self.source.is_capturing() {
            return None;
        }
        let muted = !self.shared.muted.fetch_xor(true, Ordering::Relaxed);
        tracing::debug!(muted, "mute toggled");
        Some(muted)
    }

    /// Ask the gateway to pause or resume listening
    ///
    /// Returns whether the request was sent; nothing is sent unless the call
    /// is connected.
    pub async fn toggle_pause(&self) -> bool {
        if self.status() != ConnectionStatus::Connected {
            return false;
        }
        let Some(tx) = &self.control_tx else {
            return false;
        };
        send_control(tx, &ClientControl::PauseToggle).await.is_ok()
    }

    /// Send an application-level ping
    pub async fn ping(&self) -> bool {
        match &self.control_tx {
            Some(tx) if self.status() == ConnectionStatus::Connected => {
                send_control(tx, &ClientControl::Ping).await.is_ok()
            }
            _ => false,
        }
    }
}

impl<S: AudioSource> Drop for VoiceCall<S> {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

async fn send_control(tx: &mpsc::Sender<Message>, control: &ClientControl) -> Result<()> {
    let text = serde_json::to_string(control)?;
    tx.send(Message::Text(text.into()))
        .await
        .map_err(|_| Error::Transport("socket closed".to_string()))
}

/// Own the socket's write half; a `Close` message ends the task
fn spawn_writer(
    mut write: SplitSink<WsStream, Message>,
) -> (mpsc::Sender<Message>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_DEPTH);
    let handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                tracing::debug!(error = %e, "socket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });
    (tx, handle)
}

/// Meter, mute and ship captured frames while connected
fn spawn_uplink(
    mut frames: mpsc::Receiver<Vec<f32>>,
    tx: mpsc::Sender<Message>,
    shared: Arc<Shared>,
    framing: AudioFraming,
    sample_rate: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut meter = AudioLevelMeter::new();

        while let Some(mut frame) = frames.recv().await {
            if shared.status() != ConnectionStatus::Connected {
                continue;
            }

            if shared.muted.load(Ordering::Relaxed) {
                frame.fill(0.0);
            }
            shared.surface.audio_level(meter.process(&frame));

            let bytes = match encode_frame(&frame, framing, sample_rate) {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode frame");
                    continue;
                }
            };
            if tx.send(Message::Binary(bytes.into())).await.is_err() {
                break;
            }
        }
    })
}

/// Dispatch server messages; the primary reader owns the connection status
fn spawn_reader(
    mut read: SplitStream<WsStream>,
    shared: Arc<Shared>,
    playback: mpsc::UnboundedSender<Vec<u8>>,
    primary: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(text.as_str()) {
                    Ok(event) => handle_event(&shared, &playback, event),
                    Err(e) => tracing::debug!(error = %e, "ignoring unknown server message"),
                },
                Ok(Message::Binary(wav)) => {
                    let _ = playback.send(wav.to_vec());
                }
                Ok(Message::Close(_)) => {
                    tracing::info!(primary, "server closed socket");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, primary, "socket error");
                    break;
                }
            }
        }

        if primary {
            shared.surface.ai_speaking(false);
            shared.set_status(ConnectionStatus::Disconnected);
        }
    })
}

fn handle_event(shared: &Shared, playback: &mpsc::UnboundedSender<Vec<u8>>, event: ServerEvent) {
    match event {
        ServerEvent::AiSpeakStart => shared.surface.ai_speaking(true),
        ServerEvent::AiSpeakEnd => shared.surface.ai_speaking(false),
        ServerEvent::Transcript { text, is_user } => shared.surface.transcript(&text, is_user),
        ServerEvent::Audio { audio } => match decode_base64_audio(&audio) {
            Ok(wav) => {
                let _ = playback.send(wav);
            }
            Err(e) => tracing::warn!(error = %e, "invalid audio payload"),
        },
        ServerEvent::ConfigAck { voice_type, .. } => {
            tracing::debug!(voice = %voice_type, "voice configured");
        }
        ServerEvent::Paused { is_paused } => shared.surface.paused(is_paused),
        ServerEvent::Error { code, message } => {
            tracing::warn!(code = %code, message = %message, "server error");
        }
        ServerEvent::Pong => tracing::trace!("pong"),
    }
}

/// Play queued replies in arrival order, one at a time
fn spawn_playback(
    sink: Arc<dyn AudioSink>,
    mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(wav) = queue.recv().await {
            let sink = Arc::clone(&sink);
            match tokio::task::spawn_blocking(move || sink.play_wav(&wav)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "failed to play response"),
                Err(e) => tracing::warn!(error = %e, "playback task failed"),
            }
        }
    })
}
