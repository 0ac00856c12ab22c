//! WebSocket handlers for streaming calls

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use super::{ApiState, TURN_QUEUE_DEPTH};
use crate::config::VadConfig;
use crate::{Error, Result};
use crate::protocol::{ClientControl, ServerEvent, decode_audio_frame};
use crate::session::Outbound;
use crate::voice::{SAMPLE_RATE, SpeechSegment, SpeechSegmenter, StreamResampler};

/// Outbound queue depth per connection
const OUTBOUND_DEPTH: usize = 64;

/// Per-connection audio path: rate conversion feeding the segmenter
///
/// The resampler lives as long as the client's frame rate stays the same,
/// so filter state carries across frame boundaries.
struct AudioIntake {
    segmenter: SpeechSegmenter,
    resampler: Option<StreamResampler>,
}

impl AudioIntake {
    fn new(vad: VadConfig) -> Self {
        Self {
            segmenter: SpeechSegmenter::new(vad, SAMPLE_RATE),
            resampler: None,
        }
    }

    fn push(&mut self, samples: &[f32], rate: u32) -> Result<Option<SpeechSegment>> {
        let target = self.segmenter.sample_rate();
        if rate == target {
            self.resampler = None;
            return Ok(self.segmenter.push(samples));
        }

        let resampler = match self.resampler.take() {
            Some(r) if r.from_rate() == rate => r,
            _ => StreamResampler::new(rate, target)?,
        };
        let converted = self.resampler.insert(resampler).process(samples)?;
        // Nothing until a full resampler chunk has arrived
        if converted.is_empty() {
            return Ok(None);
        }
        Ok(self.segmenter.push(&converted))
    }

    fn reset(&mut self) {
        self.segmenter.reset();
        if let Some(resampler) = &mut self.resampler {
            resampler.reset();
        }
    }
}

/// Build WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/{client_id}", get(audio_upgrade))
        .route("/{client_id}/config", get(control_upgrade))
        .with_state(state)
}

async fn audio_upgrade(
    State(state): State<Arc<ApiState>>,
    Path(client_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_audio_socket(socket, state, client_id))
}

async fn control_upgrade(
    State(state): State<Arc<ApiState>>,
    Path(client_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_control_socket(socket, state, client_id))
}

/// Forward queued messages to the socket until it closes
fn spawn_sender(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let frame = match msg {
                Outbound::Event(event) => match serde_json::to_string(&event) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize event");
                        continue;
                    }
                },
                Outbound::Audio(wav) => Message::Binary(wav.into()),
                Outbound::Ping => Message::Ping(Bytes::new()),
                Outbound::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };
            if sender.send(frame).await.is_err() {
                break;
            }
        }
    })
}

/// Queue a protocol ping every heartbeat interval
fn spawn_heartbeat(state: &ApiState, tx: mpsc::Sender<Outbound>) -> JoinHandle<()> {
    let period = state.heartbeat;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if tx.send(Outbound::Ping).await.is_err() {
                break;
            }
        }
    })
}

/// Handle a streaming audio connection
async fn handle_audio_socket(socket: WebSocket, state: Arc<ApiState>, client_id: String) {
    let (sender, mut receiver) = socket.split();

    state.sessions.ensure(&client_id).await;

    let (tx, rx) = mpsc::channel::<Outbound>(OUTBOUND_DEPTH);
    let connection = state.connections.register(&client_id, tx.clone()).await;
    tracing::info!(client_id = %client_id, "audio socket connected");

    let mut send_task = spawn_sender(sender, rx);
    let heartbeat = spawn_heartbeat(&state, tx.clone());

    // Turns run one at a time, in the order segments complete
    let (turn_tx, turn_rx) = mpsc::channel::<SpeechSegment>(TURN_QUEUE_DEPTH);
    let worker = tokio::spawn(turn_worker(
        Arc::clone(&state),
        client_id.clone(),
        turn_rx,
        tx.clone(),
    ));

    let recv_state = Arc::clone(&state);
    let recv_client = client_id.clone();
    let mut recv_task = tokio::spawn(async move {
        let mut intake = AudioIntake::new(recv_state.vad);

        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_audio_frame(
                        &recv_state,
                        &recv_client,
                        &data,
                        &mut intake,
                        &turn_tx,
                        &tx,
                    )
                    .await;
                }
                Message::Text(text) => {
                    if handle_control(&recv_state, &recv_client, &text, &tx).await {
                        intake.reset();
                    }
                }
                Message::Close(_) => {
                    tracing::info!(client_id = %recv_client, "audio socket closed by client");
                    break;
                }
                _ => {}
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    heartbeat.abort();
    // An in-flight turn is dropped here; its guard releases the session
    worker.abort();
    state.connections.unregister(&client_id, connection).await;

    tracing::info!(client_id = %client_id, "audio socket disconnected");
}

/// Handle a control-only connection
async fn handle_control_socket(socket: WebSocket, state: Arc<ApiState>, client_id: String) {
    let (sender, mut receiver) = socket.split();

    state.sessions.ensure(&client_id).await;

    let (tx, rx) = mpsc::channel::<Outbound>(OUTBOUND_DEPTH);
    let connection = state.connections.register(&client_id, tx.clone()).await;
    tracing::info!(client_id = %client_id, "control socket connected");

    let mut send_task = spawn_sender(sender, rx);
    let heartbeat = spawn_heartbeat(&state, tx.clone());

    let recv_state = Arc::clone(&state);
    let recv_client = client_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_control(&recv_state, &recv_client, &text, &tx).await;
                }
                Message::Binary(data) => {
                    tracing::debug!(len = data.len(), "ignoring audio on control socket");
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    heartbeat.abort();
    state.connections.unregister(&client_id, connection).await;

    tracing::info!(client_id = %client_id, "control socket disconnected");
}

/// Decode one audio frame and feed the segmenter
async fn handle_audio_frame(
    state: &ApiState,
    client_id: &str,
    data: &[u8],
    intake: &mut AudioIntake,
    turns: &mpsc::Sender<SpeechSegment>,
    tx: &mpsc::Sender<Outbound>,
) {
    let decoded = decode_audio_frame(data, state.audio.sample_rate).and_then(|(samples, rate)| {
        #[allow(clippy::cast_precision_loss)]
        let secs = samples.len() as f32 / rate as f32;
        if secs > state.vad.max_segment_secs {
            return Err(Error::Protocol(format!(
                "frame of {secs:.1}s exceeds {:.1}s",
                state.vad.max_segment_secs
            )));
        }
        Ok((samples, rate))
    });

    let (samples, rate) = match decoded {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::debug!(client_id, error = %e, "dropping undecodable frame");
            let _ = tx
                .send(Outbound::Event(ServerEvent::error("invalid_audio", e.to_string())))
                .await;
            return;
        }
    };

    if state.sessions.is_paused(client_id).await {
        intake.reset();
        return;
    }

    let segment = match intake.push(&samples, rate) {
        Ok(Some(segment)) => segment,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(client_id, error = %e, "failed to resample frame");
            let _ = tx
                .send(Outbound::Event(ServerEvent::error("invalid_audio", e.to_string())))
                .await;
            return;
        }
    };

    tracing::debug!(client_id, secs = segment.duration_secs(), "queueing turn");
    match turns.try_send(segment) {
        Ok(()) | Err(TrySendError::Closed(_)) => {}
        Err(TrySendError::Full(_)) => {
            tracing::warn!(client_id, "turn queue full, dropping segment");
            let _ = tx
                .send(Outbound::Event(ServerEvent::error(
                    "busy",
                    "Still responding to earlier speech",
                )))
                .await;
        }
    }
}

/// Apply a control message; returns true when the pause state changed
async fn handle_control(
    state: &ApiState,
    client_id: &str,
    text: &str,
    tx: &mpsc::Sender<Outbound>,
) -> bool {
    let control: ClientControl = match serde_json::from_str(text) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!(client_id, error = %e, "invalid control message");
            let _ = tx
                .send(Outbound::Event(ServerEvent::error(
                    "invalid_message",
                    format!("invalid message: {e}"),
                )))
                .await;
            return false;
        }
    };

    let (reply, paused_changed) = match control {
        ClientControl::Config { voice_type } => {
            let applied = state.sessions.set_voice_type(client_id, &voice_type).await;
            tracing::info!(client_id, voice = %applied, "voice configured");
            (
                ServerEvent::ConfigAck {
                    status: "ok".to_string(),
                    voice_type: applied,
                },
                false,
            )
        }
        ClientControl::PauseToggle => {
            state.sessions.ensure(client_id).await;
            let is_paused = state
                .sessions
                .toggle_paused(client_id)
                .await
                .unwrap_or_default();
            tracing::info!(client_id, paused = is_paused, "pause toggled");
            (ServerEvent::Paused { is_paused }, true)
        }
        ClientControl::Ping => (ServerEvent::Pong, false),
    };

    let _ = tx.send(Outbound::Event(reply)).await;
    paused_changed
}

/// Run queued segments through the model, one at a time
async fn turn_worker(
    state: Arc<ApiState>,
    client_id: String,
    mut segments: mpsc::Receiver<SpeechSegment>,
    tx: mpsc::Sender<Outbound>,
) {
    while let Some(segment) = segments.recv().await {
        let result = state
            .turns
            .process(&client_id, segment.samples, segment.sample_rate, None)
            .await;

        let events = match result {
            Ok(outcome) => {
                let mut events = vec![Outbound::Event(ServerEvent::AiSpeakStart)];
                if let Some(text) = outcome.user_transcript {
                    events.push(Outbound::Event(ServerEvent::Transcript {
                        text,
                        is_user: true,
                    }));
                }
                events.push(Outbound::Event(ServerEvent::Transcript {
                    text: outcome.reply_text,
                    is_user: false,
                }));
                events.push(Outbound::Audio(outcome.wav));
                events.push(Outbound::Event(ServerEvent::AiSpeakEnd));
                events
            }
            Err(Error::Busy(_)) => vec![Outbound::Event(ServerEvent::error(
                "busy",
                "Session is busy processing another request",
            ))],
            Err(e) => {
                tracing::error!(client_id = %client_id, error = %e, "turn failed");
                vec![Outbound::Event(ServerEvent::error("model_error", e.to_string()))]
            }
        };

        for event in events {
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::cast_precision_loss)]
    fn tone(secs: f32, rate: u32) -> Vec<f32> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let len = (secs * rate as f32) as usize;
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin() * 0.5)
            .collect()
    }

    fn segments(
        intake: &mut AudioIntake,
        audio: &[f32],
        rate: u32,
        frame: usize,
    ) -> Vec<SpeechSegment> {
        audio
            .chunks(frame)
            .filter_map(|f| intake.push(f, rate).unwrap())
            .collect()
    }

    #[test]
    fn test_small_frames_resample_into_one_segment() {
        let mut audio = tone(1.0, 16000);
        audio.extend(vec![0.0; 16000]);

        let mut intake = AudioIntake::new(VadConfig::default());
        let found = segments(&mut intake, &audio, 16000, 320);

        assert_eq!(found.len(), 1);
        let segment = &found[0];
        assert_eq!(segment.sample_rate, SAMPLE_RATE);
        assert!(
            (20000..=26000).contains(&segment.samples.len()),
            "{} samples",
            segment.samples.len()
        );

        // Continuous tone, no seams between capture frames
        let max_step = segment
            .samples
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0f32, f32::max);
        assert!(max_step < 0.1, "discontinuity of {max_step}");
    }

    #[test]
    fn test_native_rate_skips_resampler() {
        let mut audio = tone(0.5, SAMPLE_RATE);
        audio.extend(vec![0.0; SAMPLE_RATE as usize]);

        let mut intake = AudioIntake::new(VadConfig::default());
        let found = segments(&mut intake, &audio, SAMPLE_RATE, 1024);

        assert!(intake.resampler.is_none());
        assert_eq!(found.len(), 1);
        assert!(found[0].samples.len() >= SAMPLE_RATE as usize / 3);
    }

    #[test]
    fn test_rate_change_rebuilds_resampler() {
        let mut intake = AudioIntake::new(VadConfig::default());
        intake.push(&[0.0; 2048], 16000).unwrap();
        assert_eq!(intake.resampler.as_ref().map(StreamResampler::from_rate), Some(16000));

        intake.push(&[0.0; 2048], 48000).unwrap();
        assert_eq!(intake.resampler.as_ref().map(StreamResampler::from_rate), Some(48000));

        assert!(intake.push(&[0.0; 16], 2).is_err());
    }
}
