//! Shared test utilities

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use voicechat::voice::{AudioSink, AudioSource, SAMPLE_RATE};
use voicechat::{
    ApiServer, ApiServerBuilder, ApiState, ConnectionStatus, EchoBackend, MessageStatus,
    ModelBackend, ModelRequest, ModelResponse, RenderSurface, Result,
};

/// Generate sine wave audio samples
#[must_use]
pub fn sine(frequency: f32, duration_secs: f32, amplitude: f32, sample_rate: u32) -> Vec<f32> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let num_samples = (sample_rate as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
#[must_use]
pub fn silence(duration_secs: f32, sample_rate: u32) -> Vec<f32> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let num_samples = (sample_rate as f32 * duration_secs) as usize;
    vec![0.0; num_samples]
}

/// Gateway with the echo backend and built-in defaults
#[must_use]
pub fn test_server() -> ApiServer {
    ApiServerBuilder::new(Arc::new(EchoBackend::new("echo-test")))
        .heartbeat(Duration::from_secs(30))
        .build()
}

/// Serve a gateway on an ephemeral port
///
/// Returns the `http://` base URL and the shared state.
pub async fn spawn_server() -> (String, Arc<ApiState>) {
    serve(test_server()).await
}

/// Serve a prepared gateway on an ephemeral port
pub async fn serve(server: ApiServer) -> (String, Arc<ApiState>) {
    let state = server.state();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve(listener));
    (format!("http://{addr}"), state)
}

/// Backend that never answers until the gate opens
pub struct StalledBackend(pub Arc<Notify>);

#[async_trait]
impl ModelBackend for StalledBackend {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn respond(&self, request: ModelRequest) -> Result<ModelResponse> {
        self.0.notified().await;
        Ok(ModelResponse {
            text: "finally".to_string(),
            user_transcript: None,
            audio: request.audio,
            sample_rate: request.sample_rate,
        })
    }
}

/// Speech followed by enough silence to close a segment, in capture-sized frames
#[must_use]
pub fn utterance_frames(speech_secs: f32) -> Vec<Vec<f32>> {
    let mut samples = sine(440.0, speech_secs, 0.5, SAMPLE_RATE);
    samples.extend(silence(0.75, SAMPLE_RATE));
    samples.chunks(1024).map(<[f32]>::to_vec).collect()
}

/// Plays back a fixed list of frames instead of a microphone
pub struct ScriptedSource {
    frames: Vec<Vec<f32>>,
    sample_rate: u32,
    task: Option<JoinHandle<()>>,
}

impl ScriptedSource {
    #[must_use]
    pub const fn new(frames: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            frames,
            sample_rate,
            task: None,
        }
    }
}

impl AudioSource for ScriptedSource {
    fn start(&mut self, tx: mpsc::Sender<Vec<f32>>) -> Result<()> {
        let frames = self.frames.clone();
        self.task = Some(tokio::spawn(async move {
            // Let the call finish connecting first
            tokio::time::sleep(Duration::from_millis(200)).await;
            for frame in frames {
                if tx.send(frame).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            // Hold the channel open like a live device
            tx.closed().await;
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_capturing(&self) -> bool {
        self.task.is_some()
    }
}

/// Records what would have been played
#[derive(Default)]
pub struct RecordingSink {
    pub played: Mutex<Vec<(usize, u32)>>,
}

impl AudioSink for RecordingSink {
    fn play(&self, samples: &[f32], sample_rate: u32) -> Result<()> {
        self.played.lock().unwrap().push((samples.len(), sample_rate));
        Ok(())
    }
}

/// Records everything the cores render
#[derive(Default)]
pub struct RecordingSurface {
    pub statuses: Mutex<Vec<ConnectionStatus>>,
    pub transcripts: Mutex<Vec<(String, bool)>>,
    pub paused: Mutex<Vec<bool>>,
    pub message_statuses: Mutex<Vec<(String, MessageStatus)>>,
}

impl RecordingSurface {
    pub fn transcripts(&self) -> Vec<(String, bool)> {
        self.transcripts.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        self.statuses.lock().unwrap().clone()
    }
}

impl RenderSurface for RecordingSurface {
    fn status(&self, status: ConnectionStatus) {
        self.statuses.lock().unwrap().push(status);
    }

    fn transcript(&self, text: &str, is_user: bool) {
        self.transcripts
            .lock()
            .unwrap()
            .push((text.to_string(), is_user));
    }

    fn paused(&self, paused: bool) {
        self.paused.lock().unwrap().push(paused);
    }

    fn message_status(&self, id: &str, status: MessageStatus) {
        self.message_statuses
            .lock()
            .unwrap()
            .push((id.to_string(), status));
    }
}

/// Poll until `check` holds or the timeout passes
pub async fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Collects user notifications
#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl voicechat::NotificationSink for RecordingNotifier {
    fn notify(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}
