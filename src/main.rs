use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use voicechat::client::{LogNotifier, MessageStatus};
use voicechat::voice::{
    AudioCapture, AudioLevelMeter, AudioPlayback, AudioSink, AudioSource, DEFAULT_FRAME_SIZE,
    SAMPLE_RATE, calculate_rms,
};
use voicechat::{
    ApiServerBuilder, AudioFraming, ChatMessage, Config, ConnectionStatus, HistoryStore,
    MessageRepo, RenderSurface, VoiceCall, VoiceChat, db, model,
};

/// Voicechat - real-time voice conversations with a multimodal model
#[derive(Parser)]
#[command(name = "voicechat", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway server
    Serve {
        /// Port to listen on
        #[arg(long, env = "VOICECHAT_PORT")]
        port: Option<u16>,
        /// Directory with a web UI to serve
        #[arg(long, env = "VOICECHAT_STATIC_DIR")]
        static_dir: Option<std::path::PathBuf>,
    },
    /// Start a hands-free streaming call
    Call {
        /// Gateway URL
        #[arg(long, env = "VOICECHAT_SERVER_URL")]
        server: Option<String>,
        /// Response voice
        #[arg(long)]
        voice: Option<String>,
        /// Client id (random when omitted)
        #[arg(long)]
        client_id: Option<String>,
        /// Send each frame as a WAV file instead of raw PCM
        #[arg(long)]
        wav_frames: bool,
        /// Send control messages on a separate socket
        #[arg(long)]
        separate_control: bool,
    },
    /// Push-to-talk chat with saved history
    Chat {
        /// Gateway URL
        #[arg(long, env = "VOICECHAT_SERVER_URL")]
        server: Option<String>,
        /// Response voice
        #[arg(long)]
        voice: Option<String>,
    },
    /// Show or clear saved chat history
    History {
        /// Delete all saved messages
        #[arg(long)]
        clear: bool,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voicechat=info",
        1 => "info,voicechat=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Command::Serve { port, static_dir } => serve(config, port, static_dir).await,
        Command::Call {
            server,
            voice,
            client_id,
            wav_frames,
            separate_control,
        } => {
            let framing = if wav_frames {
                AudioFraming::Wav
            } else {
                config.audio.framing
            };
            call(
                &config,
                server,
                voice,
                client_id,
                framing,
                separate_control || config.client.separate_control,
            )
            .await
        }
        Command::Chat { server, voice } => chat(&config, server, voice).await,
        Command::History { clear } => history(&config, clear),
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

/// Run the gateway until interrupted
async fn serve(
    config: Config,
    port: Option<u16>,
    static_dir: Option<std::path::PathBuf>,
) -> anyhow::Result<()> {
    let backend = model::from_config(&config.model)?;
    tracing::info!(
        backend = backend.name(),
        model = %config.model.name,
        "starting voicechat gateway"
    );

    let mut builder = ApiServerBuilder::from_config(&config, backend);
    if let Some(port) = port {
        builder = builder.port(port);
    }
    if static_dir.is_some() {
        builder = builder.static_dir(static_dir);
    }
    let server = builder.build();

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }
    Ok(())
}

/// Prints call and chat state to the terminal
struct TerminalSurface;

impl RenderSurface for TerminalSurface {
    fn status(&self, status: ConnectionStatus) {
        println!("[{status}]");
    }

    fn ai_speaking(&self, speaking: bool) {
        if speaking {
            println!("(assistant speaking)");
        }
    }

    fn transcript(&self, text: &str, is_user: bool) {
        let who = if is_user { "You" } else { "AI" };
        println!("{who}: {text}");
    }

    fn paused(&self, paused: bool) {
        println!("{}", if paused { "[paused]" } else { "[listening]" });
    }

    fn recording(&self, recording: bool) {
        if recording {
            println!("Recording... press Enter to send");
        }
    }

    fn message_status(&self, _id: &str, status: MessageStatus) {
        if status == MessageStatus::Error {
            println!("(message failed)");
        }
    }
}

/// Read trimmed stdin lines on a background task
fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line.trim().to_string()).await.is_err() {
                break;
            }
        }
    });
    rx
}

#[allow(clippy::future_not_send)]
async fn call(
    config: &Config,
    server: Option<String>,
    voice: Option<String>,
    client_id: Option<String>,
    framing: AudioFraming,
    separate_control: bool,
) -> anyhow::Result<()> {
    let server = server.unwrap_or_else(|| config.client.server_url.clone());
    let voice = voice.unwrap_or_else(|| config.client.voice.clone());
    let client_id = client_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let capture = AudioCapture::new(config.audio.sample_rate, config.audio.chunk_size)?;
    let playback: Arc<dyn AudioSink> = Arc::new(AudioPlayback::new(SAMPLE_RATE)?);

    let mut call = VoiceCall::new(&server, client_id, capture, playback, Arc::new(TerminalSurface))
        .with_framing(framing)
        .with_separate_control(separate_control);

    call.start_call(&voice).await?;
    println!("Call started. Commands: m = mute, p = pause, q = hang up");

    let mut status = call.subscribe();
    let mut input = stdin_lines();
    loop {
        tokio::select! {
            line = input.recv() => match line.as_deref() {
                Some("m") => match call.toggle_mute() {
                    Some(true) => println!("[muted]"),
                    Some(false) => println!("[unmuted]"),
                    None => println!("(not capturing)"),
                },
                Some("p") => {
                    if !call.toggle_pause().await {
                        println!("(not connected)");
                    }
                }
                Some("q") | None => break,
                Some(_) => {}
            },
            changed = status.changed() => {
                if changed.is_err() || *status.borrow() == ConnectionStatus::Disconnected {
                    println!("Connection lost");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    call.end_call().await;
    Ok(())
}

#[allow(clippy::future_not_send)]
async fn chat(config: &Config, server: Option<String>, voice: Option<String>) -> anyhow::Result<()> {
    let server = server.unwrap_or_else(|| config.client.server_url.clone());
    let voice = voice.unwrap_or_else(|| config.client.voice.clone());

    let pool = db::init(config.database_path())?;
    let store: Arc<dyn HistoryStore> = Arc::new(MessageRepo::new(pool));
    let capture = AudioCapture::new(config.audio.sample_rate, config.audio.chunk_size)?;
    let playback: Arc<dyn AudioSink> = Arc::new(AudioPlayback::new(SAMPLE_RATE)?);

    let mut chat = VoiceChat::new(
        &server,
        capture,
        playback,
        store,
        Arc::new(TerminalSurface),
        Arc::new(LogNotifier),
    )
    .with_voice(&voice);

    // Init failures are reported through the notifier; keep going offline
    let _ = chat.mount().await;
    if let Err(e) = chat.refresh_voices().await {
        tracing::debug!(error = %e, "using built-in voice list");
    }

    for msg in chat.messages() {
        print_message(msg);
    }
    println!("Enter = record/send, r = restart, v <name> = voice, q = quit");

    let mut input = stdin_lines();
    while let Some(line) = input.recv().await {
        match line.as_str() {
            "" => {
                if chat.is_recording() {
                    let before = chat.messages().len();
                    if chat.stop_recording().await.is_ok() {
                        for msg in chat.messages().iter().skip(before) {
                            print_message(msg);
                        }
                    }
                } else if let Err(e) = chat.start_recording() {
                    println!("Cannot record: {e}");
                }
            }
            "r" => {
                let _ = chat.restart_chat().await;
                println!("New conversation ({})", chat.client_id());
            }
            "q" => break,
            other => {
                if let Some(name) = other.strip_prefix("v ") {
                    let name = name.trim();
                    if chat.available_voices().iter().any(|v| v.id == name) {
                        chat.set_voice_type(name);
                        println!("Voice: {name}");
                    } else {
                        let names: Vec<&str> =
                            chat.available_voices().iter().map(|v| v.id.as_str()).collect();
                        println!("Unknown voice. Available: {}", names.join(", "));
                    }
                }
            }
        }
    }

    Ok(())
}

fn print_message(msg: &ChatMessage) {
    let who = if msg.is_user { "You" } else { "AI" };
    println!("{who}: {}", msg.content);
}

/// Print or clear saved history
fn history(config: &Config, clear: bool) -> anyhow::Result<()> {
    let pool = db::init(config.database_path())?;
    let repo = MessageRepo::new(pool);

    if clear {
        repo.save_messages(&[])?;
        println!("History cleared");
        return Ok(());
    }

    if let Some(id) = repo.load_client_id()? {
        println!("Client id: {id}");
    }
    let messages = repo.load_messages()?;
    if messages.is_empty() {
        println!("No saved messages");
    }
    for msg in &messages {
        let when = chrono::DateTime::from_timestamp_millis(msg.timestamp)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        let status = msg.status.map(MessageStatus::as_str).unwrap_or_default();
        let who = if msg.is_user { "You" } else { "AI" };
        println!("[{when}] {who}: {} {status}", msg.content);
    }
    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new(SAMPLE_RATE, DEFAULT_FRAME_SIZE)?;
    let (tx, mut rx) = mpsc::channel(256);
    capture.start(tx)?;

    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("---");

    let mut meter = AudioLevelMeter::new();
    for i in 0..duration {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        let mut samples = Vec::new();
        while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            meter.process(&frame);
            samples.extend(frame);
        }

        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (meter.level() * 50.0).min(50.0) as usize;
        let bar: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            bar
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new(SAMPLE_RATE)?;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..SAMPLE_RATE * 2)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), SAMPLE_RATE);

    tokio::task::spawn_blocking(move || playback.play(&samples, SAMPLE_RATE)).await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}
