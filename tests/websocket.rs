//! Streaming socket behavior seen from a bare WebSocket client

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::WebSocketUpgrade;
use axum::extract::ws::{Message as AxumMessage, WebSocket};
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use voicechat::voice::SAMPLE_RATE;
use voicechat::{ApiServerBuilder, ConnectionStatus, EchoBackend, VoiceCall};

mod common;
use common::{RecordingSink, RecordingSurface, ScriptedSource, serve, spawn_server, wait_for};

const WAIT: Duration = Duration::from_secs(5);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn open(base: &str, client_id: &str) -> Socket {
    let url = format!("{}/ws/{client_id}", base.replacen("http", "ws", 1));
    let (socket, _) = connect_async(url.as_str()).await.unwrap();
    socket
}

/// Next JSON event, skipping transport-level frames
async fn next_event(socket: &mut Socket) -> Value {
    tokio::time::timeout(WAIT, async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(Ok(Message::Close(frame))) => panic!("socket closed: {frame:?}"),
                Some(Ok(_)) => {}
                other => panic!("socket ended: {other:?}"),
            }
        }
    })
    .await
    .expect("no event before timeout")
}

#[tokio::test]
async fn test_malformed_control_keeps_socket_open() {
    let (url, _state) = spawn_server().await;
    let mut socket = open(&url, "ws-1").await;

    socket.send(Message::text("{not json")).await.unwrap();
    let event = next_event(&mut socket).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["code"], "invalid_message");

    socket.send(Message::text(r#"{"type":"launch"}"#)).await.unwrap();
    assert_eq!(next_event(&mut socket).await["code"], "invalid_message");

    // Still usable afterwards
    socket
        .send(Message::text(json!({ "type": "ping" }).to_string()))
        .await
        .unwrap();
    assert_eq!(next_event(&mut socket).await["type"], "pong");
}

#[tokio::test]
async fn test_truncated_audio_frame_reported() {
    let (url, state) = spawn_server().await;
    let mut socket = open(&url, "ws-2").await;

    socket.send(Message::binary(vec![0u8, 1, 2])).await.unwrap();
    let event = next_event(&mut socket).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["code"], "invalid_audio");

    // A WAV frame with an implausible rate is refused the same way
    let wav = voicechat::voice::samples_to_wav(&[0.5; 256], 2).unwrap();
    socket.send(Message::binary(wav)).await.unwrap();
    assert_eq!(next_event(&mut socket).await["code"], "invalid_audio");

    socket
        .send(Message::text(json!({ "type": "ping" }).to_string()))
        .await
        .unwrap();
    assert_eq!(next_event(&mut socket).await["type"], "pong");
    assert!(state.sessions.history("ws-2").await.is_empty());
}

#[tokio::test]
async fn test_config_acknowledged_on_audio_socket() {
    let (url, state) = spawn_server().await;
    let mut socket = open(&url, "ws-3").await;

    socket
        .send(Message::text(
            json!({ "type": "config", "voiceType": "Ethan" }).to_string(),
        ))
        .await
        .unwrap();
    let event = next_event(&mut socket).await;
    assert_eq!(event["type"], "config_ack");
    assert_eq!(event["status"], "ok");
    assert_eq!(event["voiceType"], "Ethan");
    assert_eq!(state.sessions.voice_type("ws-3").await, "Ethan");
}

#[tokio::test]
async fn test_server_sends_heartbeat_pings() {
    let server = ApiServerBuilder::new(Arc::new(EchoBackend::new("echo-test")))
        .heartbeat(Duration::from_millis(100))
        .build();
    let (url, _state) = serve(server).await;
    let mut socket = open(&url, "ws-4").await;

    let pinged = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(Ok(msg)) = socket.next().await {
            if matches!(msg, Message::Ping(_)) {
                return true;
            }
        }
        false
    })
    .await;
    assert_eq!(pinged.ok(), Some(true));
}

/// Server that speaks a newer protocol: an unknown event, then a transcript
async fn spawn_chatty_server() -> String {
    async fn talk(mut socket: WebSocket) {
        for text in [
            json!({ "type": "mystery", "payload": 42 }).to_string(),
            "not even json".to_string(),
            json!({ "type": "transcript", "text": "still here", "isUser": false }).to_string(),
        ] {
            if socket.send(AxumMessage::Text(text.into())).await.is_err() {
                return;
            }
        }
        while let Some(Ok(_)) = socket.recv().await {}
    }

    let app = Router::new().route(
        "/ws/{client_id}",
        get(|ws: WebSocketUpgrade| async move { ws.on_upgrade(talk) }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_client_ignores_unknown_events() {
    let url = spawn_chatty_server().await;
    let surface = Arc::new(RecordingSurface::default());
    let mut call = VoiceCall::new(
        &url,
        "ws-5",
        ScriptedSource::new(Vec::new(), SAMPLE_RATE),
        Arc::new(RecordingSink::default()),
        surface.clone(),
    );

    call.start_call("Chelsie").await.unwrap();

    let seen = surface.clone();
    assert!(
        wait_for(WAIT, || seen
            .transcripts()
            .contains(&("still here".to_string(), false)))
        .await
    );
    assert_eq!(surface.transcripts().len(), 1);
    assert_eq!(call.status(), ConnectionStatus::Connected);

    call.end_call().await;
}
