//! API endpoint integration tests

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use serde_json::{Value, json};
use tower::ServiceExt;
use voicechat::protocol::encode_pcm_frame;
use voicechat::voice::{SAMPLE_RATE, samples_to_wav, wav_to_samples};

mod common;
use common::{sine, test_server};

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_status_endpoint() {
    let app = test_server().router();

    let response = app.oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "running");
    assert!(json["model"].is_string());
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_server().router();

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_voices_endpoint() {
    let app = test_server().router();

    let response = app.oneshot(get("/api/voices")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let voices = json["voices"].as_array().unwrap();
    assert_eq!(voices.len(), 2);
    assert_eq!(voices[0]["id"], "Chelsie");
    assert_eq!(voices[1]["name"], "Ethan");
    assert_eq!(json["default"], "Chelsie");
}

#[tokio::test]
async fn test_config_creates_session() {
    let server = test_server();
    let state = server.state();
    let app = server.router();

    let response = app
        .oneshot(post(
            "/api/config",
            &json!({ "clientId": "c1", "voiceType": "Ethan" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
    assert_eq!(json["clientId"], "c1");
    assert_eq!(json["voiceType"], "Ethan");

    assert!(state.sessions.exists("c1").await);
    assert_eq!(state.sessions.voice_type("c1").await, "Ethan");
}

#[tokio::test]
async fn test_config_unknown_voice_falls_back() {
    let app = test_server().router();

    let response = app
        .oneshot(post(
            "/api/config",
            &json!({ "clientId": "c1", "voiceType": "Nobody" }),
        ))
        .await
        .unwrap();

    let json = body_json(response).await;
    assert_eq!(json["voiceType"], "Chelsie");
}

#[tokio::test]
async fn test_config_requires_client_id() {
    let app = test_server().router();

    let response = app
        .oneshot(post("/api/config", &json!({ "clientId": "  " })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_chat_with_wav() {
    let server = test_server();
    let state = server.state();
    let app = server.router();

    let wav = samples_to_wav(&sine(440.0, 1.0, 0.5, SAMPLE_RATE), SAMPLE_RATE).unwrap();
    let response = app
        .oneshot(post(
            "/api/chat",
            &json!({
                "clientId": "c1",
                "voiceType": "Ethan",
                "audio": B64.encode(&wav),
                "audioType": "wav",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
    assert_eq!(
        json["aiTranscript"],
        "I heard 1.0 seconds of audio. Replying as Ethan."
    );

    let reply = B64.decode(json["audioResponse"].as_str().unwrap()).unwrap();
    let (samples, rate) = wav_to_samples(&reply).unwrap();
    assert_eq!(rate, SAMPLE_RATE);
    assert_eq!(samples.len(), SAMPLE_RATE as usize);

    // Both sides of the turn are recorded and the session is free again
    let history = state.sessions.history("c1").await;
    assert_eq!(history.len(), 2);
    assert!(history[0].is_user);
    assert!(!history[1].is_user);
    assert!(!state.sessions.is_processing("c1").await);
}

#[tokio::test]
async fn test_chat_resamples_input() {
    let app = test_server().router();

    let wav = samples_to_wav(&sine(440.0, 1.0, 0.5, 16000), 16000).unwrap();
    let response = app
        .oneshot(post(
            "/api/chat",
            &json!({ "clientId": "c1", "audio": B64.encode(&wav), "audioType": "wav" }),
        ))
        .await
        .unwrap();

    let json = body_json(response).await;
    assert_eq!(json["status"], "success");

    let reply = B64.decode(json["audioResponse"].as_str().unwrap()).unwrap();
    let (_, rate) = wav_to_samples(&reply).unwrap();
    assert_eq!(rate, SAMPLE_RATE);
}

#[tokio::test]
async fn test_chat_with_raw_pcm() {
    let app = test_server().router();

    let pcm = encode_pcm_frame(&sine(440.0, 0.5, 0.5, SAMPLE_RATE));
    let response = app
        .oneshot(post(
            "/api/chat",
            &json!({
                "clientId": "c2",
                "audio": B64.encode(&pcm),
                "audioType": "pcm_f32",
            }),
        ))
        .await
        .unwrap();

    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
    assert_eq!(
        json["aiTranscript"],
        "I heard 0.5 seconds of audio. Replying as Chelsie."
    );
}

#[tokio::test]
async fn test_chat_rejects_unsupported_audio_type() {
    let app = test_server().router();

    let response = app
        .oneshot(post(
            "/api/chat",
            &json!({ "clientId": "c1", "audio": "AAAA", "audioType": "webm" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "error");
    assert_eq!(json["message"], "Unsupported audio type: webm");
}

#[tokio::test]
async fn test_chat_without_audio_type_is_webm() {
    let app = test_server().router();

    let wav = samples_to_wav(&sine(440.0, 0.2, 0.5, SAMPLE_RATE), SAMPLE_RATE).unwrap();
    let response = app
        .oneshot(post(
            "/api/chat",
            &json!({ "clientId": "c1", "audio": B64.encode(&wav) }),
        ))
        .await
        .unwrap();

    let json = body_json(response).await;
    assert_eq!(json["status"], "error");
    assert_eq!(json["message"], "Unsupported audio type: webm");
}

#[tokio::test]
async fn test_chat_rejects_implausible_sample_rate() {
    let server = test_server();
    let state = server.state();
    let app = server.router();

    // Two samples per second would expand twelve-thousand-fold
    let wav = samples_to_wav(&[0.5; 4096], 2).unwrap();
    let started = std::time::Instant::now();
    let response = app
        .oneshot(post(
            "/api/chat",
            &json!({ "clientId": "c1", "audio": B64.encode(&wav), "audioType": "wav" }),
        ))
        .await
        .unwrap();

    let json = body_json(response).await;
    assert_eq!(json["status"], "error");
    assert!(
        json["message"]
            .as_str()
            .unwrap()
            .contains("sample rate 2Hz"),
        "{json}"
    );
    assert!(started.elapsed() < std::time::Duration::from_secs(1));
    assert!(state.sessions.history("c1").await.is_empty());
}

#[tokio::test]
async fn test_chat_rejects_overlong_clip() {
    let server = test_server();
    let max_secs = server.state().vad.max_segment_secs;
    let app = server.router();

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let len = ((max_secs + 1.0) * 8000.0) as usize;
    let wav = samples_to_wav(&vec![0.1; len], 8000).unwrap();
    let response = app
        .oneshot(post(
            "/api/chat",
            &json!({ "clientId": "c1", "audio": B64.encode(&wav), "audioType": "wav" }),
        ))
        .await
        .unwrap();

    let json = body_json(response).await;
    assert_eq!(json["status"], "error");
    assert!(json["message"].as_str().unwrap().starts_with("Audio too long"));
}

#[tokio::test]
async fn test_chat_reports_bad_audio_in_band() {
    let app = test_server().router();

    let response = app
        .oneshot(post(
            "/api/chat",
            &json!({ "clientId": "c1", "audio": "not base64!", "audioType": "wav" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "error");
    assert!(json["message"].as_str().unwrap().starts_with("Failed to decode audio"));
}

#[tokio::test]
async fn test_chat_while_busy() {
    let server = test_server();
    let state = server.state();
    let app = server.router();

    state.sessions.ensure("c1").await;
    assert!(state.sessions.try_begin_processing("c1").await);

    let wav = samples_to_wav(&sine(440.0, 0.2, 0.5, SAMPLE_RATE), SAMPLE_RATE).unwrap();
    let response = app
        .oneshot(post(
            "/api/chat",
            &json!({ "clientId": "c1", "audio": B64.encode(&wav), "audioType": "wav" }),
        ))
        .await
        .unwrap();

    let json = body_json(response).await;
    assert_eq!(json["status"], "error");
    assert_eq!(json["message"], "Session is busy processing another request");
    assert!(state.sessions.history("c1").await.is_empty());
}

#[tokio::test]
async fn test_pause_unknown_session() {
    let app = test_server().router();

    let response = app
        .oneshot(post(
            "/api/pause",
            &json!({ "clientId": "missing", "isPaused": true }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_json(response).await;
    assert_eq!(json["error"]["message"], "Session not found");
}

#[tokio::test]
async fn test_pause_existing_session() {
    let server = test_server();
    let state = server.state();
    state.sessions.ensure("c1").await;

    let response = server
        .router()
        .oneshot(post(
            "/api/pause",
            &json!({ "clientId": "c1", "isPaused": true }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
    assert_eq!(json["isPaused"], true);
    assert!(state.sessions.is_paused("c1").await);
}

#[tokio::test]
async fn test_end_deletes_session() {
    let server = test_server();
    let state = server.state();
    state.sessions.ensure("c1").await;
    state.sessions.add_history("c1", "hello", true).await;

    let response = server
        .router()
        .oneshot(post("/api/end", &json!({ "clientId": "c1" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
    assert_eq!(json["message"], "Session ended");

    assert!(!state.sessions.exists("c1").await);
    assert!(state.sessions.history("c1").await.is_empty());
}

#[tokio::test]
async fn test_end_unknown_session_succeeds() {
    let app = test_server().router();

    let response = app
        .oneshot(post("/api/end", &json!({ "clientId": "never-seen" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_history_endpoint() {
    let server = test_server();
    let state = server.state();
    state.sessions.ensure("c1").await;
    state.sessions.add_history("c1", "hi", true).await;
    state.sessions.add_history("c1", "hello there", false).await;

    let response = server.router().oneshot(get("/api/history/c1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["clientId"], "c1");
    let history = json["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["text"], "hi");
    assert_eq!(history[0]["isUser"], true);
    assert_eq!(history[1]["isUser"], false);
}

#[tokio::test]
async fn test_rate_limit() {
    let app = voicechat::ApiServerBuilder::new(std::sync::Arc::new(
        voicechat::EchoBackend::new("echo"),
    ))
    .rate_limit(Some(2))
    .build()
    .router();

    assert_eq!(
        app.clone().oneshot(get("/health")).await.unwrap().status(),
        StatusCode::OK
    );
    assert_eq!(
        app.clone().oneshot(get("/health")).await.unwrap().status(),
        StatusCode::OK
    );
    assert_eq!(
        app.oneshot(get("/health")).await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}
