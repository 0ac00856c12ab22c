//! Status and health endpoints

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use super::ApiState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Service status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub model: String,
}

/// Build the status router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/health", get(health))
        .with_state(state)
}

/// Service banner with the served model
async fn status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "running",
        model: state.model_name.clone(),
    })
}

/// Liveness probe
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
