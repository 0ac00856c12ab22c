//! HTTP and WebSocket server for the voice chat gateway

pub mod chat;
pub mod health;
pub mod rate_limit;
pub mod websocket;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::HeaderValue;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::config::{AudioConfig, Config, VadConfig};
use crate::model::ModelBackend;
use crate::session::{ConnectionRegistry, SessionManager, VoiceCatalog};
use crate::turn::TurnProcessor;
use crate::voice::SAMPLE_RATE;
use crate::Result;

/// Completed segments waiting per connection before new ones are dropped
pub const TURN_QUEUE_DEPTH: usize = 4;

/// Shared state for API handlers
pub struct ApiState {
    pub sessions: SessionManager,
    pub connections: ConnectionRegistry,
    pub turns: TurnProcessor,
    /// Model identifier reported by `GET /`
    pub model_name: String,
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub heartbeat: Duration,
    pub rate_limiter: Option<rate_limit::SharedLimiter>,
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    backend: Arc<dyn ModelBackend>,
    host: String,
    port: u16,
    cors_origins: Vec<String>,
    static_dir: Option<PathBuf>,
    rate_limit_per_minute: Option<u32>,
    voices: VoiceCatalog,
    model_name: String,
    system_prompt: String,
    audio: AudioConfig,
    vad: VadConfig,
    heartbeat: Duration,
    session_timeout: Duration,
    cleanup_interval: Duration,
}

impl ApiServerBuilder {
    /// Create a new API server builder with built-in defaults
    #[must_use]
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        let defaults = Config::default();
        Self::from_config(&defaults, backend)
    }

    /// Create a builder from loaded configuration
    #[must_use]
    pub fn from_config(config: &Config, backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            backend,
            host: config.server.host.clone(),
            port: config.server.port,
            cors_origins: config.server.cors_origins.clone(),
            static_dir: config.server.static_dir.clone(),
            rate_limit_per_minute: config.server.rate_limit_per_minute,
            voices: config.voices.clone(),
            model_name: config.model.name.clone(),
            system_prompt: config.model.system_prompt.clone(),
            audio: config.audio,
            vad: config.vad,
            heartbeat: Duration::from_secs(config.server.ws_heartbeat_secs.max(1)),
            session_timeout: Duration::from_secs(config.session.timeout_secs),
            cleanup_interval: Duration::from_secs(config.session.cleanup_interval_secs.max(1)),
        }
    }

    /// Set the listen port
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the static files directory for serving the web UI
    #[must_use]
    pub fn static_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.static_dir = dir;
        self
    }

    /// Enable a global requests-per-minute limit
    #[must_use]
    pub const fn rate_limit(mut self, per_minute: Option<u32>) -> Self {
        self.rate_limit_per_minute = per_minute;
        self
    }

    /// Set the WebSocket heartbeat interval
    #[must_use]
    pub fn heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = interval.max(Duration::from_millis(10));
        self
    }

    /// Set segmentation parameters
    #[must_use]
    pub const fn vad(mut self, vad: VadConfig) -> Self {
        self.vad = vad;
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        let sessions = SessionManager::new(self.voices, self.session_timeout);
        let turns = TurnProcessor::new(sessions.clone(), self.backend, self.system_prompt);

        let rate_limiter = self.rate_limit_per_minute.map(rate_limit::create_limiter);

        let state = Arc::new(ApiState {
            sessions,
            connections: ConnectionRegistry::new(),
            turns,
            model_name: self.model_name,
            audio: self.audio,
            vad: self.vad,
            heartbeat: self.heartbeat,
            rate_limiter,
        });

        ApiServer {
            state,
            host: self.host,
            port: self.port,
            cors_origins: self.cors_origins,
            static_dir: self.static_dir,
            cleanup_interval: self.cleanup_interval,
        }
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    host: String,
    port: u16,
    cors_origins: Vec<String>,
    static_dir: Option<PathBuf>,
    cleanup_interval: Duration,
}

impl ApiServer {
    /// Shared handler state
    #[must_use]
    pub fn state(&self) -> Arc<ApiState> {
        Arc::clone(&self.state)
    }

    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .nest("/api", chat::router(self.state.clone()))
            .nest("/ws", websocket::router(self.state.clone()))
            .merge(health::router(self.state.clone()));

        // Serve static files if configured
        if let Some(static_dir) = &self.static_dir {
            let index_file = static_dir.join("index.html");
            let serve_dir =
                ServeDir::new(static_dir).not_found_service(ServeFile::new(&index_file));

            router = router.fallback_service(serve_dir);
            tracing::info!(path = %static_dir.display(), "serving static files");
        }

        let router = router.layer(axum::middleware::from_fn_with_state(
            self.state.clone(),
            rate_limit::rate_limit_middleware,
        ));

        router.layer(self.cors()).layer(TraceLayer::new_for_http())
    }

    /// CORS layer for cross-origin requests from the browser client
    fn cors(&self) -> CorsLayer {
        let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

        if self.cors_origins.is_empty() || self.cors_origins.iter().any(|o| o == "*") {
            return cors.allow_origin(Any);
        }

        let origins: Vec<HeaderValue> = self
            .cors_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        cors.allow_origin(AllowOrigin::list(origins))
    }

    /// Serve on an already bound listener
    ///
    /// # Errors
    ///
    /// Returns error if the server fails
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let cleanup = self.state.sessions.spawn_cleanup_task(self.cleanup_interval);

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, model = %self.state.model_name, "API server listening");
        }

        let result = axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")));

        cleanup.abort();
        result
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        if self.state.audio.sample_rate != SAMPLE_RATE {
            tracing::warn!(
                configured = self.state.audio.sample_rate,
                model = SAMPLE_RATE,
                "audio sample rate differs from model rate, frames will be resampled"
            );
        }

        self.serve(listener).await
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
