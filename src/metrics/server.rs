//! HTTP server for metrics, status and camera control.

use crate::capture::{CaptureConfig, CaptureDevice, ConfigError, FileConfig, ServerConfig};
use crate::metrics::MetricsRegistry;
use crate::supervisor::{StatusSnapshot, SupervisorSlot};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tower_http::cors::CorsLayer;

/// Errors that can occur during server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid bind address {0}")]
    Address(String),

    #[error("failed to bind to address: {0}")]
    Bind(#[from] std::io::Error),

    #[error("server error: {0}")]
    Server(String),
}

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    /// Address to bind the server to.
    pub bind_addr: SocketAddr,
    /// Frames older than this are reported as stale by `/health`.
    pub max_frame_age: Duration,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], 8000).into(),
            max_frame_age: Duration::from_secs(5),
        }
    }
}

impl MetricsServerConfig {
    /// Creates a config with a custom port.
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], port).into(),
            ..Self::default()
        }
    }

    /// Resolves the `[server]` section of the configuration file.
    pub fn from_server_config(server: &ServerConfig) -> Result<Self, ServerError> {
        let address = format!("{}:{}", server.host, server.port);
        let bind_addr = (server.host.as_str(), server.port)
            .to_socket_addrs()
            .map_err(|_| ServerError::Address(address.clone()))?
            .next()
            .ok_or(ServerError::Address(address))?;

        Ok(Self {
            bind_addr,
            max_frame_age: Duration::from_secs(server.max_frame_age),
        })
    }
}

/// Where `POST /server/reload-config` reads the configuration from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// Configuration file to re-read.
    pub path: PathBuf,
    /// Device node given on the command line, applied over the file.
    pub device_override: Option<PathBuf>,
    /// `[server]` section the HTTP server was started with.
    pub server: ServerConfig,
}

/// Shared state for the request handlers.
struct ServerState<D: CaptureDevice + 'static> {
    slot: Arc<SupervisorSlot<D>>,
    registry: MetricsRegistry,
    max_frame_age: Duration,
    config_source: Option<ConfigSource>,
    shutdown: Mutex<Option<Sender<()>>>,
}

/// HTTP server exposing the active supervisor.
pub struct MetricsServer<D: CaptureDevice + 'static> {
    config: MetricsServerConfig,
    state: ServerState<D>,
}

impl<D: CaptureDevice + 'static> MetricsServer<D> {
    /// Creates a new server for the supervisor held by `slot`.
    pub fn new(
        config: MetricsServerConfig,
        registry: MetricsRegistry,
        slot: Arc<SupervisorSlot<D>>,
    ) -> Self {
        let state = ServerState {
            slot,
            registry,
            max_frame_age: config.max_frame_age,
            config_source: None,
            shutdown: Mutex::new(None),
        };
        Self { config, state }
    }

    /// Lets `POST /server/shutdown` request process shutdown through `sender`.
    pub fn with_shutdown(mut self, sender: Sender<()>) -> Self {
        self.state.shutdown = Mutex::new(Some(sender));
        self
    }

    /// Enables `POST /server/reload-config` for the given file.
    pub fn with_config_source(mut self, source: ConfigSource) -> Self {
        self.state.config_source = Some(source);
        self
    }

    fn router(state: Arc<ServerState<D>>) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler::<D>))
            .route("/health", get(health_handler::<D>))
            .route("/status", get(status_handler::<D>))
            .route("/config", get(config_handler::<D>))
            .route("/camera/restart", post(restart_handler::<D>))
            .route("/server/reload-config", post(reload_config_handler::<D>))
            .route("/server/shutdown", post(shutdown_handler::<D>))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Starts the HTTP server.
    ///
    /// This method runs the server until it is shut down.
    pub async fn run(self) -> Result<(), ServerError> {
        let app = Self::router(Arc::new(self.state));
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        tracing::info!(
            addr = %self.config.bind_addr,
            "HTTP server listening"
        );

        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::Server(e.to_string()))?;

        Ok(())
    }
}

/// Body of `POST /camera/restart`.
#[derive(Debug, Serialize)]
struct RestartResponse {
    success: bool,
    message: String,
}

/// Body of `POST /server/reload-config`.
#[derive(Debug, Serialize)]
struct ReloadResponse {
    success: bool,
    message: String,
    /// Whether the file differed from the running configuration.
    changed: bool,
    /// Whether the `[server]` section changed, which only applies after a
    /// process restart.
    restart_required: bool,
}

/// Body of `POST /server/shutdown`.
#[derive(Debug, Serialize)]
struct ShutdownResponse {
    success: bool,
    message: String,
}

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: chrono::DateTime<Utc>,
    frame_fresh: bool,
}

/// Handler for the /metrics endpoint.
async fn metrics_handler<D: CaptureDevice + 'static>(
    State(state): State<Arc<ServerState<D>>>,
) -> impl IntoResponse {
    state.registry.update(&state.slot.current().get_status());

    match state.registry.encode() {
        Ok(output) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {}", e),
        ),
    }
}

/// Handler for the /health endpoint.
///
/// Always answers while the process is alive; `frame_fresh` reports whether
/// the last frame is younger than the configured maximum age.
async fn health_handler<D: CaptureDevice + 'static>(
    State(state): State<Arc<ServerState<D>>>,
) -> Json<HealthResponse> {
    let status = state.slot.current().get_status();
    let max_age = state.max_frame_age.as_secs_f64();
    let frame_fresh = status.is_connected
        && status
            .stats
            .last_frame_age_secs
            .is_some_and(|age| age <= max_age);

    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
        frame_fresh,
    })
}

/// Handler for the /status endpoint.
async fn status_handler<D: CaptureDevice + 'static>(
    State(state): State<Arc<ServerState<D>>>,
) -> Json<StatusSnapshot> {
    Json(state.slot.current().get_status())
}

/// Handler for the /config endpoint.
async fn config_handler<D: CaptureDevice + 'static>(
    State(state): State<Arc<ServerState<D>>>,
) -> Json<CaptureConfig> {
    Json(state.slot.current().config().clone())
}

/// Handler for the /camera/restart endpoint.
async fn restart_handler<D: CaptureDevice + 'static>(
    State(state): State<Arc<ServerState<D>>>,
) -> (StatusCode, Json<RestartResponse>) {
    tracing::info!("Camera restart requested over HTTP");

    let supervisor = state.slot.current();
    match tokio::task::spawn_blocking(move || supervisor.restart()).await {
        Ok(success) => {
            let message = if success {
                "Camera restart successful"
            } else {
                "Camera restart failed"
            };
            (
                StatusCode::OK,
                Json(RestartResponse {
                    success,
                    message: message.to_owned(),
                }),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "Camera restart task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RestartResponse {
                    success: false,
                    message: format!("Camera restart failed: {}", e),
                }),
            )
        }
    }
}

/// Outcome of a successful reload.
struct Reloaded {
    changed: bool,
    restart_required: bool,
}

/// Re-reads the configuration file and replaces the supervisor if the
/// capture section changed.
fn reload<D: CaptureDevice + 'static>(
    slot: &SupervisorSlot<D>,
    source: &ConfigSource,
) -> Result<Reloaded, ConfigError> {
    let mut file = FileConfig::from_file(&source.path)?;
    if let Some(device) = &source.device_override {
        file.capture.device_path = Some(device.clone());
    }

    let restart_required = file.server != source.server;
    if restart_required {
        tracing::warn!("Server settings changed, restart the process to apply them");
    }
    let capture_changed = slot.replace(file.capture)?;

    Ok(Reloaded {
        changed: capture_changed || restart_required,
        restart_required,
    })
}

/// Handler for the /server/reload-config endpoint.
async fn reload_config_handler<D: CaptureDevice + 'static>(
    State(state): State<Arc<ServerState<D>>>,
) -> (StatusCode, Json<ReloadResponse>) {
    tracing::info!("Configuration reload requested over HTTP");

    let Some(source) = state.config_source.clone() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReloadResponse {
                success: false,
                message: "No configuration file to reload".to_owned(),
                changed: false,
                restart_required: false,
            }),
        );
    };

    let slot = Arc::clone(&state.slot);
    let failure = |message: String| {
        tracing::error!(error = %message, "Configuration reload failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ReloadResponse {
                success: false,
                message: format!("Configuration reload failed: {}", message),
                changed: false,
                restart_required: false,
            }),
        )
    };

    match tokio::task::spawn_blocking(move || reload(&slot, &source)).await {
        Ok(Ok(reloaded)) => {
            let message = if reloaded.changed {
                "Configuration reloaded"
            } else {
                "No configuration changes detected"
            };
            (
                StatusCode::OK,
                Json(ReloadResponse {
                    success: true,
                    message: message.to_owned(),
                    changed: reloaded.changed,
                    restart_required: reloaded.restart_required,
                }),
            )
        }
        Ok(Err(e)) => failure(e.to_string()),
        Err(e) => failure(e.to_string()),
    }
}

/// Handler for the /server/shutdown endpoint.
///
/// Signals the same channel as Ctrl+C; the main thread performs the
/// shutdown after the response is sent.
async fn shutdown_handler<D: CaptureDevice + 'static>(
    State(state): State<Arc<ServerState<D>>>,
) -> (StatusCode, Json<ShutdownResponse>) {
    tracing::info!("Graceful shutdown requested over HTTP");

    let sent = state
        .shutdown
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .is_some_and(|sender| sender.send(()).is_ok());

    if sent {
        (
            StatusCode::OK,
            Json(ShutdownResponse {
                success: true,
                message: "Graceful shutdown initiated".to_owned(),
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ShutdownResponse {
                success: false,
                message: "Shutdown is not available".to_owned(),
            }),
        )
    }
}
