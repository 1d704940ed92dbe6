//! HTTP surface: WebSocket upgrades, health, and the one-shot prompt API.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::acp::negotiation::SessionRequest;
use crate::bridge::oneshot::{run_prompt, OneShotRequest};
use crate::bridge::peer::PeerSettings;
use crate::bridge::registry::{PeerCounts, PeerRegistry};
use crate::bridge::ws::ws_handler;
use crate::config::BridgeConfig;
use crate::transport::TransportFactory;
use crate::{AppError, Result};

/// Shared state handed to every request handler.
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<BridgeConfig>,
    /// Transport used for every spawned agent.
    pub factory: Arc<dyn TransportFactory>,
    /// Live peers.
    pub registry: PeerRegistry,
    /// Settings copied into each new peer.
    pub peer_settings: PeerSettings,
}

impl AppState {
    /// Build state from configuration and a transport factory.
    #[must_use]
    pub fn new(config: Arc<BridgeConfig>, factory: Arc<dyn TransportFactory>) -> Self {
        let peer_settings = PeerSettings {
            detach_grace: config.detach_grace(),
        };
        Self {
            config,
            factory,
            registry: PeerRegistry::new(),
            peer_settings,
        }
    }
}

/// Assemble the router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/agent", post(agent_handler))
        .with_state(state)
}

/// Bind `config.listen_addr()` and serve until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Config` if the listener cannot bind or the server
/// fails.
pub async fn serve(state: Arc<AppState>, ct: CancellationToken) -> Result<()> {
    let bind = state.config.listen_addr();
    let router = build_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind {bind}: {err}")))?;

    info!(%bind, transport = state.factory.name(), "acp bridge listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            ct.cancelled().await;
        })
        .await
        .map_err(|err| AppError::Config(format!("http server error: {err}")))?;

    state.registry.shutdown_all().await;
    info!("http server shut down");
    Ok(())
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    transport: &'static str,
    peers: PeerCounts,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        transport: state.factory.name(),
        peers: state.registry.counts().await,
    })
}

// ── One-shot prompt API ─────────────────────────────────────────────────────

/// Body of `POST /api/agent`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentRequest {
    #[serde(default)]
    prompt: String,
    preset: Option<String>,
    cwd: Option<String>,
    /// Milliseconds.
    timeout: Option<u64>,
    resume: Option<String>,
    #[serde(default)]
    config: BTreeMap<String, String>,
}

/// Error reply rendered as `{"error": message}`.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorBody {
            error: String,
        }
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> std::result::Result<(), ApiError> {
    let Some(expected) = state.config.api_key.as_deref() else {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "API key not configured",
        ));
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);
    if presented == Some(expected) {
        Ok(())
    } else {
        Err(ApiError::new(StatusCode::UNAUTHORIZED, "Unauthorized"))
    }
}

async fn agent_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Response, ApiError> {
    authorize(&state, &headers)?;

    let request: AgentRequest = if body.is_empty() {
        AgentRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|err| ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid JSON: {err}")))?
    };

    let prompt = request.prompt.trim();
    if prompt.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "prompt is required"));
    }

    let preset_id = request
        .preset
        .as_deref()
        .unwrap_or(&state.config.oneshot.default_preset);
    let Some(preset) = state.config.preset(preset_id) else {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("Invalid preset: {preset_id}"),
        ));
    };

    let cwd = request.cwd.filter(|cwd| !cwd.trim().is_empty()).unwrap_or_else(|| {
        std::env::current_dir()
            .map(|dir| dir.to_string_lossy().into_owned())
            .unwrap_or_else(|_| ".".to_owned())
    });
    let timeout = state
        .config
        .oneshot_timeout(request.timeout.map(Duration::from_millis));

    let mut oneshot = OneShotRequest::from_preset(preset, prompt, &cwd, timeout);
    oneshot.session = SessionRequest {
        cwd,
        resume: request.resume.filter(|id| !id.trim().is_empty()),
    };
    oneshot.config = request.config.into_iter().collect();

    info!(preset = %preset.id, timeout_ms = timeout.as_millis(), "api prompt");
    match run_prompt(state.factory.as_ref(), oneshot).await {
        Ok(reply) => Ok(Json(reply).into_response()),
        Err(err) => {
            warn!(%err, preset = %preset.id, "api prompt failed");
            Err(ApiError::new(StatusCode::BAD_GATEWAY, err.to_string()))
        }
    }
}
