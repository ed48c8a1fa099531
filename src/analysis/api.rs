use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;

use super::channel::SessionHub;
use super::gateway::SessionGateway;
use crate::adapters::{AdapterProvider, ConfigStatus};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub hub: Arc<SessionHub>,
    pub gateway: SessionGateway,
    pub provider: Arc<dyn AdapterProvider>,
}

impl AppState {
    /// Wire a fresh session hub to a gateway that dispatches runs through
    /// `provider`.
    pub fn new(provider: Arc<dyn AdapterProvider>, default_repo: impl Into<String>) -> Self {
        let hub = Arc::new(SessionHub::new());
        let gateway = SessionGateway::new(hub.clone(), provider.clone(), default_repo);
        Self {
            hub,
            gateway,
            provider,
        }
    }
}

pub type SharedState = Arc<AppState>;

#[derive(Debug, Serialize)]
pub struct Defaults {
    pub default_repo: String,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/config/test", get(config_test))
        .route("/api/defaults", get(defaults))
        .route("/api/{*rest}", get(unknown_endpoint))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn config_test(State(state): State<SharedState>) -> Json<ConfigStatus> {
    Json(state.provider.config_status().await)
}

async fn defaults(State(state): State<SharedState>) -> Json<Defaults> {
    Json(Defaults {
        default_repo: state.gateway.default_repo().to_string(),
    })
}

/// Keeps mistyped API paths from falling through to the UI.
async fn unknown_endpoint(Path(rest): Path<String>) -> ApiError {
    ApiError::NotFound(format!("No such endpoint: /api/{}", rest))
}

// ── Tests ─────────────────────────────────────────────────────────────
