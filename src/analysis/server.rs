use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    body::Body,
    extract::Request,
    http::{StatusCode, header},
    response::{Html, IntoResponse},
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState, SharedState};
use super::embedded::Assets;
use super::ws;

/// Configuration for the analysis server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5001,
            dev_mode: false,
        }
    }
}

/// Build the full application router with API, WebSocket, and UI serving.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .route("/ws", get(ws::ws_handler))
        .fallback(static_handler)
        .with_state(state)
}

/// Serve embedded static files or fall back to index.html for client routes.
async fn static_handler(req: Request<Body>) -> impl IntoResponse {
    let path = req.uri().path().trim_start_matches('/');

    if !path.is_empty()
        && let Some(content) = Assets::get(path)
    {
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        return (
            [(header::CONTENT_TYPE, mime.as_ref().to_string())],
            content.data.into_owned(),
        )
            .into_response();
    }

    match Assets::get("index.html") {
        Some(content) => Html(String::from_utf8_lossy(&content.data).to_string()).into_response(),
        None => (StatusCode::NOT_FOUND, "UI assets not found").into_response(),
    }
}

/// Bind and serve until Ctrl+C.
pub async fn start_server(config: ServerConfig, state: AppState) -> Result<()> {
    let mut app = build_router(Arc::new(state)).layer(TraceLayer::new_for_http());

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, dev_mode = config.dev_mode, "server listening");
    println!("PR analysis server running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without a signal handler the server simply runs until killed.
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AdapterProvider, Adapters, ConfigStatus};
    use async_trait::async_trait;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct Unconfigured;

    #[async_trait]
    impl AdapterProvider for Unconfigured {
        fn adapters(&self) -> anyhow::Result<Adapters> {
            anyhow::bail!("unconfigured")
        }

        async fn config_status(&self) -> ConfigStatus {
            ConfigStatus::default()
        }
    }

    fn test_router() -> Router {
        build_router(Arc::new(AppState::new(Arc::new(Unconfigured), "demo")))
    }

    async fn fetch(uri: &str) -> axum::response::Response {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        test_router().oneshot(req).await.unwrap()
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        assert_eq!(fetch("/health").await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_routes_mounted() {
        let resp = fetch("/api/defaults").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["default_repo"], "demo");
    }

    #[tokio::test]
    async fn test_static_handler_serves_index_html() {
        let resp = fetch("/").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&bytes).contains("<html"));
    }

    #[tokio::test]
    async fn test_static_asset_content_type() {
        let resp = fetch("/app.js").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.contains("javascript"));
    }

    #[tokio::test]
    async fn test_spa_fallback() {
        let resp = fetch("/some/client/route").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&bytes).contains("<html"));
    }

    #[tokio::test]
    async fn test_ws_route_requires_upgrade() {
        // A plain GET without upgrade headers is refused rather than served the UI.
        let resp = fetch("/ws").await;
        assert!(resp.status().is_client_error());
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 5001);
        assert!(!config.dev_mode);
    }
}
