//! Browser UI server command - `prlens serve`.

use std::sync::Arc;

use anyhow::Result;

use prlens::adapters::HttpAdapterProvider;
use prlens::analysis::api::AppState;
use prlens::analysis::server::{ServerConfig, start_server};
use prlens::config::AppConfig;

pub async fn cmd_serve(
    config: AppConfig,
    host: Option<String>,
    port: Option<u16>,
    open: bool,
    dev: bool,
) -> Result<()> {
    let server = ServerConfig {
        host: host.unwrap_or_else(|| config.server.host.clone()),
        port: port.unwrap_or(config.server.port),
        dev_mode: dev,
    };

    // Skip in dev mode (no browser inside containers)
    if open && !dev {
        let url = format!("http://localhost:{}", server.port);
        tokio::spawn(async move {
            // Small delay to let the server start binding
            tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
            if let Err(e) = open::that(&url) {
                tracing::warn!("Failed to open browser: {}", e);
            }
        });
    }

    let default_repo = config.azure_devops.default_repo.clone();
    let provider = Arc::new(HttpAdapterProvider::new(config));
    start_server(server, AppState::new(provider, default_repo)).await
}
