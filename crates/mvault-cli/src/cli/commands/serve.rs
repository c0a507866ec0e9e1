//! `mvault serve` – run the HTTP/WebSocket server alongside the worker loop
//! and the downloader scheduler.

use anyhow::Result;
use mvault_core::config::VaultConfig;

use crate::server::{self, state::AppState};

pub async fn run_serve(mut cfg: VaultConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        cfg.host = host;
    }
    if let Some(port) = port {
        cfg.port = port;
    }

    let state = AppState::build(cfg).await?;
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    state.spawn_background_loops(shutdown_rx);

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "mvault server listening");

    let app = server::build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}
