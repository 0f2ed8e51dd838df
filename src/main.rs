// =============================================================================
// Multtrade Bridge - Main Entry Point
// =============================================================================
//
// Serves cached market data and order preparation for the trading front-end.
// REST snapshots are always available; the streaming trade feed starts only
// when `websocket_enabled` is set, and can be toggled at runtime through
// `POST /api/config`.
// =============================================================================

mod api;
mod app_state;
mod error;
mod exchange;
mod journal;
mod market_data;
mod order;
mod runtime_config;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::runtime_config::RuntimeConfig;

const CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Multtrade bridge starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env();

    info!(
        symbols = ?config.symbols,
        info_url = %config.info_url,
        ws_url = %config.ws_url,
        rest_enabled = config.rest_enabled,
        websocket_enabled = config.websocket_enabled,
        relay_configured = config.order_relay_url.is_some(),
        "Configuration resolved"
    );
    if config.order_relay_url.is_none() {
        warn!("ORDER_RELAY_URL not set; order submission is disabled");
    }

    let bind_addr = config.bind_addr.clone();

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::new(config, CONFIG_PATH)?);

    // ── 3. Streaming feed (optional at startup) ──────────────────────────
    let (websocket_enabled, symbols) = {
        let config = state.runtime_config.read();
        (config.websocket_enabled, config.symbols.clone())
    };
    if websocket_enabled {
        info!("WebSocket price feed enabled, starting with cache warm-up");
        state.feed_control.enable(symbols)?;
    }

    // ── 4. API server ────────────────────────────────────────────────────
    let app = api::rest::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, stopping gracefully");

    state.feed.stop();
    server.abort();

    if let Err(e) = state.save_config() {
        error!(error = %e, "Failed to save runtime config on shutdown");
    }

    info!("Multtrade bridge shut down complete.");
    Ok(())
}
