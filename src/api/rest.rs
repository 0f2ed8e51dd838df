// =============================================================================
// REST API Endpoints - Axum 0.7
// =============================================================================
//
//   GET  /                          banner
//   GET  /api/health                liveness
//   GET  /api/status                relay, feed and uptime summary
//   GET  /api/config                price-source toggles
//   POST /api/config                toggle sources, start / stop the feed
//   GET  /api/cache/prices          every cached entry
//   GET  /api/cache/prices/:symbol  one cached entry
//   GET  /api/market/:symbol        fresh or cached market snapshot
//   POST /api/order                 prepare and submit an order
//   GET  /api/logs?limit=N          tail of today's order journal
//   GET  /ws/price                  push-only price updates
//
// CORS origins come from the runtime config.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info, warn};

use crate::app_state::AppState;
use crate::error::OrderError;
use crate::order::OrderRequest;

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let origins = state.runtime_config.read().allowed_origins.clone();

    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/config", get(get_config).post(update_config))
        .route("/api/cache/prices", get(cached_prices))
        .route("/api/cache/prices/:symbol", get(cached_price))
        .route("/api/market/:symbol", get(market))
        .route("/api/order", axum::routing::post(create_order))
        .route("/api/logs", get(logs))
        .route("/ws/price", get(crate::api::ws::price_ws_handler))
        .layer(cors_layer(&origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(origin = %o, error = %e, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let allow_origin = if parsed.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

// =============================================================================
// Error mapping
// =============================================================================

impl IntoResponse for OrderError {
    fn into_response(self) -> Response {
        let status = match &self {
            OrderError::Validation(_) => StatusCode::BAD_REQUEST,
            OrderError::NotFound(_) => StatusCode::NOT_FOUND,
            OrderError::Submission(_) => StatusCode::BAD_GATEWAY,
        };
        let body = json!({ "success": false, "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Health & status
// =============================================================================

async fn root() -> impl IntoResponse {
    Json(json!({ "message": "Multtrade market data bridge" }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    server_time: i64,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.status())
}

// =============================================================================
// Price-source config
// =============================================================================

async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sources = state.source_config();
    Json(json!({
        "price_source": sources.price_source,
        "rest_enabled": sources.rest_enabled,
        "websocket_enabled": sources.websocket_enabled,
        "websocket_running": sources.websocket_running,
        "websocket_prices": state.price_cache.snapshot(),
    }))
}

#[derive(Debug, Deserialize)]
struct ConfigUpdate {
    #[serde(default)]
    rest_enabled: Option<bool>,
    #[serde(default)]
    websocket_enabled: Option<bool>,
}

async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(update): Json<ConfigUpdate>,
) -> Response {
    let (symbols, rest_enabled, websocket_enabled, price_source) = {
        let mut config = state.runtime_config.write();
        if let Some(v) = update.rest_enabled {
            config.rest_enabled = v;
        }
        if let Some(v) = update.websocket_enabled {
            config.websocket_enabled = v;
        }
        (
            config.symbols.clone(),
            config.rest_enabled,
            config.websocket_enabled,
            config.primary_source(),
        )
    };

    // Commands are applied in order by the supervisor; start and stop are
    // both no-ops when already in the requested state.
    let toggled = if websocket_enabled {
        state.feed_control.enable(symbols)
    } else {
        state.feed_control.disable()
    };
    if let Err(e) = toggled {
        error!(error = %e, "failed to toggle price feed");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": e.to_string() })),
        )
            .into_response();
    }

    if let Err(e) = state.save_config() {
        warn!(error = %e, "failed to persist runtime config");
    }

    info!(rest_enabled, websocket_enabled, price_source, "price sources updated");
    Json(json!({
        "success": true,
        "price_source": price_source,
        "rest_enabled": rest_enabled,
        "websocket_enabled": websocket_enabled,
        "message": format!("Config updated: REST={rest_enabled}, WebSocket={websocket_enabled}"),
    }))
    .into_response()
}

// =============================================================================
// Cache & market data
// =============================================================================

async fn cached_prices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "success": true,
        "cache": state.price_cache.snapshot(),
        "timestamp": chrono::Utc::now(),
    }))
}

async fn cached_price(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Response {
    let symbol = symbol.trim().to_uppercase();
    match state.price_cache.get(&symbol) {
        Some(entry) => Json(json!({
            "success": true,
            "symbol": symbol,
            "data": entry,
            "timestamp": chrono::Utc::now(),
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "error": format!("Symbol {symbol} not found in cache"),
                "symbol": symbol,
            })),
        )
            .into_response(),
    }
}

async fn market(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    Json(state.fetcher.fetch(&symbol).await)
}

// =============================================================================
// Orders & journal
// =============================================================================

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OrderRequest>,
) -> Result<impl IntoResponse, OrderError> {
    let receipt = state.order_desk.place(req).await?;
    Ok(Json(receipt))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    #[serde(default = "default_log_limit")]
    limit: usize,
}

fn default_log_limit() -> usize {
    50
}

async fn logs(State(state): State<Arc<AppState>>, Query(query): Query<LogsQuery>) -> Response {
    match state.journal.read_recent(query.limit) {
        Ok(tail) => Json(tail).into_response(),
        Err(e) => {
            error!(error = %e, "failed to read order journal");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string(), "logs": [] })),
            )
                .into_response()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
