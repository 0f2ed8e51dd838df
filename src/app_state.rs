// =============================================================================
// Central Application State - Multtrade bridge
// =============================================================================
//
// Owns every long-lived component and hands them to the HTTP layer through
// `Arc<AppState>`:
//
//   RuntimeConfig  -> parking_lot::RwLock, edited by POST /api/config
//   PriceCache     -> shared by the fetcher, the feed and the handlers
//   FeedCoordinator + FeedControl -> the single streaming session
//   OrderDesk      -> order preparation and submission
//   OrderJournal   -> daily order-activity file
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::exchange::{HttpInfoClient, InfoClient, OrderGateway, SignerRelay};
use crate::journal::OrderJournal;
use crate::market_data::{
    spawn_supervisor, Broadcaster, FeedControl, FeedCoordinator, MarketDataFetcher, PriceCache,
};
use crate::market_data::feed::FeedStatus;
use crate::order::OrderDesk;
use crate::runtime_config::RuntimeConfig;

/// Source toggles as served by `GET /api/config`.
#[derive(Debug, Clone, Serialize)]
pub struct SourceConfig {
    pub price_source: &'static str,
    pub rest_enabled: bool,
    pub websocket_enabled: bool,
    pub websocket_running: bool,
}

/// Payload of `GET /api/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub backend_running: bool,
    pub relay_configured: bool,
    pub info_url: String,
    pub symbols: Vec<String>,
    pub feed: FeedStatus,
    pub uptime_secs: i64,
    pub started_at: DateTime<Utc>,
    pub issues: Vec<String>,
}

pub struct AppState {
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub config_path: PathBuf,

    pub price_cache: Arc<PriceCache>,
    pub fetcher: Arc<MarketDataFetcher>,
    pub feed: Arc<FeedCoordinator>,
    pub feed_control: FeedControl,

    pub order_desk: Arc<OrderDesk>,
    pub journal: Arc<OrderJournal>,

    pub start_time: DateTime<Utc>,
}

impl AppState {
    /// Build the state with the venue HTTP client and signing relay named in
    /// `config`. Must be called inside a Tokio runtime.
    pub fn new(config: RuntimeConfig, config_path: impl Into<PathBuf>) -> Result<Self> {
        let info: Arc<dyn InfoClient> = Arc::new(HttpInfoClient::new(config.info_url.clone())?);
        let gateway: Arc<dyn OrderGateway> =
            Arc::new(SignerRelay::new(config.order_relay_url.clone())?);
        Ok(Self::with_clients(config, config_path, info, gateway))
    }

    /// Build the state around the given collaborators.
    pub fn with_clients(
        config: RuntimeConfig,
        config_path: impl Into<PathBuf>,
        info: Arc<dyn InfoClient>,
        gateway: Arc<dyn OrderGateway>,
    ) -> Self {
        let price_cache = Arc::new(PriceCache::new(&config.symbols));
        let fetcher = Arc::new(MarketDataFetcher::new(
            price_cache.clone(),
            info.clone(),
            config.market.clone(),
        ));
        let feed = Arc::new(FeedCoordinator::new(
            config.ws_url.clone(),
            config.feed.clone(),
            price_cache.clone(),
            Arc::new(Broadcaster::new()),
        ));
        let feed_control = spawn_supervisor(feed.clone(), fetcher.clone());

        let journal = Arc::new(OrderJournal::new(&config.log_dir));
        let order_desk = Arc::new(OrderDesk::new(
            info,
            fetcher.clone(),
            gateway,
            journal.clone(),
            config.orders.clone(),
        ));

        Self {
            runtime_config: Arc::new(RwLock::new(config)),
            config_path: config_path.into(),
            price_cache,
            fetcher,
            feed,
            feed_control,
            order_desk,
            journal,
            start_time: Utc::now(),
        }
    }

    pub fn source_config(&self) -> SourceConfig {
        let config = self.runtime_config.read();
        SourceConfig {
            price_source: config.primary_source(),
            rest_enabled: config.rest_enabled,
            websocket_enabled: config.websocket_enabled,
            websocket_running: self.feed.is_running(),
        }
    }

    pub fn status(&self) -> StatusReport {
        let config = self.runtime_config.read();
        let relay_configured = self.order_desk.gateway().is_configured();
        let now = Utc::now();

        let mut issues = Vec::new();
        if !relay_configured {
            issues.push("ORDER_RELAY_URL is not set; orders will be refused".to_string());
        }
        if !config.rest_enabled && !config.websocket_enabled {
            issues.push("both price sources are disabled; REST is used as fallback".to_string());
        }

        StatusReport {
            backend_running: true,
            relay_configured,
            info_url: config.info_url.clone(),
            symbols: config.symbols.clone(),
            feed: self.feed.status(),
            uptime_secs: (now - self.start_time).num_seconds(),
            started_at: self.start_time,
            issues,
        }
    }

    /// Persist the current configuration. Failures are reported, not fatal.
    pub fn save_config(&self) -> Result<()> {
        let snapshot = self.runtime_config.read().clone();
        snapshot.save(&self.config_path)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config_path", &self.config_path)
            .field("price_cache", &self.price_cache)
            .field("feed", &self.feed)
            .field("order_desk", &self.order_desk)
            .finish()
    }
}
