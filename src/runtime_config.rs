// =============================================================================
// Runtime Configuration - persisted bridge settings with atomic save
// =============================================================================
//
// Every tunable of the bridge lives here: tracked symbols, venue endpoints,
// which price sources are enabled, feed pacing, cache freshness and the
// order-preparation rules.
//
// Persistence uses an atomic tmp + rename pattern. All fields carry
// `#[serde(default)]` so that adding new fields never breaks loading an older
// config file.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<String> {
    vec!["BTC".to_string(), "ETH".to_string(), "SOL".to_string()]
}

fn default_info_url() -> String {
    "https://api.hyperliquid-testnet.xyz/info".to_string()
}

fn default_ws_url() -> String {
    "wss://api.hyperliquid-testnet.xyz/ws".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
        "http://localhost:5174".to_string(),
        "https://multtrade.vercel.app".to_string(),
    ]
}

fn default_idle_timeout_secs() -> u64 {
    30
}

fn default_reconnect_backoff_secs() -> u64 {
    5
}

fn default_subscribe_pacing_ms() -> u64 {
    100
}

fn default_cache_max_age_ms() -> u64 {
    5000
}

fn default_synthetic_spread_pct() -> f64 {
    0.1
}

fn default_placeholder_prices() -> HashMap<String, f64> {
    HashMap::from([
        ("BTC".to_string(), 109_950.5),
        ("ETH".to_string(), 3_500.0),
        ("SOL".to_string(), 150.0),
    ])
}

fn default_placeholder_price() -> f64 {
    1000.0
}

fn default_size_decimals() -> u32 {
    5
}

fn default_price_decimals() -> u32 {
    2
}

fn default_wire_decimals() -> u32 {
    8
}

fn default_band_min_ratio() -> f64 {
    0.2
}

fn default_band_max_ratio() -> f64 {
    1.8
}

// =============================================================================
// FeedParams
// =============================================================================

/// Streaming feed pacing and recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedParams {
    /// Idle wait before a keepalive ping is sent.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Fixed delay before reconnecting after a connection-level error.
    #[serde(default = "default_reconnect_backoff_secs")]
    pub reconnect_backoff_secs: u64,

    /// Delay between consecutive subscribe requests.
    #[serde(default = "default_subscribe_pacing_ms")]
    pub subscribe_pacing_ms: u64,
}

impl FeedParams {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    pub fn subscribe_pacing(&self) -> Duration {
        Duration::from_millis(self.subscribe_pacing_ms)
    }
}

impl Default for FeedParams {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            reconnect_backoff_secs: default_reconnect_backoff_secs(),
            subscribe_pacing_ms: default_subscribe_pacing_ms(),
        }
    }
}

// =============================================================================
// MarketParams
// =============================================================================

/// Snapshot fetching, caching and degraded-mode pricing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketParams {
    /// Cache entries younger than this short-circuit a snapshot fetch.
    #[serde(default = "default_cache_max_age_ms")]
    pub cache_max_age_ms: u64,

    /// Half-width of the synthetic spread, in percent of mid, used when the
    /// book snapshot lacks a side.
    #[serde(default = "default_synthetic_spread_pct")]
    pub synthetic_spread_pct: f64,

    /// Per-symbol prices returned when the venue cannot be reached.
    #[serde(default = "default_placeholder_prices")]
    pub placeholder_prices: HashMap<String, f64>,

    /// Placeholder for symbols without an explicit entry.
    #[serde(default = "default_placeholder_price")]
    pub default_placeholder_price: f64,
}

impl MarketParams {
    pub fn cache_max_age(&self) -> Duration {
        Duration::from_millis(self.cache_max_age_ms)
    }

    pub fn placeholder_price(&self, symbol: &str) -> f64 {
        self.placeholder_prices
            .get(symbol)
            .copied()
            .unwrap_or(self.default_placeholder_price)
    }
}

impl Default for MarketParams {
    fn default() -> Self {
        Self {
            cache_max_age_ms: default_cache_max_age_ms(),
            synthetic_spread_pct: default_synthetic_spread_pct(),
            placeholder_prices: default_placeholder_prices(),
            default_placeholder_price: default_placeholder_price(),
        }
    }
}

// =============================================================================
// OrderParams
// =============================================================================

/// Order sizing and price validation rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderParams {
    /// Size precision when instrument metadata is unavailable.
    #[serde(default = "default_size_decimals")]
    pub default_size_decimals: u32,

    /// Limit-price tick precision.
    #[serde(default = "default_price_decimals")]
    pub price_decimals: u32,

    /// Decimal-string normalisation applied to sizes before they leave.
    #[serde(default = "default_wire_decimals")]
    pub wire_decimals: u32,

    /// Lowest accepted limit price as a fraction of the reference price.
    #[serde(default = "default_band_min_ratio")]
    pub band_min_ratio: f64,

    /// Highest accepted limit price as a fraction of the reference price.
    #[serde(default = "default_band_max_ratio")]
    pub band_max_ratio: f64,
}

impl Default for OrderParams {
    fn default() -> Self {
        Self {
            default_size_decimals: default_size_decimals(),
            price_decimals: default_price_decimals(),
            wire_decimals: default_wire_decimals(),
            band_min_ratio: default_band_min_ratio(),
            band_max_ratio: default_band_max_ratio(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Symbols & endpoints ------------------------------------------------

    /// Symbols with a price-cache entry and a feed subscription.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Venue info endpoint (meta, allMids, l2Book).
    #[serde(default = "default_info_url")]
    pub info_url: String,

    /// Venue streaming endpoint.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// External signing relay that submits orders. Orders are refused when
    /// unset.
    #[serde(default)]
    pub order_relay_url: Option<String>,

    /// HTTP listen address.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Origins accepted by the CORS layer.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Directory holding the order-activity journal.
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    // --- Price sources ------------------------------------------------------

    #[serde(default = "default_true")]
    pub rest_enabled: bool,

    /// Streaming feed toggle. When both sources are on, the stream is primary.
    #[serde(default)]
    pub websocket_enabled: bool,

    // --- Tunables -----------------------------------------------------------

    #[serde(default)]
    pub feed: FeedParams,

    #[serde(default)]
    pub market: MarketParams,

    #[serde(default)]
    pub orders: OrderParams,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            info_url: default_info_url(),
            ws_url: default_ws_url(),
            order_relay_url: None,
            bind_addr: default_bind_addr(),
            allowed_origins: default_allowed_origins(),
            log_dir: default_log_dir(),
            rest_enabled: true,
            websocket_enabled: false,
            feed: FeedParams::default(),
            market: MarketParams::default(),
            orders: OrderParams::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            websocket_enabled = config.websocket_enabled,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply environment overrides on top of the loaded file.
    pub fn apply_env(&mut self) {
        if let Ok(syms) = std::env::var("MULTTRADE_SYMBOLS") {
            let parsed = parse_symbol_list(&syms);
            if !parsed.is_empty() {
                self.symbols = parsed;
            }
        }
        if let Ok(addr) = std::env::var("MULTTRADE_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Ok(url) = std::env::var("MULTTRADE_INFO_URL") {
            self.info_url = url;
        }
        if let Ok(url) = std::env::var("MULTTRADE_WS_URL") {
            self.ws_url = url;
        }
        if let Ok(url) = std::env::var("ORDER_RELAY_URL") {
            let url = url.trim().to_string();
            self.order_relay_url = if url.is_empty() { None } else { Some(url) };
        }
        if let Ok(v) = std::env::var("WEBSOCKET_ENABLED") {
            self.websocket_enabled = parse_flag(&v);
        }
        if let Ok(v) = std::env::var("REST_ENABLED") {
            self.rest_enabled = parse_flag(&v);
        }
    }

    /// Primary price source label. The stream wins when both are enabled and
    /// REST is the fallback when both are off.
    pub fn primary_source(&self) -> &'static str {
        if self.websocket_enabled {
            "websocket"
        } else {
            "rest"
        }
    }
}

/// Split a comma-separated list into upper-cased, non-empty symbols.
pub fn parse_symbol_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.symbols, vec!["BTC", "ETH", "SOL"]);
        assert!(cfg.rest_enabled);
        assert!(!cfg.websocket_enabled);
        assert_eq!(cfg.primary_source(), "rest");
        assert_eq!(cfg.feed.idle_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.feed.reconnect_backoff(), Duration::from_secs(5));
        assert_eq!(cfg.feed.subscribe_pacing(), Duration::from_millis(100));
        assert_eq!(cfg.market.cache_max_age(), Duration::from_secs(5));
        assert_eq!(cfg.orders.default_size_decimals, 5);
        assert_eq!(cfg.orders.price_decimals, 2);
        assert!((cfg.orders.band_min_ratio - 0.2).abs() < f64::EPSILON);
        assert!((cfg.orders.band_max_ratio - 1.8).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.symbols.len(), 3);
        assert!(cfg.order_relay_url.is_none());
        assert_eq!(cfg.market.placeholder_price("BTC"), 109_950.5);
        assert_eq!(cfg.market.placeholder_price("DOGE"), 1000.0);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "websocket_enabled": true, "symbols": ["ETH"], "feed": { "idle_timeout_secs": 10 } }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert!(cfg.websocket_enabled);
        assert_eq!(cfg.primary_source(), "websocket");
        assert_eq!(cfg.symbols, vec!["ETH"]);
        assert_eq!(cfg.feed.idle_timeout_secs, 10);
        assert_eq!(cfg.feed.reconnect_backoff_secs, 5);
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = std::env::temp_dir().join(format!("multtrade-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runtime_config.json");

        let mut cfg = RuntimeConfig::default();
        cfg.websocket_enabled = true;
        cfg.order_relay_url = Some("http://127.0.0.1:9100".into());
        cfg.save(&path).unwrap();

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert!(loaded.websocket_enabled);
        assert_eq!(loaded.order_relay_url.as_deref(), Some("http://127.0.0.1:9100"));
        assert!(!path.with_extension("json.tmp").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn symbol_list_is_normalised() {
        assert_eq!(parse_symbol_list(" btc, eth ,,sol "), vec!["BTC", "ETH", "SOL"]);
        assert!(parse_symbol_list(" , ").is_empty());
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert!(parse_flag("True"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }
}
