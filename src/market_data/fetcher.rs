// =============================================================================
// Market Data Fetcher - on-demand REST snapshots feeding the price cache
// =============================================================================
//
// `fetch(symbol)` pipeline:
//   1. Fresh cache hit (younger than `cache_max_age`, mid present) -> return it.
//   2. Instrument lookup in the venue universe          (NotFound)
//   3. Reference mid, by name then by universe position (InvalidData)
//   4. Book snapshot -> best bid / ask. Failure here is logged, not fatal.
//   5. Missing book sides are synthesised around mid.
//   6. Cache write with source = rest.
//
// Any error from steps 2-3 degrades to a placeholder snapshot that carries
// `warning` and `error`, so `fetch` never fails. `try_fetch` exposes the
// same pipeline without the fallback.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::book::{BookSnapshot, TopOfBook};
use super::price_cache::{PriceCache, PriceEntry};
use crate::error::MarketError;
use crate::exchange::info::{find_instrument, InfoClient};
use crate::runtime_config::MarketParams;
use crate::types::PriceSource;

// ---------------------------------------------------------------------------
// MarketSnapshot
// ---------------------------------------------------------------------------

/// Market data for one symbol as served by `/api/market/:symbol`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub asset_index: Option<usize>,
    pub mid_price: f64,
    pub bid_price: Option<f64>,
    pub ask_price: Option<f64>,
    pub spread: Option<f64>,
    pub spread_percent: Option<f64>,
    pub calculated_mid: Option<f64>,
    pub source: Option<PriceSource>,
    pub cached: bool,
    pub last_update: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MarketSnapshot {
    fn from_entry(symbol: &str, asset_index: Option<usize>, entry: &PriceEntry, mid: f64, cached: bool) -> Self {
        let calculated_mid = match (entry.bid_price(), entry.ask_price()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => Some(mid),
        };
        Self {
            symbol: symbol.to_string(),
            asset_index,
            mid_price: mid,
            bid_price: entry.bid_price(),
            ask_price: entry.ask_price(),
            spread: entry.spread(),
            spread_percent: entry.spread_percent(),
            calculated_mid,
            source: entry.source(),
            cached,
            last_update: entry.last_update(),
            warning: None,
            error: None,
        }
    }

    /// Degraded snapshot used when the venue could not be queried.
    fn placeholder(symbol: &str, price: f64, err: &MarketError) -> Self {
        Self {
            symbol: symbol.to_string(),
            asset_index: None,
            mid_price: price,
            bid_price: None,
            ask_price: None,
            spread: None,
            spread_percent: None,
            calculated_mid: None,
            source: None,
            cached: false,
            last_update: None,
            warning: Some(format!("Error getting real-time data: {err} - using placeholder data")),
            error: Some(err.to_string()),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.error.is_some()
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

pub struct MarketDataFetcher {
    cache: Arc<PriceCache>,
    info: Arc<dyn InfoClient>,
    params: MarketParams,
}

impl MarketDataFetcher {
    pub fn new(cache: Arc<PriceCache>, info: Arc<dyn InfoClient>, params: MarketParams) -> Self {
        Self { cache, info, params }
    }

    #[cfg(test)]
    pub fn cache(&self) -> &Arc<PriceCache> {
        &self.cache
    }

    /// Snapshot for `symbol`. Never fails; venue errors yield placeholder data.
    pub async fn fetch(&self, symbol: &str) -> MarketSnapshot {
        let symbol = symbol.trim().to_uppercase();
        match self.try_fetch(&symbol).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let price = self.params.placeholder_price(&symbol);
                warn!(symbol = %symbol, error = %e, placeholder = price, "market fetch failed, serving placeholder");
                MarketSnapshot::placeholder(&symbol, price, &e)
            }
        }
    }

    /// Snapshot pipeline without the placeholder fallback.
    pub async fn try_fetch(&self, symbol: &str) -> Result<MarketSnapshot, MarketError> {
        if let Some(entry) = self.cache.get(symbol) {
            if let Some(mid) = entry.mid_price() {
                if self.cache.is_fresh(symbol, self.params.cache_max_age()) {
                    debug!(symbol, mid, "serving fresh cached price");
                    return Ok(MarketSnapshot::from_entry(symbol, None, &entry, mid, true));
                }
            }
        }

        let universe = self.info.meta().await?;
        let asset_index = find_instrument(&universe, symbol)
            .map(|m| m.asset_index)
            .ok_or_else(|| MarketError::NotFound(symbol.to_string()))?;

        let mids = self.info.all_mids().await?;
        let mid = match mids.resolve(symbol, asset_index) {
            Some(p) if p > 0.0 => p,
            Some(p) => {
                return Err(MarketError::InvalidData(format!(
                    "non-positive mid price {p} for {symbol}"
                )))
            }
            None => {
                return Err(MarketError::InvalidData(format!(
                    "no mid price for {symbol} (asset index {asset_index})"
                )))
            }
        };

        let top = self.top_of_book(symbol, mid).await;
        let (bid, ask) = self.fill_missing_sides(top, mid);

        let now = Utc::now();
        let entry = PriceEntry::from_rest(mid, Some(bid), Some(ask), now);
        self.cache.put(symbol, entry.clone());

        info!(symbol, asset_index, mid, bid, ask, "market snapshot refreshed");
        Ok(MarketSnapshot::from_entry(symbol, Some(asset_index), &entry, mid, false))
    }

    /// Refresh every symbol through REST, seeding bid / ask before the
    /// stream takes over mid-price updates.
    pub async fn warm(&self, symbols: &[String]) {
        for symbol in symbols {
            let snapshot = self.fetch(symbol).await;
            if snapshot.is_placeholder() {
                warn!(symbol = %symbol, "cache warm-up fell back to placeholder");
            } else {
                info!(symbol = %symbol, mid = snapshot.mid_price, "cache warmed");
            }
        }
    }

    async fn top_of_book(&self, symbol: &str, mid: f64) -> TopOfBook {
        match self.info.l2_snapshot(symbol).await {
            Ok(payload) => match BookSnapshot::from_json(&payload) {
                Some(book) => book.top_of_book(mid),
                None => {
                    warn!(symbol, "unrecognised book snapshot shape");
                    TopOfBook::default()
                }
            },
            Err(e) => {
                warn!(symbol, error = %e, "book snapshot unavailable");
                TopOfBook::default()
            }
        }
    }

    /// Synthesise only the side the book did not provide.
    fn fill_missing_sides(&self, top: TopOfBook, mid: f64) -> (f64, f64) {
        let half = self.params.synthetic_spread_pct / 100.0;
        if top.bid.is_none() || top.ask.is_none() {
            debug!(bid = ?top.bid, ask = ?top.ask, "synthesising missing book side");
        }
        (
            top.bid.unwrap_or(mid * (1.0 - half)),
            top.ask.unwrap_or(mid * (1.0 + half)),
        )
    }
}

impl std::fmt::Debug for MarketDataFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketDataFetcher")
            .field("cache", &self.cache)
            .field("params", &self.params)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
