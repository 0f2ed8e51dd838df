// =============================================================================
// Venue Info Client - instrument metadata, mid prices and book snapshots
// =============================================================================
//
// All three calls are public `POST /info` requests distinguished by the
// `type` field of the body:
//
//   {"type": "meta"}                  -> { "universe": [{ "name", "szDecimals" }, ...] }
//   {"type": "allMids"}               -> { "BTC": "109950.5", ... }  (or a list)
//   {"type": "l2Book", "coin": "BTC"} -> { "coin", "levels": [[bids], [asks]], "time" }
//
// The fetcher talks to the `InfoClient` trait so tests can substitute a
// scripted collaborator.
// =============================================================================

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::error::MarketError;
use crate::market_data::book::parse_num;

// ---------------------------------------------------------------------------
// Collaborator types
// ---------------------------------------------------------------------------

/// One entry of the venue universe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentMeta {
    pub name: String,
    /// Maximum fractional digits accepted for trade size.
    pub size_decimals: u32,
    /// Position in the universe, which is also the position in a positional
    /// mid-price list.
    pub asset_index: usize,
}

/// Look up `symbol` in a universe listing.
pub fn find_instrument<'a>(universe: &'a [InstrumentMeta], symbol: &str) -> Option<&'a InstrumentMeta> {
    universe.iter().find(|m| m.name == symbol)
}

/// Reference mid prices as returned by the venue.
#[derive(Debug, Clone, PartialEq)]
pub enum MidPrices {
    /// Symbol -> price, in the order the venue listed them.
    Keyed(Vec<(String, Option<f64>)>),
    /// Prices indexed by universe position.
    Positional(Vec<Option<f64>>),
}

impl MidPrices {
    pub fn from_json(value: &Value) -> Result<Self, MarketError> {
        match value {
            Value::Object(map) => Ok(Self::Keyed(
                map.iter().map(|(k, v)| (k.clone(), parse_num(v))).collect(),
            )),
            Value::Array(items) => Ok(Self::Positional(items.iter().map(parse_num).collect())),
            other => Err(MarketError::InvalidData(format!(
                "unexpected mid price payload: {other}"
            ))),
        }
    }

    /// Resolve by symbol name first, then by universe position.
    pub fn resolve(&self, symbol: &str, asset_index: usize) -> Option<f64> {
        match self {
            Self::Keyed(pairs) => pairs
                .iter()
                .find(|(name, _)| name == symbol)
                .or_else(|| pairs.get(asset_index))
                .and_then(|(_, price)| *price),
            Self::Positional(prices) => prices.get(asset_index).copied().flatten(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Keyed(pairs) => pairs.len(),
            Self::Positional(prices) => prices.len(),
        }
    }
}

/// Read-only market data collaborator.
#[async_trait]
pub trait InfoClient: Send + Sync {
    /// Instrument universe with size precision and positions.
    async fn meta(&self) -> Result<Vec<InstrumentMeta>, MarketError>;

    /// Reference mid prices for every instrument.
    async fn all_mids(&self) -> Result<MidPrices, MarketError>;

    /// Raw order-book snapshot for one symbol, in whatever shape the venue
    /// returns.
    async fn l2_snapshot(&self, symbol: &str) -> Result<Value, MarketError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// `InfoClient` backed by the venue's public info endpoint.
#[derive(Clone)]
pub struct HttpInfoClient {
    info_url: String,
    client: reqwest::Client,
}

impl HttpInfoClient {
    pub fn new(info_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        let info_url = info_url.into();
        debug!(info_url = %info_url, "HttpInfoClient initialised");
        Ok(Self { info_url, client })
    }

    async fn post_info(&self, body: Value) -> Result<Value, MarketError> {
        let resp = self.client.post(&self.info_url).json(&body).send().await?;

        let status = resp.status();
        let payload: Value = resp.json().await?;

        if !status.is_success() {
            return Err(MarketError::TransientIo(format!(
                "POST /info {} returned {}: {}",
                body["type"], status, payload
            )));
        }
        Ok(payload)
    }
}

#[async_trait]
impl InfoClient for HttpInfoClient {
    #[instrument(skip(self), name = "info::meta")]
    async fn meta(&self) -> Result<Vec<InstrumentMeta>, MarketError> {
        let payload = self.post_info(json!({ "type": "meta" })).await?;
        let universe = parse_universe(&payload)?;
        debug!(count = universe.len(), "universe retrieved");
        Ok(universe)
    }

    #[instrument(skip(self), name = "info::all_mids")]
    async fn all_mids(&self) -> Result<MidPrices, MarketError> {
        let payload = self.post_info(json!({ "type": "allMids" })).await?;
        let mids = MidPrices::from_json(&payload)?;
        debug!(count = mids.len(), "mid prices retrieved");
        Ok(mids)
    }

    #[instrument(skip(self), name = "info::l2_snapshot")]
    async fn l2_snapshot(&self, symbol: &str) -> Result<Value, MarketError> {
        self.post_info(json!({ "type": "l2Book", "coin": symbol })).await
    }
}

impl std::fmt::Debug for HttpInfoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpInfoClient")
            .field("info_url", &self.info_url)
            .finish()
    }
}

/// Parse the `universe` array of a meta response.
pub fn parse_universe(payload: &Value) -> Result<Vec<InstrumentMeta>, MarketError> {
    let universe = payload
        .get("universe")
        .and_then(|u| u.as_array())
        .ok_or_else(|| MarketError::InvalidData("'universe' not found in meta response".into()))?;

    Ok(universe
        .iter()
        .enumerate()
        .filter_map(|(asset_index, asset)| {
            let name = asset.get("name")?.as_str()?.to_string();
            let size_decimals = asset
                .get("szDecimals")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32;
            Some(InstrumentMeta {
                name,
                size_decimals,
                asset_index,
            })
        })
        .collect())
}

// =============================================================================
// Tests
// =============================================================================
