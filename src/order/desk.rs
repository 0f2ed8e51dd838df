// =============================================================================
// Order Desk - turns order requests into relay submissions
// =============================================================================
//
// Flow for `place`:
//   parse request -> instrument precision -> reference price
//     -> leverage (best effort) -> prepare -> submit -> journal
//
// Validation failures and unknown symbols are returned to the caller without
// touching the relay. Every request, successful or not, is journalled.
// =============================================================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use super::sizer::{prepare, MarketContext, OrderSpec, PreparedOrder};
use crate::error::{MarketError, OrderError, ValidationError};
use crate::exchange::info::{find_instrument, InfoClient};
use crate::exchange::relay::OrderGateway;
use crate::journal::OrderJournal;
use crate::market_data::MarketDataFetcher;
use crate::runtime_config::OrderParams;
use crate::types::{OrderKind, Side};

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// JSON body of `POST /api/order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    #[serde(default)]
    pub size: Option<f64>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub quantity_usd: Option<f64>,
    #[serde(default)]
    pub leverage: Option<f64>,
    #[serde(default)]
    pub takeprofit: Option<f64>,
    #[serde(default)]
    pub stoploss: Option<f64>,
}

impl OrderRequest {
    pub fn to_spec(&self) -> Result<OrderSpec, ValidationError> {
        let side: Side = self
            .side
            .parse()
            .map_err(|_| ValidationError::InvalidSide(self.side.clone()))?;
        let order_kind: OrderKind = self
            .order_type
            .parse()
            .map_err(|_| ValidationError::InvalidOrderKind(self.order_type.clone()))?;

        Ok(OrderSpec {
            symbol: self.symbol.trim().to_uppercase(),
            side,
            order_kind,
            notional_usd: self.quantity_usd,
            unit_size: self.size,
            limit_price: self.price,
            leverage: self.leverage,
        })
    }
}

/// Echo of what was sent, alongside the venue result.
#[derive(Debug, Clone, Serialize)]
pub struct OrderEcho {
    pub symbol: String,
    pub side: String,
    pub size: f64,
    pub price: f64,
    pub order_type: String,
    pub leverage: Option<f64>,
    pub takeprofit: Option<f64>,
    pub stoploss: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderReceipt {
    pub success: bool,
    pub result: Value,
    pub order: OrderEcho,
}

// ---------------------------------------------------------------------------
// Desk
// ---------------------------------------------------------------------------

pub struct OrderDesk {
    info: Arc<dyn InfoClient>,
    fetcher: Arc<MarketDataFetcher>,
    gateway: Arc<dyn OrderGateway>,
    journal: Arc<OrderJournal>,
    rules: OrderParams,
}

impl OrderDesk {
    pub fn new(
        info: Arc<dyn InfoClient>,
        fetcher: Arc<MarketDataFetcher>,
        gateway: Arc<dyn OrderGateway>,
        journal: Arc<OrderJournal>,
        rules: OrderParams,
    ) -> Self {
        Self {
            info,
            fetcher,
            gateway,
            journal,
            rules,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn OrderGateway> {
        &self.gateway
    }

    /// Validate, size and submit `req`, journalling the outcome.
    pub async fn place(&self, req: OrderRequest) -> Result<OrderReceipt, OrderError> {
        info!(
            symbol = %req.symbol,
            side = %req.side,
            order_type = %req.order_type,
            size = ?req.size,
            price = ?req.price,
            quantity_usd = ?req.quantity_usd,
            leverage = ?req.leverage,
            "order request received"
        );

        let outcome = self.execute(&req).await;

        let order_data = serde_json::to_value(&req).unwrap_or(Value::Null);
        let entry: Result<Value, String> = match &outcome {
            Ok(receipt) => Ok(serde_json::to_value(receipt).unwrap_or(Value::Null)),
            Err(e) => {
                error!(symbol = %req.symbol, error = %e, "order request failed");
                Err(e.to_string())
            }
        };

        // File I/O runs on the blocking pool.
        let journal = self.journal.clone();
        let journalled = tokio::task::spawn_blocking(move || {
            journal.record(&order_data, entry.as_ref().map_err(String::as_str))
        })
        .await
        .map_err(anyhow::Error::from)
        .and_then(|written| written);
        if let Err(e) = journalled {
            warn!(error = %e, "failed to journal order request");
        }

        outcome
    }

    async fn execute(&self, req: &OrderRequest) -> Result<OrderReceipt, OrderError> {
        let spec = req.to_spec()?;

        if !self.gateway.is_configured() {
            return Err(OrderError::Submission(
                "order relay is not configured (set ORDER_RELAY_URL)".to_string(),
            ));
        }

        let size_decimals = self.size_decimals(&spec.symbol).await?;
        let reference_price = if spec.needs_reference() {
            self.reference_price(&spec.symbol).await?
        } else {
            None
        };

        if let Some(leverage) = spec.leverage() {
            let leverage = leverage.round().max(1.0) as u32;
            match self.gateway.update_leverage(&spec.symbol, leverage, false).await {
                Ok(_) => info!(symbol = %spec.symbol, leverage, "leverage updated"),
                Err(e) => warn!(symbol = %spec.symbol, leverage, error = %e, "could not set leverage"),
            }
        }

        let market = MarketContext {
            reference_price,
            size_decimals,
        };
        let prepared = prepare(&spec, &market, &self.rules)?;

        info!(
            symbol = %prepared.symbol,
            is_buy = prepared.is_buy,
            size = prepared.size,
            price = prepared.price,
            order_kind = %prepared.order_kind,
            "submitting order"
        );

        let result = self
            .gateway
            .submit(&prepared)
            .await
            .map_err(|e| OrderError::Submission(e.to_string()))?;

        info!(symbol = %prepared.symbol, result = %result, "order accepted by relay");
        Ok(self.receipt(req, &prepared, result))
    }

    /// Size precision from the venue universe. A missing symbol is an error;
    /// an unreachable venue falls back to the default precision.
    async fn size_decimals(&self, symbol: &str) -> Result<Option<u32>, OrderError> {
        match self.info.meta().await {
            Ok(universe) => find_instrument(&universe, symbol)
                .map(|m| Some(m.size_decimals))
                .ok_or_else(|| OrderError::NotFound(MarketError::NotFound(symbol.to_string()))),
            Err(e) => {
                warn!(
                    symbol,
                    error = %e,
                    default = self.rules.default_size_decimals,
                    "instrument metadata unavailable, using default size precision"
                );
                Ok(None)
            }
        }
    }

    async fn reference_price(&self, symbol: &str) -> Result<Option<f64>, OrderError> {
        match self.fetcher.try_fetch(symbol).await {
            Ok(snapshot) => Ok(Some(snapshot.mid_price)),
            Err(e @ MarketError::NotFound(_)) => Err(OrderError::NotFound(e)),
            Err(e) => {
                warn!(symbol, error = %e, "reference price unavailable");
                Ok(None)
            }
        }
    }

    fn receipt(&self, req: &OrderRequest, prepared: &PreparedOrder, result: Value) -> OrderReceipt {
        OrderReceipt {
            success: true,
            result,
            order: OrderEcho {
                symbol: prepared.symbol.clone(),
                side: req.side.clone(),
                size: prepared.size,
                price: prepared.price,
                order_type: req.order_type.clone(),
                leverage: req.leverage,
                takeprofit: req.takeprofit,
                stoploss: req.stoploss,
            },
        }
    }
}

impl std::fmt::Debug for OrderDesk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderDesk")
            .field("relay_configured", &self.gateway.is_configured())
            .field("journal", &self.journal)
            .field("rules", &self.rules)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::exchange::info::{InstrumentMeta, MidPrices};
    use crate::market_data::PriceCache;
    use crate::runtime_config::MarketParams;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    pub(crate) struct StaticInfo {
        pub mids: Vec<(String, Option<f64>)>,
        pub fail_meta: bool,
    }

    #[async_trait]
    impl InfoClient for StaticInfo {
        async fn meta(&self) -> Result<Vec<InstrumentMeta>, MarketError> {
            if self.fail_meta {
                return Err(MarketError::TransientIo("meta down".into()));
            }
            Ok(vec![
                InstrumentMeta { name: "BTC".into(), size_decimals: 5, asset_index: 0 },
                InstrumentMeta { name: "ETH".into(), size_decimals: 4, asset_index: 1 },
            ])
        }

        async fn all_mids(&self) -> Result<MidPrices, MarketError> {
            Ok(MidPrices::Keyed(self.mids.clone()))
        }

        async fn l2_snapshot(&self, _symbol: &str) -> Result<Value, MarketError> {
            Ok(json!({ "levels": [] }))
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingGateway {
        pub submitted: Mutex<Vec<PreparedOrder>>,
        pub leverage: Mutex<Vec<(String, u32)>>,
        pub fail_leverage: bool,
        pub unconfigured: bool,
    }

    #[async_trait]
    impl OrderGateway for RecordingGateway {
        async fn update_leverage(&self, symbol: &str, leverage: u32, _is_cross: bool) -> anyhow::Result<Value> {
            if self.fail_leverage {
                anyhow::bail!("leverage rejected");
            }
            self.leverage.lock().push((symbol.to_string(), leverage));
            Ok(json!({ "status": "ok" }))
        }

        async fn submit(&self, order: &PreparedOrder) -> anyhow::Result<Value> {
            self.submitted.lock().push(order.clone());
            Ok(json!({ "status": "ok", "response": { "type": "order" } }))
        }

        fn is_configured(&self) -> bool {
            !self.unconfigured
        }
    }

    pub(crate) fn desk_with(info: StaticInfo, gateway: Arc<RecordingGateway>) -> OrderDesk {
        let info: Arc<dyn InfoClient> = Arc::new(info);
        let cache = Arc::new(PriceCache::new(&["BTC".to_string(), "ETH".to_string()]));
        let fetcher = Arc::new(MarketDataFetcher::new(cache, info.clone(), MarketParams::default()));
        let journal = Arc::new(OrderJournal::new(
            std::env::temp_dir().join(format!("desk-{}", uuid::Uuid::new_v4())),
        ));
        OrderDesk::new(info, fetcher, gateway, journal, OrderParams::default())
    }

    fn btc_info() -> StaticInfo {
        StaticInfo {
            mids: vec![("BTC".into(), Some(100_000.0)), ("ETH".into(), Some(3_500.0))],
            fail_meta: false,
        }
    }

    fn request(side: &str, order_type: &str) -> OrderRequest {
        OrderRequest {
            symbol: "btc".into(),
            side: side.into(),
            order_type: order_type.into(),
            size: None,
            price: None,
            quantity_usd: None,
            leverage: None,
            takeprofit: None,
            stoploss: None,
        }
    }

    #[tokio::test]
    async fn notional_market_order_is_sized_and_submitted() {
        let gateway = Arc::new(RecordingGateway::default());
        let desk = desk_with(btc_info(), gateway.clone());

        let mut req = request("buy", "market");
        req.quantity_usd = Some(15.0);
        req.leverage = Some(3.0);
        req.takeprofit = Some(110_000.0);

        let receipt = desk.place(req).await.unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.order.size, 0.00015);
        assert_eq!(receipt.order.price, 0.0);
        assert_eq!(receipt.order.takeprofit, Some(110_000.0));

        let submitted = gateway.submitted.lock();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].symbol, "BTC");
        assert!(submitted[0].is_buy);
        assert_eq!(gateway.leverage.lock().as_slice(), &[("BTC".to_string(), 3)]);

        let tail = desk.journal.read_recent(100).unwrap();
        assert!(tail.logs.contains("Result:"));
    }

    #[tokio::test]
    async fn band_violation_is_rejected_before_submission() {
        let gateway = Arc::new(RecordingGateway::default());
        let desk = desk_with(btc_info(), gateway.clone());

        let mut req = request("sell", "limit");
        req.size = Some(0.01);
        req.price = Some(10.0);

        let err = desk.place(req).await.unwrap_err();
        assert!(matches!(
            err,
            OrderError::Validation(ValidationError::PriceOutOfBand { .. })
        ));
        assert!(gateway.submitted.lock().is_empty());

        let tail = desk.journal.read_recent(100).unwrap();
        assert!(tail.logs.contains("ERROR: Order price is outside the allowed band"));
    }

    #[tokio::test]
    async fn unknown_symbol_is_not_found() {
        let gateway = Arc::new(RecordingGateway::default());
        let desk = desk_with(btc_info(), gateway.clone());

        let mut req = request("buy", "market");
        req.symbol = "DOGE".into();
        req.size = Some(1.0);

        let err = desk.place(req).await.unwrap_err();
        assert!(matches!(err, OrderError::NotFound(MarketError::NotFound(_))));
        assert!(gateway.submitted.lock().is_empty());
    }

    #[tokio::test]
    async fn bad_side_and_order_type_are_validation_errors() {
        let desk = desk_with(btc_info(), Arc::new(RecordingGateway::default()));

        let err = desk.place(request("hold", "market")).await.unwrap_err();
        assert!(matches!(err, OrderError::Validation(ValidationError::InvalidSide(_))));

        let err = desk.place(request("buy", "stop")).await.unwrap_err();
        assert!(matches!(err, OrderError::Validation(ValidationError::InvalidOrderKind(_))));
    }

    #[tokio::test]
    async fn leverage_failure_does_not_block_the_order() {
        let gateway = Arc::new(RecordingGateway {
            fail_leverage: true,
            ..RecordingGateway::default()
        });
        let desk = desk_with(btc_info(), gateway.clone());

        let mut req = request("buy", "limit");
        req.size = Some(0.5);
        req.price = Some(99_000.123);
        req.leverage = Some(10.0);

        let receipt = desk.place(req).await.unwrap();
        assert_eq!(receipt.order.price, 99_000.12);
        assert_eq!(gateway.submitted.lock().len(), 1);
    }

    #[tokio::test]
    async fn metadata_outage_uses_default_precision() {
        let gateway = Arc::new(RecordingGateway::default());
        let info = StaticInfo { fail_meta: true, ..btc_info() };
        let desk = desk_with(info, gateway.clone());

        let mut req = request("buy", "market");
        req.size = Some(0.123_456_789);

        let receipt = desk.place(req).await.unwrap();
        assert_eq!(receipt.order.size, 0.12346);
    }

    #[tokio::test]
    async fn unconfigured_relay_is_a_submission_error() {
        let gateway = Arc::new(RecordingGateway {
            unconfigured: true,
            ..RecordingGateway::default()
        });
        let desk = desk_with(btc_info(), gateway);

        let mut req = request("buy", "market");
        req.size = Some(1.0);
        assert!(matches!(desk.place(req).await, Err(OrderError::Submission(_))));
    }
}
