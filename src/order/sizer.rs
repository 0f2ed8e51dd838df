// =============================================================================
// Order Sizer - quantity resolution, precision and price-band validation
// =============================================================================
//
// `prepare` is pure: the caller gathers the reference price and instrument
// precision, this module turns an `OrderSpec` into the exact values that go
// on the wire.
//
// Pipeline:
//   1. Quantity   - notional / reference price when a positive notional is
//                   given (it wins over an explicit size), otherwise the size.
//   2. Price      - market orders carry the numeric sentinel 0; limit orders
//                   are tick-rounded and band-checked, or default to the
//                   reference price.
//   3. Finalise   - size rounded to the instrument's size decimals, then
//                   normalised through a fixed-precision decimal string.
// =============================================================================

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::ValidationError;
use crate::runtime_config::OrderParams;
use crate::types::{OrderKind, Side, TimeInForce};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// A validated order request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderSpec {
    pub symbol: String,
    pub side: Side,
    pub order_kind: OrderKind,
    pub notional_usd: Option<f64>,
    pub unit_size: Option<f64>,
    pub limit_price: Option<f64>,
    pub leverage: Option<f64>,
}

impl OrderSpec {
    /// Positive notional, which takes precedence over `unit_size`.
    pub fn notional(&self) -> Option<f64> {
        self.notional_usd.filter(|n| *n > 0.0)
    }

    /// Positive user-supplied limit price.
    pub fn given_price(&self) -> Option<f64> {
        self.limit_price.filter(|p| *p > 0.0)
    }

    /// Positive leverage, if any.
    pub fn leverage(&self) -> Option<f64> {
        self.leverage.filter(|l| *l > 0.0)
    }

    /// Whether preparing this order depends on the live reference price.
    pub fn needs_reference(&self) -> bool {
        match self.order_kind {
            OrderKind::Limit => true,
            OrderKind::Market => self.notional().is_some(),
        }
    }
}

/// Market state the sizer reads.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MarketContext {
    /// Live mid price. `None` when it could not be obtained.
    pub reference_price: Option<f64>,
    /// Instrument size precision. `None` when metadata was unavailable.
    pub size_decimals: Option<u32>,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Order ready for the submission collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreparedOrder {
    pub symbol: String,
    pub is_buy: bool,
    pub size: f64,
    /// Limit price, or `0.0` for market orders. Never absent.
    pub price: f64,
    pub order_kind: OrderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tif: Option<TimeInForce>,
}

impl PreparedOrder {
    /// Venue order-type object: `{"limit": {"tif": "Gtc"}}` or `{"market": {}}`.
    pub fn order_type_wire(&self) -> Value {
        match self.order_kind {
            OrderKind::Limit => json!({
                "limit": { "tif": self.tif.unwrap_or_default().to_string() }
            }),
            OrderKind::Market => json!({ "market": {} }),
        }
    }

    /// Request body handed to the signing relay.
    pub fn to_wire(&self) -> Value {
        json!({
            "coin": self.symbol,
            "is_buy": self.is_buy,
            "sz": self.size,
            "limit_px": self.price,
            "order_type": self.order_type_wire(),
            "reduce_only": false,
        })
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Size, price and validate `spec` against `market`.
pub fn prepare(
    spec: &OrderSpec,
    market: &MarketContext,
    rules: &OrderParams,
) -> Result<PreparedOrder, ValidationError> {
    let reference = market.reference_price.filter(|p| *p > 0.0);

    let raw_size = resolve_quantity(spec, reference)?;

    let price = match spec.order_kind {
        OrderKind::Market => 0.0,
        OrderKind::Limit => resolve_limit_price(spec, reference, rules)?,
    };

    let decimals = market.size_decimals.unwrap_or(rules.default_size_decimals);
    let size = finalize_size(raw_size, decimals, rules.wire_decimals);
    if size <= 0.0 {
        return Err(ValidationError::NonPositiveSize {
            size: raw_size,
            decimals,
        });
    }

    debug!(
        symbol = %spec.symbol,
        raw_size,
        size,
        decimals,
        price,
        "order prepared"
    );

    Ok(PreparedOrder {
        symbol: spec.symbol.clone(),
        is_buy: spec.side.is_buy(),
        size,
        price,
        order_kind: spec.order_kind,
        tif: match spec.order_kind {
            OrderKind::Limit => Some(TimeInForce::Gtc),
            OrderKind::Market => None,
        },
    })
}

/// Unrounded traded quantity.
fn resolve_quantity(spec: &OrderSpec, reference: Option<f64>) -> Result<f64, ValidationError> {
    match spec.notional() {
        Some(notional) => {
            let basis = match (spec.order_kind, spec.given_price()) {
                (OrderKind::Limit, Some(px)) => px,
                _ => reference
                    .ok_or_else(|| ValidationError::MissingReferencePrice(spec.symbol.clone()))?,
            };
            Ok(notional / basis)
        }
        None => spec
            .unit_size
            .filter(|s| *s > 0.0)
            .ok_or(ValidationError::MissingQuantity),
    }
}

fn resolve_limit_price(
    spec: &OrderSpec,
    reference: Option<f64>,
    rules: &OrderParams,
) -> Result<f64, ValidationError> {
    match spec.given_price() {
        Some(given) => {
            let price = round_to(given, rules.price_decimals);
            match reference {
                Some(reference) => check_band(price, reference, rules)?,
                None => warn!(
                    symbol = %spec.symbol,
                    price,
                    "no reference price, band check skipped"
                ),
            }
            Ok(price)
        }
        None => reference
            .map(|r| round_to(r, rules.price_decimals))
            .ok_or_else(|| ValidationError::MissingReferencePrice(spec.symbol.clone())),
    }
}

/// Reject limit prices outside `[min_ratio, max_ratio] * reference`.
pub fn check_band(price: f64, reference: f64, rules: &OrderParams) -> Result<(), ValidationError> {
    let min = reference * rules.band_min_ratio;
    let max = reference * rules.band_max_ratio;
    if price < min || price > max {
        return Err(ValidationError::PriceOutOfBand {
            reference,
            min,
            max,
            price,
        });
    }
    Ok(())
}

/// Round to `decimals` places, then re-quantise through a `wire_decimals`
/// decimal string so no binary representation noise reaches the venue.
pub fn finalize_size(size: f64, decimals: u32, wire_decimals: u32) -> f64 {
    let rounded = round_to(size, decimals);
    format!("{:.*}", wire_decimals as usize, rounded)
        .parse::<f64>()
        .unwrap_or(rounded)
}

pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

// =============================================================================
// Tests
// =============================================================================
