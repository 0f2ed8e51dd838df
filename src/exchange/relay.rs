// =============================================================================
// Order Relay - hands prepared orders to the external signing service
// =============================================================================
//
// Signing happens outside this process. The relay forwards the prepared wire
// body and reports the venue's answer verbatim:
//
//   POST {base}/leverage  { "coin", "leverage", "is_cross" }
//   POST {base}/order     { "coin", "is_buy", "sz", "limit_px", "order_type", "reduce_only" }
//
// A response carrying `"status": "err"` is treated as a failed submission.
// =============================================================================

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::order::PreparedOrder;

/// Order submission collaborator.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Set leverage for `symbol` before an order is placed.
    async fn update_leverage(&self, symbol: &str, leverage: u32, is_cross: bool) -> Result<Value>;

    /// Submit a prepared order. Returns the venue's raw response.
    async fn submit(&self, order: &PreparedOrder) -> Result<Value>;

    /// Whether submissions can be attempted at all.
    fn is_configured(&self) -> bool;
}

/// `OrderGateway` backed by an HTTP signing relay.
#[derive(Clone)]
pub struct SignerRelay {
    base_url: Option<String>,
    client: reqwest::Client,
}

impl SignerRelay {
    pub fn new(base_url: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build relay HTTP client")?;
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());
        debug!(configured = base_url.is_some(), "SignerRelay initialised");
        Ok(Self { base_url, client })
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let Some(base) = &self.base_url else {
            bail!("order relay is not configured (set ORDER_RELAY_URL)");
        };
        let url = format!("{base}{path}");

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {path} request failed"))?;

        let status = resp.status();
        let payload: Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))?;

        if !status.is_success() {
            bail!("relay {path} returned {status}: {payload}");
        }
        if payload.get("status").and_then(|s| s.as_str()) == Some("err") {
            bail!("venue rejected request: {}", payload["response"]);
        }
        Ok(payload)
    }
}

#[async_trait]
impl OrderGateway for SignerRelay {
    #[instrument(skip(self), name = "relay::update_leverage")]
    async fn update_leverage(&self, symbol: &str, leverage: u32, is_cross: bool) -> Result<Value> {
        self.post(
            "/leverage",
            json!({ "coin": symbol, "leverage": leverage, "is_cross": is_cross }),
        )
        .await
    }

    #[instrument(skip(self, order), fields(symbol = %order.symbol), name = "relay::submit")]
    async fn submit(&self, order: &PreparedOrder) -> Result<Value> {
        self.post("/order", order.to_wire()).await
    }

    fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }
}

impl std::fmt::Debug for SignerRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerRelay")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderKind, TimeInForce};

    #[tokio::test]
    async fn unconfigured_relay_refuses_submission() {
        let relay = SignerRelay::new(Some("  ".trim().to_string())).unwrap();
        assert!(!relay.is_configured());

        let order = PreparedOrder {
            symbol: "BTC".into(),
            is_buy: true,
            size: 0.001,
            price: 100_000.0,
            order_kind: OrderKind::Limit,
            tif: Some(TimeInForce::Gtc),
        };
        let err = relay.submit(&order).await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let relay = SignerRelay::new(Some("http://127.0.0.1:9000/".into())).unwrap();
        assert!(relay.is_configured());
        assert_eq!(relay.base_url.as_deref(), Some("http://127.0.0.1:9000"));
    }
}
