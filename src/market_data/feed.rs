// =============================================================================
// Feed Coordinator - streaming trade subscription merged into the price cache
// =============================================================================
//
// State machine:
//
//   Stopped -> Connecting -> Subscribed <-> Reconnecting
//      ^                                          |
//      +------------------- stop() ---------------+
//
// One WebSocket session carries a `trades` subscription per tracked symbol.
// Each accepted trade moves the cached mid price (bid / ask / spread are left
// to the REST fetcher) and is pushed to `/ws/price` subscribers.
//
// `start` spawns the session task with a fresh generation number; `stop`
// bumps the generation so a superseded task exits at its next check even if
// a new one has already been started.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::book::parse_num;
use super::broadcast::{Broadcaster, PriceUpdate};
use super::fetcher::MarketDataFetcher;
use super::price_cache::PriceCache;
use crate::runtime_config::FeedParams;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedState {
    Stopped,
    Connecting,
    Subscribed,
    Reconnecting,
}

impl std::fmt::Display for FeedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Feed summary for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct FeedStatus {
    pub state: FeedState,
    pub running: bool,
    pub symbols: Vec<String>,
    pub trades_applied: u64,
    pub subscribers: usize,
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// A single trade print from the `trades` channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub coin: String,
    pub px: f64,
}

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Keepalive or handshake noise: `-1`, `1`, `ping`, `pong`, `{"channel":"pong"}`.
    Control,
    /// Not JSON.
    Malformed,
    /// Venue-reported error payload.
    Error(String),
    Trades(Vec<Trade>),
    /// Valid JSON on some other channel (subscription acks and the like).
    Other,
}

pub fn subscribe_message(symbol: &str) -> Value {
    json!({
        "method": "subscribe",
        "subscription": { "type": "trades", "coin": symbol }
    })
}

pub fn ping_message() -> Value {
    json!({ "method": "ping" })
}

/// Classify a text frame from the venue stream.
pub fn parse_frame(text: &str) -> Frame {
    let trimmed = text.trim();
    if matches!(trimmed, "-1" | "1" | "ping" | "pong") {
        return Frame::Control;
    }

    let root: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(_) => return Frame::Malformed,
    };

    if let Some(err) = root.get("error") {
        return Frame::Error(err.to_string());
    }

    match root.get("channel").and_then(|c| c.as_str()) {
        Some("trades") => {
            let trades = root
                .get("data")
                .and_then(|d| d.as_array())
                .map(|items| items.iter().filter_map(parse_trade).collect())
                .unwrap_or_default();
            Frame::Trades(trades)
        }
        Some("pong") => Frame::Control,
        _ => Frame::Other,
    }
}

fn parse_trade(item: &Value) -> Option<Trade> {
    let coin = item.get("coin")?.as_str()?.trim().to_uppercase();
    let px = item.get("px").and_then(parse_num)?;
    Some(Trade { coin, px })
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct FeedCoordinator {
    ws_url: String,
    params: FeedParams,
    cache: Arc<PriceCache>,
    broadcaster: Arc<Broadcaster>,
    state: RwLock<FeedState>,
    symbols: RwLock<Vec<String>>,
    running: AtomicBool,
    generation: AtomicU64,
    trades_applied: AtomicU64,
}

impl FeedCoordinator {
    pub fn new(
        ws_url: impl Into<String>,
        params: FeedParams,
        cache: Arc<PriceCache>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            ws_url: ws_url.into(),
            params,
            cache,
            broadcaster,
            state: RwLock::new(FeedState::Stopped),
            symbols: RwLock::new(Vec::new()),
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            trades_applied: AtomicU64::new(0),
        }
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn state(&self) -> FeedState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> FeedStatus {
        FeedStatus {
            state: self.state(),
            running: self.is_running(),
            symbols: self.symbols.read().clone(),
            trades_applied: self.trades_applied.load(Ordering::Relaxed),
            subscribers: self.broadcaster.len(),
        }
    }

    /// Spawn the session task. Returns `false` when a session is already
    /// running, in which case nothing changes.
    pub fn start(self: &Arc<Self>, symbols: Vec<String>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("feed already running, start ignored");
            return false;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.symbols.write() = symbols.clone();
        *self.state.write() = FeedState::Connecting;

        info!(generation, symbols = ?symbols, "starting price feed");
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(generation, symbols).await });
        true
    }

    /// Request the session to stop. Safe to call repeatedly.
    pub fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.state.write() = FeedState::Stopped;
        if was_running {
            info!("price feed stop requested");
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    /// Transition only if `generation` still owns the feed.
    fn set_state(&self, generation: u64, next: FeedState) {
        let mut state = self.state.write();
        if self.is_current(generation) {
            *state = next;
        }
    }

    async fn run(self: Arc<Self>, generation: u64, symbols: Vec<String>) {
        while self.is_current(generation) {
            self.set_state(generation, FeedState::Connecting);
            match self.run_session(generation, &symbols).await {
                Ok(()) => info!(generation, "feed session ended"),
                Err(e) => error!(generation, error = %e, "feed session failed"),
            }

            if !self.is_current(generation) {
                break;
            }
            self.set_state(generation, FeedState::Reconnecting);
            let backoff = self.params.reconnect_backoff();
            warn!(backoff_secs = backoff.as_secs(), "reconnecting price feed");
            sleep(backoff).await;
        }
        debug!(generation, "feed task exited");
    }

    async fn run_session(&self, generation: u64, symbols: &[String]) -> Result<()> {
        info!(url = %self.ws_url, "connecting to trade stream");
        let (ws_stream, _response) = connect_async(&self.ws_url)
            .await
            .context("failed to connect to trade stream")?;
        let (mut write, mut read) = ws_stream.split();

        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 {
                sleep(self.params.subscribe_pacing()).await;
            }
            write
                .send(Message::Text(subscribe_message(symbol).to_string()))
                .await
                .with_context(|| format!("failed to subscribe to {symbol} trades"))?;
            debug!(symbol = %symbol, "trades subscription sent");
        }
        self.set_state(generation, FeedState::Subscribed);
        info!(count = symbols.len(), "trade stream subscribed");

        loop {
            if !self.is_current(generation) {
                let _ = write.close().await;
                return Ok(());
            }

            let next = match timeout(self.params.idle_timeout(), read.next()).await {
                Ok(next) => next,
                Err(_) => {
                    debug!("trade stream idle, sending ping");
                    write
                        .send(Message::Text(ping_message().to_string()))
                        .await
                        .context("failed to send keepalive ping")?;
                    continue;
                }
            };

            match next {
                Some(Ok(Message::Text(text))) => self.handle_text(&text),
                Some(Ok(Message::Ping(data))) => {
                    write.send(Message::Pong(data)).await.context("failed to send pong")?;
                }
                Some(Ok(Message::Close(frame))) => {
                    warn!(frame = ?frame, "trade stream closed by server");
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("trade stream read error"),
                None => {
                    warn!("trade stream ended");
                    return Ok(());
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match parse_frame(text) {
            Frame::Trades(trades) => {
                for trade in &trades {
                    self.apply_trade(trade);
                }
            }
            Frame::Error(err) => warn!(error = %err, "trade stream reported an error"),
            Frame::Malformed => debug!(frame = %text, "ignoring non-JSON frame"),
            Frame::Control | Frame::Other => {}
        }
    }

    /// Merge one trade into the cache and fan it out. Returns `false` when
    /// the trade is unusable.
    pub fn apply_trade(&self, trade: &Trade) -> bool {
        if trade.px <= 0.0 || trade.coin.is_empty() {
            return false;
        }
        let entry = self.cache.apply_stream_price(&trade.coin, trade.px, Utc::now());
        self.trades_applied.fetch_add(1, Ordering::Relaxed);

        let delivered = self
            .broadcaster
            .broadcast(&PriceUpdate::new(trade.coin.clone(), trade.px, entry));
        debug!(symbol = %trade.coin, price = trade.px, delivered, "stream price applied");
        true
    }
}

impl std::fmt::Debug for FeedCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedCoordinator")
            .field("ws_url", &self.ws_url)
            .field("state", &self.state())
            .field("running", &self.is_running())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum FeedCommand {
    Enable(Vec<String>),
    Disable,
}

/// Handle used by the HTTP layer to toggle the feed.
#[derive(Debug, Clone)]
pub struct FeedControl {
    tx: mpsc::UnboundedSender<FeedCommand>,
}

impl FeedControl {
    pub fn enable(&self, symbols: Vec<String>) -> Result<()> {
        self.tx
            .send(FeedCommand::Enable(symbols))
            .context("feed supervisor is gone")
    }

    pub fn disable(&self) -> Result<()> {
        self.tx.send(FeedCommand::Disable).context("feed supervisor is gone")
    }
}

/// Spawn the task that owns feed lifecycle changes. Enabling starts the
/// stream and then seeds bid / ask for every symbol through REST.
pub fn spawn_supervisor(
    feed: Arc<FeedCoordinator>,
    fetcher: Arc<MarketDataFetcher>,
) -> FeedControl {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                FeedCommand::Enable(symbols) => {
                    if feed.start(symbols.clone()) {
                        fetcher.warm(&symbols).await;
                    }
                }
                FeedCommand::Disable => feed.stop(),
            }
        }
        feed.stop();
        debug!("feed supervisor exited");
    });
    FeedControl { tx }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::price_cache::PriceEntry;
    use crate::types::PriceSource;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn coordinator(url: &str, cache: Arc<PriceCache>) -> Arc<FeedCoordinator> {
        let params = FeedParams {
            idle_timeout_secs: 1,
            reconnect_backoff_secs: 1,
            subscribe_pacing_ms: 10,
        };
        Arc::new(FeedCoordinator::new(url, params, cache, Arc::new(Broadcaster::new())))
    }

    #[test]
    fn control_and_malformed_frames() {
        for raw in ["-1", "1", "ping", "pong", " pong "] {
            assert_eq!(parse_frame(raw), Frame::Control, "{raw}");
        }
        assert_eq!(parse_frame(r#"{"channel":"pong"}"#), Frame::Control);
        assert_eq!(parse_frame("not json {"), Frame::Malformed);
        assert_eq!(
            parse_frame(r#"{"channel":"subscriptionResponse","data":{}}"#),
            Frame::Other
        );
    }

    #[test]
    fn error_frames_are_classified() {
        assert!(matches!(
            parse_frame(r#"{"error":"bad subscription"}"#),
            Frame::Error(_)
        ));
    }

    #[test]
    fn trades_frame_parses_string_and_numeric_prices() {
        let frame = parse_frame(
            r#"{"channel":"trades","data":[
                {"coin":"btc","side":"B","px":"100.5","sz":"0.1","time":1},
                {"coin":"ETH","side":"A","px":3500.25,"sz":"1"},
                {"coin":"SOL","px":"oops"}
            ]}"#,
        );
        assert_eq!(
            frame,
            Frame::Trades(vec![
                Trade { coin: "BTC".into(), px: 100.5 },
                Trade { coin: "ETH".into(), px: 3500.25 },
            ])
        );
    }

    #[test]
    fn subscribe_message_shape() {
        assert_eq!(
            subscribe_message("SOL"),
            json!({ "method": "subscribe", "subscription": { "type": "trades", "coin": "SOL" } })
        );
    }

    #[tokio::test]
    async fn unusable_trades_are_skipped() {
        let cache = Arc::new(PriceCache::new(&["BTC".to_string()]));
        let feed = coordinator("ws://127.0.0.1:1", cache.clone());
        assert!(!feed.apply_trade(&Trade { coin: "BTC".into(), px: 0.0 }));
        assert!(!feed.apply_trade(&Trade { coin: String::new(), px: 1.0 }));
        assert!(cache.get("BTC").unwrap().mid_price().is_none());
        assert!(feed.apply_trade(&Trade { coin: "BTC".into(), px: 1.0 }));
        assert_eq!(feed.status().trades_applied, 1);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let cache = Arc::new(PriceCache::new(&["BTC".to_string()]));
        let feed = coordinator("ws://127.0.0.1:1", cache);

        assert!(feed.start(vec!["BTC".into()]));
        assert!(!feed.start(vec!["BTC".into()]));
        assert!(feed.is_running());

        feed.stop();
        feed.stop();
        assert!(!feed.is_running());
        assert_eq!(feed.state(), FeedState::Stopped);

        // A new cycle gets its own generation.
        assert!(feed.start(vec!["BTC".into()]));
        feed.stop();
        assert_eq!(feed.state(), FeedState::Stopped);
    }

    #[tokio::test]
    async fn streamed_trade_updates_cache_and_subscribers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (sub_tx, mut sub_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            if let Some(Ok(Message::Text(sub))) = ws.next().await {
                let _ = sub_tx.send(sub);
            }
            ws.send(Message::Text("1".into())).await.unwrap();
            ws.send(Message::Text(
                r#"{"channel":"trades","data":[{"coin":"BTC","side":"B","px":"100.5","sz":"0.1"}]}"#
                    .into(),
            ))
            .await
            .unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let cache = Arc::new(PriceCache::new(&["BTC".to_string()]));
        cache.put("BTC", PriceEntry::from_rest(100.0, Some(99.0), Some(101.0), Utc::now()));
        let feed = coordinator(&format!("ws://{addr}"), cache.clone());
        let (_id, mut updates) = feed.broadcaster().subscribe();

        assert!(feed.start(vec!["BTC".into()]));

        let sub = timeout(Duration::from_secs(5), sub_rx.recv()).await.unwrap().unwrap();
        let sub: Value = serde_json::from_str(&sub).unwrap();
        assert_eq!(sub, subscribe_message("BTC"));

        let update = timeout(Duration::from_secs(5), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.symbol, "BTC");
        assert_eq!(update.price, 100.5);
        let cached = update.cache_data.unwrap();
        assert_eq!(cached.bid_price(), Some(99.0));
        assert_eq!(cached.ask_price(), Some(101.0));
        assert_eq!(cached.spread(), Some(2.0));
        assert_eq!(cached.source(), Some(PriceSource::Stream));

        assert_eq!(cache.get("BTC").unwrap().mid_price(), Some(100.5));
        assert_eq!(feed.state(), FeedState::Subscribed);

        feed.stop();
        assert_eq!(feed.state(), FeedState::Stopped);
    }

    #[tokio::test]
    async fn reconnects_and_resubscribes_after_connection_loss() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (sub_tx, mut sub_rx) = mpsc::unbounded_channel::<(usize, String)>();

        tokio::spawn(async move {
            // First session: take the subscribe, then drop the socket.
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            if let Some(Ok(Message::Text(sub))) = ws.next().await {
                let _ = sub_tx.send((1, sub));
            }
            drop(ws);

            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            if let Some(Ok(Message::Text(sub))) = ws.next().await {
                let _ = sub_tx.send((2, sub));
            }
            while let Some(Ok(_)) = ws.next().await {}
        });

        let cache = Arc::new(PriceCache::new(&["ETH".to_string()]));
        let feed = coordinator(&format!("ws://{addr}"), cache);
        assert!(feed.start(vec!["ETH".into()]));

        let (session, sub) = timeout(Duration::from_secs(5), sub_rx.recv()).await.unwrap().unwrap();
        assert_eq!(session, 1);
        assert_eq!(serde_json::from_str::<Value>(&sub).unwrap(), subscribe_message("ETH"));

        let (session, sub) = timeout(Duration::from_secs(5), sub_rx.recv()).await.unwrap().unwrap();
        assert_eq!(session, 2);
        assert_eq!(serde_json::from_str::<Value>(&sub).unwrap(), subscribe_message("ETH"));

        let mut state = feed.state();
        for _ in 0..50 {
            if state == FeedState::Subscribed {
                break;
            }
            sleep(Duration::from_millis(20)).await;
            state = feed.state();
        }
        assert_eq!(state, FeedState::Subscribed);
        assert!(feed.is_running());

        feed.stop();
    }

    #[tokio::test]
    async fn idle_session_sends_ping_and_stays_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let _ = frame_tx.send(text);
                }
            }
        });

        let cache = Arc::new(PriceCache::new(&["BTC".to_string()]));
        let feed = coordinator(&format!("ws://{addr}"), cache);
        assert!(feed.start(vec!["BTC".into()]));

        let sub = timeout(Duration::from_secs(5), frame_rx.recv()).await.unwrap().unwrap();
        assert_eq!(serde_json::from_str::<Value>(&sub).unwrap(), subscribe_message("BTC"));

        // Nothing is sent by the server, so the idle timeout fires.
        let ping = timeout(Duration::from_secs(5), frame_rx.recv()).await.unwrap().unwrap();
        assert_eq!(serde_json::from_str::<Value>(&ping).unwrap(), ping_message());
        assert_eq!(feed.state(), FeedState::Subscribed);

        let ping = timeout(Duration::from_secs(5), frame_rx.recv()).await.unwrap().unwrap();
        assert_eq!(serde_json::from_str::<Value>(&ping).unwrap(), ping_message());
        assert_eq!(feed.state(), FeedState::Subscribed);

        feed.stop();
    }
}
