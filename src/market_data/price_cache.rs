// =============================================================================
// Price Cache - per-symbol mid / bid / ask shared by every component
// =============================================================================
//
// Two producers write here:
//   - the snapshot fetcher (REST), which owns bid, ask and spread;
//   - the streaming feed, which only moves mid, last_update and source.
//
// The key set is fixed at construction from the tracked symbols. Entries are
// replaced whole under a write lock so readers never observe a half-applied
// update.
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::types::PriceSource;

// ---------------------------------------------------------------------------
// PriceEntry
// ---------------------------------------------------------------------------

/// Latest known prices for one symbol.
///
/// `spread` is only ever derived from `bid_price` and `ask_price`, so the two
/// can never disagree; construct entries through [`PriceEntry::from_rest`] or
/// [`PriceEntry::with_stream_price`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PriceEntry {
    mid_price: Option<f64>,
    bid_price: Option<f64>,
    ask_price: Option<f64>,
    spread: Option<f64>,
    last_update: Option<DateTime<Utc>>,
    source: Option<PriceSource>,
}

impl PriceEntry {
    /// Entry produced by a snapshot fetch.
    pub fn from_rest(
        mid_price: f64,
        bid_price: Option<f64>,
        ask_price: Option<f64>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            mid_price: Some(mid_price),
            bid_price,
            ask_price,
            spread: spread_of(bid_price, ask_price),
            last_update: Some(at),
            source: Some(PriceSource::Rest),
        }
    }

    /// Copy of `self` with a streamed mid price. Book fields are carried over
    /// untouched.
    pub fn with_stream_price(&self, price: f64, at: DateTime<Utc>) -> Self {
        Self {
            mid_price: Some(price),
            last_update: Some(at),
            source: Some(PriceSource::Stream),
            ..self.clone()
        }
    }

    pub fn mid_price(&self) -> Option<f64> {
        self.mid_price
    }

    pub fn bid_price(&self) -> Option<f64> {
        self.bid_price
    }

    pub fn ask_price(&self) -> Option<f64> {
        self.ask_price
    }

    pub fn spread(&self) -> Option<f64> {
        self.spread
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn source(&self) -> Option<PriceSource> {
        self.source
    }

    /// Spread as a percentage of mid, when both are known.
    pub fn spread_percent(&self) -> Option<f64> {
        match (self.spread, self.mid_price) {
            (Some(spread), Some(mid)) if mid > 0.0 => Some(spread / mid * 100.0),
            _ => None,
        }
    }

    /// True when the entry was updated less than `max_age` before `now`.
    /// A timestamp ahead of `now` (clock skew) counts as fresh.
    pub fn is_fresh_at(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        match self.last_update {
            Some(at) => match (now - at).to_std() {
                Ok(age) => age < max_age,
                Err(_) => true,
            },
            None => false,
        }
    }
}

fn spread_of(bid: Option<f64>, ask: Option<f64>) -> Option<f64> {
    match (bid, ask) {
        (Some(bid), Some(ask)) => Some(ask - bid),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// PriceCache
// ---------------------------------------------------------------------------

/// Process-wide symbol -> [`PriceEntry`] map with a fixed key set.
pub struct PriceCache {
    entries: RwLock<HashMap<String, PriceEntry>>,
}

impl PriceCache {
    /// Create empty entries for every tracked symbol.
    pub fn new(symbols: &[String]) -> Self {
        let entries = symbols
            .iter()
            .map(|s| (s.clone(), PriceEntry::default()))
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Current entry for `symbol`, or `None` when the symbol is not tracked.
    pub fn get(&self, symbol: &str) -> Option<PriceEntry> {
        self.entries.read().get(symbol).cloned()
    }

    /// Replace the entry for a tracked symbol. Returns `false` (and writes
    /// nothing) for symbols outside the key set.
    pub fn put(&self, symbol: &str, entry: PriceEntry) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(symbol) {
            Some(slot) => {
                *slot = entry;
                true
            }
            None => {
                debug!(symbol, "ignoring cache write for untracked symbol");
                false
            }
        }
    }

    /// Merge a streamed trade price into the entry, keeping bid / ask /
    /// spread from the last snapshot. Returns the updated entry.
    pub fn apply_stream_price(
        &self,
        symbol: &str,
        price: f64,
        at: DateTime<Utc>,
    ) -> Option<PriceEntry> {
        let mut entries = self.entries.write();
        let slot = entries.get_mut(symbol)?;
        *slot = slot.with_stream_price(price, at);
        Some(slot.clone())
    }

    pub fn is_fresh(&self, symbol: &str, max_age: Duration) -> bool {
        self.is_fresh_at(symbol, max_age, Utc::now())
    }

    pub fn is_fresh_at(&self, symbol: &str, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.entries
            .read()
            .get(symbol)
            .map(|e| e.is_fresh_at(max_age, now))
            .unwrap_or(false)
    }

    /// All entries, ordered by symbol.
    pub fn snapshot(&self) -> BTreeMap<String, PriceEntry> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl std::fmt::Debug for PriceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceCache")
            .field("symbols", &self.entries.read().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
