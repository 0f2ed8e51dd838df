// =============================================================================
// Price Broadcaster - fans streamed prices out to `/ws/price` subscribers
// =============================================================================
//
// Each subscriber owns a bounded channel that the HTTP WebSocket task drains.
// Delivery is best-effort: a subscriber whose receiver is gone, or whose queue
// is full because it stopped draining, is dropped on its own.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use super::price_cache::PriceEntry;

/// Updates a subscriber may have pending before it counts as stalled.
pub const SUBSCRIBER_QUEUE: usize = 256;

/// Push message sent for every accepted streamed trade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceUpdate {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub symbol: String,
    pub price: f64,
    pub cache_data: Option<PriceEntry>,
}

impl PriceUpdate {
    pub fn new(symbol: impl Into<String>, price: f64, cache_data: Option<PriceEntry>) -> Self {
        Self {
            kind: "price_update",
            symbol: symbol.into(),
            price,
            cache_data,
        }
    }
}

/// Registry of live subscribers.
#[derive(Default)]
pub struct Broadcaster {
    subscribers: RwLock<HashMap<Uuid, mpsc::Sender<PriceUpdate>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber and hand back its id and receiving end.
    pub fn subscribe(&self) -> (Uuid, mpsc::Receiver<PriceUpdate>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let id = Uuid::new_v4();
        self.subscribers.write().insert(id, tx);
        debug!(subscriber = %id, total = self.len(), "price subscriber registered");
        (id, rx)
    }

    pub fn unsubscribe(&self, id: &Uuid) {
        if self.subscribers.write().remove(id).is_some() {
            debug!(subscriber = %id, total = self.len(), "price subscriber removed");
        }
    }

    /// Send `update` to every subscriber. Returns how many received it.
    pub fn broadcast(&self, update: &PriceUpdate) -> usize {
        let mut dead = Vec::new();
        let mut delivered = 0;
        {
            let subscribers = self.subscribers.read();
            for (id, tx) in subscribers.iter() {
                match tx.try_send(update.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(subscriber = %id, "price subscriber queue full, dropping it");
                        dead.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => dead.push(*id),
                }
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in &dead {
                subscribers.remove(id);
            }
            debug!(removed = dead.len(), "dropped disconnected price subscribers");
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("subscribers", &self.len())
            .finish()
    }
}
