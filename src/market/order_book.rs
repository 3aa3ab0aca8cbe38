use crate::market::alerts::{Alert, AlertHub, AlertSubscription};
use crate::market::types::{normalize_symbol, TradeEvent};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Trades with a volume strictly above this raise an alert.
pub const ANOMALY_VOLUME_THRESHOLD: u64 = 1_000;

/// Per-symbol, append-only trade history shared by the feed and all readers.
///
/// Nothing is ever evicted: memory grows with the number of trades received
/// for the lifetime of the store.
#[derive(Default)]
pub struct OrderBookStore {
    books: RwLock<HashMap<String, Vec<TradeEvent>>>,
    alerts: AlertHub,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    Stored,
    Anomaly(Alert),
}

impl OrderBookStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, mut event: TradeEvent) -> AppendOutcome {
        event.symbol = normalize_symbol(&event.symbol);
        let alert = (event.volume > ANOMALY_VOLUME_THRESHOLD).then(|| Alert::volume_anomaly(&event));

        self.books
            .write()
            .entry(event.symbol.clone())
            .or_default()
            .push(event);

        match alert {
            Some(alert) => {
                tracing::warn!(
                    symbol = %alert.symbol,
                    volume = alert.volume,
                    price = alert.price,
                    "{}",
                    alert.message
                );
                self.alerts.publish(&alert);
                AppendOutcome::Anomaly(alert)
            }
            None => AppendOutcome::Stored,
        }
    }

    /// Every trade recorded for `symbol`, oldest first. Unknown symbols yield
    /// an empty sequence.
    pub fn get_all(&self, symbol: &str) -> Vec<TradeEvent> {
        self.books
            .read()
            .get(&normalize_symbol(symbol))
            .cloned()
            .unwrap_or_default()
    }

    pub fn trade_count(&self, symbol: &str) -> usize {
        self.books
            .read()
            .get(&normalize_symbol(symbol))
            .map_or(0, Vec::len)
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.books.read().keys().cloned().collect();
        symbols.sort_unstable();
        symbols
    }

    pub fn on_alert<F>(&self, listener: F) -> AlertSubscription
    where
        F: Fn(&Alert) + Send + Sync + 'static,
    {
        self.alerts.subscribe(listener)
    }

    pub fn alert_channel(&self, capacity: usize) -> (AlertSubscription, broadcast::Receiver<Alert>) {
        self.alerts.subscribe_channel(capacity)
    }

    pub fn remove_alert_listener(&self, subscription: AlertSubscription) -> bool {
        self.alerts.unsubscribe(subscription)
    }
}
