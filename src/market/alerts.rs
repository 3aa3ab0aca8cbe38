use crate::market::types::{serialize_iso_millis, TradeEvent};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::broadcast;

pub type AlertListener = Arc<dyn Fn(&Alert) + Send + Sync + 'static>;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub symbol: String,
    pub price: f64,
    pub volume: u64,
    #[serde(serialize_with = "serialize_iso_millis")]
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl Alert {
    pub fn volume_anomaly(event: &TradeEvent) -> Self {
        let message = format!(
            "Anomaly detected: {} trade with volume {} at ${} on {}",
            event.symbol,
            event.volume,
            event.price,
            event.timestamp_iso()
        );

        Self {
            symbol: event.symbol.clone(),
            price: event.price,
            volume: event.volume,
            timestamp: event.timestamp,
            message,
        }
    }
}

/// Handle returned by [`AlertHub::subscribe`]; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlertSubscription(u64);

#[derive(Default)]
struct ListenerRegistry {
    next_id: u64,
    listeners: Vec<(AlertSubscription, AlertListener)>,
}

#[derive(Default)]
pub struct AlertHub {
    registry: Mutex<ListenerRegistry>,
}

impl AlertHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> AlertSubscription
    where
        F: Fn(&Alert) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        let subscription = AlertSubscription(registry.next_id);
        registry.next_id += 1;
        registry.listeners.push((subscription, Arc::new(listener)));
        subscription
    }

    /// Forwards every alert into a broadcast channel, for push transports that
    /// fan out to many readers. Lagging receivers lose the oldest alerts.
    pub fn subscribe_channel(
        &self,
        capacity: usize,
    ) -> (AlertSubscription, broadcast::Receiver<Alert>) {
        let (sender, receiver) = broadcast::channel(capacity.max(1));
        let subscription = self.subscribe(move |alert| {
            let _ = sender.send(alert.clone());
        });
        (subscription, receiver)
    }

    pub fn unsubscribe(&self, subscription: AlertSubscription) -> bool {
        let mut registry = self.registry.lock();
        let before = registry.listeners.len();
        registry.listeners.retain(|(id, _)| *id != subscription);
        registry.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.registry.lock().listeners.len()
    }

    /// Delivers `alert` to every listener in registration order. Returns the
    /// number of listeners that completed without panicking.
    pub fn publish(&self, alert: &Alert) -> usize {
        let listeners: Vec<(AlertSubscription, AlertListener)> =
            self.registry.lock().listeners.clone();

        let mut delivered = 0;
        for (subscription, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(alert))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::error!(
                        listener = subscription.0,
                        symbol = %alert.symbol,
                        "alert listener panicked; continuing with remaining listeners"
                    );
                }
            }
        }
        delivered
    }
}
