use crate::market::feed_client::TradeFeedClient;
use crate::market::order_book::OrderBookStore;
use std::sync::Arc;
use std::time::Instant;

pub struct AppState {
    pub started_at: Instant,
    pub order_book: Arc<OrderBookStore>,
    pub trade_feed: TradeFeedClient,
}

impl AppState {
    pub fn new() -> Self {
        let order_book = Arc::new(OrderBookStore::new());

        Self {
            started_at: Instant::now(),
            trade_feed: TradeFeedClient::new(Arc::clone(&order_book)),
            order_book,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
