use crate::market::types::FeedConnectionState;
use crate::state::AppState;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_ms: u128,
    pub feed: FeedConnectionState,
    pub tracked_symbols: usize,
}

pub async fn health(state: &AppState) -> HealthResponse {
    let feed = state.trade_feed.status().await.state;

    HealthResponse {
        status: "ok",
        uptime_ms: state.started_at.elapsed().as_millis(),
        feed,
        tracked_symbols: state.order_book.symbols().len(),
    }
}
