pub mod commands;
pub mod config;
pub mod error;
pub mod market;
pub mod state;

use commands::{
    market_stream::{start_trade_feed, stop_trade_feed},
    order_book::order_book_symbols,
};
use error::AppError;
use market::alerts::Alert;
use market::ALERT_CHANNEL_CAPACITY;
use state::AppState;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Writes each alert to stdout as one JSON line until the channel closes.
async fn forward_alerts(mut alerts: broadcast::Receiver<Alert>) {
    loop {
        match alerts.recv().await {
            Ok(alert) => match simd_json::serde::to_string(&alert) {
                Ok(line) => println!("{line}"),
                Err(error) => tracing::error!(%error, "failed to encode alert"),
            },
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "alert output fell behind; alerts dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

pub async fn run() -> Result<(), AppError> {
    let state = AppState::new();

    let (alert_subscription, alerts) = state.order_book.alert_channel(ALERT_CHANNEL_CAPACITY);
    let alert_task = tokio::spawn(forward_alerts(alerts));

    match start_trade_feed(&state, None).await {
        Ok(session) => tracing::info!(
            symbols = ?session.symbols,
            endpoint = %session.endpoint,
            "trade feed session opened"
        ),
        Err(error) => tracing::error!(
            %error,
            "trade feed unavailable; order book will stay empty"
        ),
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");

    stop_trade_feed(&state).await;
    state.order_book.remove_alert_listener(alert_subscription);
    let _ = alert_task.await;

    for summary in order_book_symbols(&state) {
        tracing::info!(symbol = %summary.symbol, trades = summary.trades, "order book summary");
    }

    Ok(())
}
