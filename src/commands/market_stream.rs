use crate::config::trade_feed_args_from_env;
use crate::error::AppError;
use crate::market::types::{
    FeedStatusSnapshot, StartTradeFeedArgs, TradeFeedSession, TradeFeedStopResult,
};
use crate::state::AppState;

/// Starts the trade feed. Without explicit arguments the settings come from
/// the process environment.
pub async fn start_trade_feed(
    state: &AppState,
    args: Option<StartTradeFeedArgs>,
) -> Result<TradeFeedSession, AppError> {
    let args = match args {
        Some(args) => args,
        None => trade_feed_args_from_env()?,
    };
    state.trade_feed.start(args).await
}

pub async fn stop_trade_feed(state: &AppState) -> TradeFeedStopResult {
    state.trade_feed.stop().await
}

pub async fn trade_feed_status(state: &AppState) -> FeedStatusSnapshot {
    state.trade_feed.status().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::types::FeedConnectionState;

    #[tokio::test]
    async fn explicit_args_without_credential_are_rejected() {
        let state = AppState::new();

        let result = start_trade_feed(&state, Some(StartTradeFeedArgs::default())).await;

        assert!(matches!(result, Err(AppError::MissingCredential(_))));
        let status = trade_feed_status(&state).await;
        assert_eq!(status.state, FeedConnectionState::Disabled);
        assert!(!stop_trade_feed(&state).await.stopped);
    }
}
