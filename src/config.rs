use crate::error::AppError;
use crate::market::types::{StartTradeFeedArgs, API_KEY_ENV};

pub const SYMBOLS_ENV: &str = "TRADE_FEED_SYMBOLS";
pub const ENDPOINT_ENV: &str = "TRADE_FEED_URL";
pub const RECONNECT_DELAY_ENV: &str = "TRADE_FEED_RECONNECT_DELAY_MS";

fn resolve_var<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Builds feed arguments from an arbitrary key lookup. Unset or blank keys
/// fall back to the defaults applied by [`StartTradeFeedArgs::normalize`].
pub fn trade_feed_args_from_lookup<F>(lookup: F) -> Result<StartTradeFeedArgs, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    let symbols = resolve_var(&lookup, SYMBOLS_ENV).map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|symbol| !symbol.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>()
    });

    let reconnect_delay_ms = match resolve_var(&lookup, RECONNECT_DELAY_ENV) {
        Some(raw) => Some(raw.parse::<u64>()?),
        None => None,
    };

    Ok(StartTradeFeedArgs {
        api_key: resolve_var(&lookup, API_KEY_ENV),
        symbols,
        endpoint: resolve_var(&lookup, ENDPOINT_ENV),
        reconnect_delay_ms,
    })
}

pub fn trade_feed_args_from_env() -> Result<StartTradeFeedArgs, AppError> {
    trade_feed_args_from_lookup(|key| std::env::var(key).ok())
}
