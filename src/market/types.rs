use crate::error::AppError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_SYMBOLS: [&str; 4] = ["AAPL", "GOOG", "TSLA", "AMZN"];
pub const DEFAULT_FEED_URL: &str = "wss://socket.polygon.io/stocks";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
pub const MIN_RECONNECT_DELAY_MS: u64 = 100;
pub const MAX_RECONNECT_DELAY_MS: u64 = 300_000;
pub const API_KEY_ENV: &str = "POLYGON_API_KEY";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    /// The stocks feed reports executions without a bid/ask side.
    Trade,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TradeEvent {
    pub symbol: String,
    pub price: f64,
    pub volume: u64,
    pub side: TradeSide,
    #[serde(serialize_with = "serialize_iso_millis")]
    pub timestamp: DateTime<Utc>,
}

/// Writes a timestamp as ISO-8601 with millisecond precision, the same text
/// the alert messages carry.
pub fn serialize_iso_millis<S>(
    timestamp: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Millis, true))
}

pub fn serialize_optional_iso_millis<S>(
    timestamp: &Option<DateTime<Utc>>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match timestamp {
        Some(timestamp) => serialize_iso_millis(timestamp, serializer),
        None => serializer.serialize_none(),
    }
}

impl TradeEvent {
    pub fn new(
        symbol: impl Into<String>,
        price: f64,
        volume: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            volume,
            side: TradeSide::Trade,
            timestamp,
        }
    }

    /// ISO-8601 with millisecond precision, e.g. `2021-04-05T21:16:20.000Z`.
    pub fn timestamp_iso(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribed,
    Reconnecting,
    Stopped,
    Disabled,
}

impl FeedConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Subscribed => "subscribed",
            Self::Reconnecting => "reconnecting",
            Self::Stopped => "stopped",
            Self::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedStatusSnapshot {
    pub state: FeedConnectionState,
    pub symbols: Vec<String>,
    pub reconnect_attempts: u64,
    pub trades_ingested: u64,
    #[serde(serialize_with = "serialize_optional_iso_millis")]
    pub last_trade_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

impl FeedStatusSnapshot {
    pub fn idle(symbols: Vec<String>) -> Self {
        Self {
            state: FeedConnectionState::Disconnected,
            symbols,
            reconnect_attempts: 0,
            trades_ingested: 0,
            last_trade_at: None,
            reason: Some("feed idle".to_string()),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartTradeFeedArgs {
    pub api_key: Option<String>,
    pub symbols: Option<Vec<String>>,
    pub endpoint: Option<String>,
    pub reconnect_delay_ms: Option<u64>,
}

impl fmt::Debug for StartTradeFeedArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartTradeFeedArgs")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("symbols", &self.symbols)
            .field("endpoint", &self.endpoint)
            .field("reconnect_delay_ms", &self.reconnect_delay_ms)
            .finish()
    }
}

#[derive(Clone)]
pub struct TradeFeedConfig {
    pub api_key: String,
    pub symbols: Vec<String>,
    pub endpoint: String,
    pub reconnect_delay: Duration,
}

impl fmt::Debug for TradeFeedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TradeFeedConfig")
            .field("api_key", &"<redacted>")
            .field("symbols", &self.symbols)
            .field("endpoint", &self.endpoint)
            .field("reconnect_delay", &self.reconnect_delay)
            .finish()
    }
}

pub fn normalize_symbol(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

fn is_valid_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '.')
}

pub fn default_symbols() -> Vec<String> {
    DEFAULT_SYMBOLS.iter().map(|symbol| symbol.to_string()).collect()
}

impl StartTradeFeedArgs {
    pub fn normalize(self) -> Result<TradeFeedConfig, AppError> {
        let api_key = self
            .api_key
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AppError::MissingCredential(API_KEY_ENV.to_string()))?;

        let requested = self.symbols.unwrap_or_else(default_symbols);
        let mut symbols: Vec<String> = Vec::with_capacity(requested.len());
        for raw in requested {
            let symbol = normalize_symbol(&raw);
            if !is_valid_symbol(&symbol) {
                return Err(AppError::InvalidArgument(format!(
                    "symbol '{raw}' must be non-empty alphanumeric ASCII"
                )));
            }
            if !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }
        if symbols.is_empty() {
            return Err(AppError::InvalidArgument(
                "at least one symbol must be subscribed".to_string(),
            ));
        }

        let endpoint = self
            .endpoint
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_FEED_URL.to_string());
        if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
            return Err(AppError::InvalidArgument(format!(
                "endpoint '{endpoint}' must use the ws:// or wss:// scheme"
            )));
        }

        let reconnect_delay_ms = self
            .reconnect_delay_ms
            .unwrap_or(DEFAULT_RECONNECT_DELAY_MS);
        if !(MIN_RECONNECT_DELAY_MS..=MAX_RECONNECT_DELAY_MS).contains(&reconnect_delay_ms) {
            return Err(AppError::InvalidArgument(format!(
                "reconnectDelayMs must be between {MIN_RECONNECT_DELAY_MS} and {MAX_RECONNECT_DELAY_MS}"
            )));
        }

        Ok(TradeFeedConfig {
            api_key,
            symbols,
            endpoint,
            reconnect_delay: Duration::from_millis(reconnect_delay_ms),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeFeedSession {
    pub running: bool,
    pub already_running: bool,
    pub symbols: Vec<String>,
    pub endpoint: String,
    pub reconnect_delay_ms: u64,
}

impl TradeFeedSession {
    pub fn from_config(config: &TradeFeedConfig, already_running: bool) -> Self {
        Self {
            running: true,
            already_running,
            symbols: config.symbols.clone(),
            endpoint: config.endpoint.clone(),
            reconnect_delay_ms: config.reconnect_delay.as_millis().min(u64::MAX as u128) as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeFeedStopResult {
    pub stopped: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "ev")]
pub enum FeedRecordWire {
    #[serde(rename = "T")]
    Trade(TradeWire),
    #[serde(rename = "status")]
    Status(StatusWire),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct TradeWire {
    #[serde(rename = "sym")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub price: f64,
    #[serde(rename = "s")]
    pub size: u64,
    #[serde(rename = "t")]
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StatusWire {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl StatusWire {
    pub fn is_failure(&self) -> bool {
        self.status.ends_with("_failed") || self.status.eq_ignore_ascii_case("error")
    }
}

impl TryFrom<TradeWire> for TradeEvent {
    type Error = AppError;

    fn try_from(value: TradeWire) -> Result<Self, Self::Error> {
        let symbol = normalize_symbol(&value.symbol);
        if symbol.is_empty() {
            return Err(AppError::InvalidArgument(
                "trade record has an empty symbol".to_string(),
            ));
        }
        if !value.price.is_finite() || value.price <= 0.0 {
            return Err(AppError::InvalidArgument(format!(
                "trade price must be positive and finite, got {}",
                value.price
            )));
        }
        let timestamp = DateTime::<Utc>::from_timestamp_millis(value.timestamp_ms).ok_or_else(
            || {
                AppError::InvalidArgument(format!(
                    "trade timestamp {} is out of range",
                    value.timestamp_ms
                ))
            },
        )?;

        Ok(Self {
            symbol,
            price: value.price,
            volume: value.size,
            side: TradeSide::Trade,
            timestamp,
        })
    }
}

/// Decoded contents of one inbound frame.
#[derive(Debug, Default)]
pub struct FeedBatch {
    pub trades: Vec<TradeEvent>,
    pub statuses: Vec<StatusWire>,
    pub skipped: usize,
}

/// Decodes a frame holding a JSON array of feed records. The frame as a whole
/// must be an array; individual records that fail to decode are counted in
/// `skipped` and do not affect their neighbours.
pub fn parse_feed_payload(payload: &mut [u8]) -> Result<FeedBatch, AppError> {
    let records: Vec<simd_json::OwnedValue> = simd_json::serde::from_slice(payload)?;

    let mut batch = FeedBatch::default();
    for record in records {
        match simd_json::serde::from_owned_value::<FeedRecordWire>(record) {
            Ok(FeedRecordWire::Trade(wire)) => match TradeEvent::try_from(wire) {
                Ok(trade) => batch.trades.push(trade),
                Err(_) => batch.skipped += 1,
            },
            Ok(FeedRecordWire::Status(status)) => batch.statuses.push(status),
            Ok(FeedRecordWire::Other) => {}
            Err(_) => batch.skipped += 1,
        }
    }

    Ok(batch)
}
