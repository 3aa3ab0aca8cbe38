use crate::error::AppError;
use crate::market::types::{normalize_symbol, TradeEvent};
use crate::state::AppState;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrderBookSummary {
    pub symbol: String,
    pub trades: usize,
}

pub fn order_book_trades(state: &AppState, symbol: &str) -> Result<Vec<TradeEvent>, AppError> {
    let symbol = normalize_symbol(symbol);
    if symbol.is_empty() {
        return Err(AppError::InvalidArgument(
            "symbol must not be empty".to_string(),
        ));
    }
    Ok(state.order_book.get_all(&symbol))
}

pub fn order_book_symbols(state: &AppState) -> Vec<OrderBookSummary> {
    state
        .order_book
        .symbols()
        .into_iter()
        .map(|symbol| OrderBookSummary {
            trades: state.order_book.trade_count(&symbol),
            symbol,
        })
        .collect()
}
