use crate::error::AppError;
use futures_util::SinkExt;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

const TRADE_TOPIC_PREFIX: &str = "T.";

pub type PolygonWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Auth,
    Subscribe,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ControlMessage {
    pub action: ControlAction,
    pub params: String,
}

impl ControlMessage {
    pub fn auth(api_key: &str) -> Self {
        Self {
            action: ControlAction::Auth,
            params: api_key.to_string(),
        }
    }

    pub fn subscribe(symbols: &[String]) -> Self {
        Self {
            action: ControlAction::Subscribe,
            params: trade_topics(symbols),
        }
    }

    pub fn encode(&self) -> Result<String, AppError> {
        Ok(simd_json::serde::to_string(self)?)
    }
}

pub fn trade_topics(symbols: &[String]) -> String {
    symbols
        .iter()
        .map(|symbol| format!("{TRADE_TOPIC_PREFIX}{}", symbol.to_ascii_uppercase()))
        .collect::<Vec<_>>()
        .join(",")
}

/// The authenticate-then-subscribe pair, already encoded as text frames.
pub fn handshake_frames(api_key: &str, symbols: &[String]) -> Result<[String; 2], AppError> {
    Ok([
        ControlMessage::auth(api_key).encode()?,
        ControlMessage::subscribe(symbols).encode()?,
    ])
}

pub async fn connect_trade_stream(endpoint: &str) -> Result<PolygonWsStream, AppError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(64 << 20),
        max_frame_size: Some(16 << 20),
        ..Default::default()
    };

    let (stream, _) = connect_async_with_config(endpoint, Some(ws_config), true).await?;
    Ok(stream)
}

pub async fn send_text(stream: &mut PolygonWsStream, payload: String) -> Result<(), AppError> {
    stream.send(Message::Text(payload)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_lists_uppercase_trade_topics() {
        let symbols = vec!["AAPL".to_string(), "goog".to_string(), "TSLA".to_string()];
        assert_eq!(trade_topics(&symbols), "T.AAPL,T.GOOG,T.TSLA");
    }

    #[test]
    fn encodes_auth_then_subscribe() {
        let symbols = vec!["AAPL".to_string(), "AMZN".to_string()];
        let [auth, subscribe] = handshake_frames("key-123", &symbols).expect("frames should encode");

        assert_eq!(auth, r#"{"action":"auth","params":"key-123"}"#);
        assert_eq!(
            subscribe,
            r#"{"action":"subscribe","params":"T.AAPL,T.AMZN"}"#
        );
    }

    #[test]
    fn escapes_credential_in_auth_frame() {
        let encoded = ControlMessage::auth("a\"b").encode().expect("frame should encode");
        assert_eq!(encoded, r#"{"action":"auth","params":"a\"b"}"#);
    }
}
