use crate::error::AppError;
use crate::market::order_book::{AppendOutcome, OrderBookStore};
use crate::market::polygon::{connect_trade_stream, handshake_frames, send_text, PolygonWsStream};
use crate::market::types::{
    parse_feed_payload, FeedConnectionState, FeedStatusSnapshot, TradeFeedConfig,
};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirective {
    Continue,
    Reconnect,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub appended: usize,
    pub anomalies: usize,
    pub skipped: usize,
    pub last_trade_at: Option<DateTime<Utc>>,
}

/// Decodes one frame and appends every trade it carries, in frame order.
pub fn ingest_payload(
    payload: &mut [u8],
    store: &OrderBookStore,
) -> Result<IngestSummary, AppError> {
    let batch = parse_feed_payload(payload)?;

    for status in &batch.statuses {
        if status.is_failure() {
            tracing::warn!(
                status = %status.status,
                message = status.message.as_deref().unwrap_or_default(),
                "trade feed reported a failure status"
            );
        } else {
            tracing::info!(
                status = %status.status,
                message = status.message.as_deref().unwrap_or_default(),
                "trade feed status"
            );
        }
    }

    let mut summary = IngestSummary {
        skipped: batch.skipped,
        ..IngestSummary::default()
    };
    for trade in batch.trades {
        summary.last_trade_at = Some(trade.timestamp);
        if let AppendOutcome::Anomaly(_) = store.append(trade) {
            summary.anomalies += 1;
        }
        summary.appended += 1;
    }

    if summary.skipped > 0 {
        tracing::debug!(skipped = summary.skipped, "dropped malformed trade records");
    }

    Ok(summary)
}

pub async fn handle_message(
    message: Message,
    store: &OrderBookStore,
    status_store: &RwLock<FeedStatusSnapshot>,
) -> StreamDirective {
    let mut payload = match message {
        Message::Text(text_payload) => text_payload.into_bytes(),
        Message::Binary(binary_payload) => binary_payload,
        Message::Close(frame) => {
            tracing::info!(?frame, "trade feed sent close frame");
            return StreamDirective::Reconnect;
        }
        _ => return StreamDirective::Continue,
    };

    match ingest_payload(payload.as_mut_slice(), store) {
        Ok(summary) if summary.appended > 0 => {
            let mut writable = status_store.write().await;
            writable.trades_ingested += summary.appended as u64;
            writable.last_trade_at = summary.last_trade_at.or(writable.last_trade_at);
        }
        Ok(_) => {}
        Err(error) => {
            tracing::error!(%error, "failed to decode trade feed message; dropping it");
        }
    }

    StreamDirective::Continue
}

async fn publish_status(
    status_store: &RwLock<FeedStatusSnapshot>,
    state: FeedConnectionState,
    reason: Option<String>,
) {
    tracing::debug!(state = state.as_str(), reason = ?reason, "trade feed state changed");
    let mut writable = status_store.write().await;
    writable.state = state;
    writable.reason = reason;
}

async fn send_handshake(
    stream: &mut PolygonWsStream,
    frames: &[String; 2],
) -> Result<(), AppError> {
    for frame in frames {
        send_text(stream, frame.clone()).await?;
    }
    Ok(())
}

/// Drives the feed connection until `cancel_token` fires: connect, send the
/// auth/subscribe pair, ingest frames, and after any close or error wait
/// `config.reconnect_delay` before starting over. The delay never grows and
/// attempts are unlimited.
pub async fn run_trade_feed(
    config: TradeFeedConfig,
    store: Arc<OrderBookStore>,
    status_store: Arc<RwLock<FeedStatusSnapshot>>,
    cancel_token: CancellationToken,
) {
    let handshake = match handshake_frames(&config.api_key, &config.symbols) {
        Ok(frames) => frames,
        Err(error) => {
            tracing::error!(%error, "failed to encode trade feed handshake");
            publish_status(
                &status_store,
                FeedConnectionState::Stopped,
                Some(format!("handshake encoding failed: {error}")),
            )
            .await;
            return;
        }
    };

    let delay_ms = config.reconnect_delay.as_millis().min(u64::MAX as u128) as u64;
    let mut reconnect_attempt = 0_u64;
    while !cancel_token.is_cancelled() {
        let (phase, reason) = if reconnect_attempt == 0 {
            (
                FeedConnectionState::Connecting,
                "opening trade feed websocket".to_string(),
            )
        } else {
            (
                FeedConnectionState::Reconnecting,
                format!("reconnect attempt {reconnect_attempt}"),
            )
        };
        publish_status(&status_store, phase, Some(reason)).await;
        tracing::info!(
            endpoint = %config.endpoint,
            attempt = reconnect_attempt,
            "connecting to trade feed"
        );

        let connected = tokio::select! {
            _ = cancel_token.cancelled() => break,
            connected = connect_trade_stream(&config.endpoint) => connected,
        };

        let disconnect_reason = match connected {
            Ok(mut websocket_stream) => {
                tracing::info!(endpoint = %config.endpoint, "connected to trade feed");
                publish_status(
                    &status_store,
                    FeedConnectionState::Authenticating,
                    Some("sending auth and subscribe".to_string()),
                )
                .await;

                let reason = match send_handshake(&mut websocket_stream, &handshake).await {
                    Ok(()) => {
                        tracing::info!(symbols = ?config.symbols, "subscribed to trade topics");
                        publish_status(
                            &status_store,
                            FeedConnectionState::Subscribed,
                            Some("websocket subscribed".to_string()),
                        )
                        .await;
                        read_until_disconnect(
                            &mut websocket_stream,
                            &store,
                            &status_store,
                            &cancel_token,
                        )
                        .await
                    }
                    Err(error) => format!("handshake failed: {error}"),
                };

                if cancel_token.is_cancelled() {
                    let _ = websocket_stream.close(None).await;
                    break;
                }
                reason
            }
            Err(error) => {
                tracing::error!(%error, endpoint = %config.endpoint, "trade feed websocket error");
                format!("websocket connect error: {error}")
            }
        };

        reconnect_attempt = reconnect_attempt.saturating_add(1);
        {
            let mut writable = status_store.write().await;
            writable.state = FeedConnectionState::Disconnected;
            writable.reconnect_attempts = reconnect_attempt;
            writable.reason = Some(disconnect_reason.clone());
        }
        tracing::warn!(
            reason = %disconnect_reason,
            delay_ms,
            "trade feed closed; reconnecting after delay"
        );

        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = tokio::time::sleep(config.reconnect_delay) => {}
        }
    }

    publish_status(
        &status_store,
        FeedConnectionState::Stopped,
        Some("trade feed stopped".to_string()),
    )
    .await;
    tracing::info!("trade feed loop stopped");
}

async fn read_until_disconnect(
    websocket_stream: &mut PolygonWsStream,
    store: &OrderBookStore,
    status_store: &RwLock<FeedStatusSnapshot>,
    cancel_token: &CancellationToken,
) -> String {
    loop {
        let frame = tokio::select! {
            _ = cancel_token.cancelled() => return "cancelled".to_string(),
            next_message = websocket_stream.next() => next_message,
        };

        match frame {
            Some(Ok(message)) => {
                if handle_message(message, store, status_store).await == StreamDirective::Reconnect {
                    return "closed by remote".to_string();
                }
            }
            Some(Err(error)) => {
                tracing::error!(%error, "trade feed websocket error");
                return format!("websocket frame error: {error}");
            }
            None => return "stream ended".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::types::default_symbols;
    use std::time::{Duration, Instant};
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, WebSocketStream};

    const TRADE_BATCH: &str = r#"[
        {"ev":"status","status":"auth_success","message":"authenticated"},
        {"ev":"T","sym":"AAPL","p":130.5,"s":100,"t":1617657380000},
        {"ev":"T","sym":"AAPL","p":130.6,"s":2500,"t":1617657380100}
    ]"#;

    fn status_store() -> RwLock<FeedStatusSnapshot> {
        RwLock::new(FeedStatusSnapshot::idle(default_symbols()))
    }

    fn test_config(endpoint: String, reconnect_delay: Duration) -> TradeFeedConfig {
        TradeFeedConfig {
            api_key: "test-key".to_string(),
            symbols: vec!["AAPL".to_string(), "GOOG".to_string()],
            endpoint,
            reconnect_delay,
        }
    }

    async fn accept_client(listener: &TcpListener) -> WebSocketStream<tokio::net::TcpStream> {
        let (socket, _) = listener.accept().await.expect("client should connect");
        accept_async(socket).await.expect("websocket handshake should succeed")
    }

    async fn read_text_frames(
        stream: &mut WebSocketStream<tokio::net::TcpStream>,
        count: usize,
    ) -> Vec<String> {
        let mut frames = Vec::with_capacity(count);
        while frames.len() < count {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => frames.push(text),
                Some(Ok(_)) => continue,
                other => panic!("unexpected frame while reading handshake: {other:?}"),
            }
        }
        frames
    }

    #[tokio::test]
    async fn ingests_trade_batches_in_order() {
        let store = OrderBookStore::new();
        let status = status_store();

        let directive =
            handle_message(Message::Text(TRADE_BATCH.to_string()), &store, &status).await;

        assert_eq!(directive, StreamDirective::Continue);
        let trades = store.get_all("AAPL");
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].volume, 100);
        assert_eq!(trades[1].volume, 2500);
        let snapshot = status.read().await.clone();
        assert_eq!(snapshot.trades_ingested, 2);
        assert_eq!(snapshot.last_trade_at, Some(trades[1].timestamp));
    }

    #[tokio::test]
    async fn undecodable_messages_leave_store_untouched() {
        let store = OrderBookStore::new();
        let status = status_store();
        let payloads = [
            "not json at all",
            r#"{"ev":"T","sym":"AAPL","p":1.0,"s":1,"t":0}"#,
            r#"[{"ev":"Q","sym":"AAPL","bp":1.0,"ap":1.1}]"#,
            r#"[{"ev":"status","status":"auth_failed","message":"bad key"}]"#,
        ];

        for payload in payloads {
            let directive =
                handle_message(Message::Text(payload.to_string()), &store, &status).await;
            assert_eq!(directive, StreamDirective::Continue);
        }

        assert!(store.symbols().is_empty());
        assert_eq!(status.read().await.trades_ingested, 0);
    }

    #[tokio::test]
    async fn close_frame_requests_reconnect() {
        let store = OrderBookStore::new();
        let status = status_store();

        let directive = handle_message(Message::Close(None), &store, &status).await;
        assert_eq!(directive, StreamDirective::Reconnect);

        let directive = handle_message(Message::Ping(vec![1, 2]), &store, &status).await;
        assert_eq!(directive, StreamDirective::Continue);
    }

    #[test]
    fn ingest_counts_anomalies() {
        let store = OrderBookStore::new();
        let mut payload = TRADE_BATCH.as_bytes().to_vec();

        let summary = ingest_payload(&mut payload, &store).expect("batch should ingest");

        assert_eq!(summary.appended, 2);
        assert_eq!(summary.anomalies, 1);
        assert_eq!(summary.skipped, 0);
    }

    #[tokio::test]
    async fn handshake_and_ingest_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let endpoint = format!("ws://{}", listener.local_addr().expect("local addr"));
        let store = Arc::new(OrderBookStore::new());
        let status = Arc::new(status_store());
        let cancel_token = CancellationToken::new();

        let feed = tokio::spawn(run_trade_feed(
            test_config(endpoint, Duration::from_millis(200)),
            Arc::clone(&store),
            Arc::clone(&status),
            cancel_token.clone(),
        ));

        let mut server = accept_client(&listener).await;
        let frames = read_text_frames(&mut server, 2).await;
        assert_eq!(frames[0], r#"{"action":"auth","params":"test-key"}"#);
        assert_eq!(frames[1], r#"{"action":"subscribe","params":"T.AAPL,T.GOOG"}"#);

        futures_util::SinkExt::send(&mut server, Message::Text(TRADE_BATCH.to_string()))
            .await
            .expect("server should send batch");

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.trade_count("AAPL") < 2 {
            assert!(Instant::now() < deadline, "trades were not ingested in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status.read().await.state, FeedConnectionState::Subscribed);

        cancel_token.cancel();
        tokio::time::timeout(Duration::from_secs(5), feed)
            .await
            .expect("feed loop should stop after cancellation")
            .expect("feed task should not panic");
        assert_eq!(status.read().await.state, FeedConnectionState::Stopped);
    }

    #[tokio::test]
    async fn reconnects_once_after_fixed_delay_and_replays_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let endpoint = format!("ws://{}", listener.local_addr().expect("local addr"));
        let reconnect_delay = Duration::from_millis(300);
        let status = Arc::new(status_store());
        let cancel_token = CancellationToken::new();

        let feed = tokio::spawn(run_trade_feed(
            test_config(endpoint, reconnect_delay),
            Arc::new(OrderBookStore::new()),
            Arc::clone(&status),
            cancel_token.clone(),
        ));

        let mut first = accept_client(&listener).await;
        let first_handshake = read_text_frames(&mut first, 2).await;
        first.close(None).await.expect("server should close");
        let closed_at = Instant::now();
        drop(first);

        let mut second = tokio::time::timeout(Duration::from_secs(5), accept_client(&listener))
            .await
            .expect("client should reconnect");
        assert!(closed_at.elapsed() >= reconnect_delay);
        let second_handshake = read_text_frames(&mut second, 2).await;
        assert_eq!(first_handshake, second_handshake);
        assert_eq!(status.read().await.reconnect_attempts, 1);

        let extra = tokio::time::timeout(reconnect_delay * 2, listener.accept()).await;
        assert!(extra.is_err(), "no further connection expected while subscribed");

        cancel_token.cancel();
        tokio::time::timeout(Duration::from_secs(5), feed)
            .await
            .expect("feed loop should stop after cancellation")
            .expect("feed task should not panic");
    }

    #[tokio::test]
    async fn keeps_retrying_when_endpoint_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let endpoint = format!("ws://{}", listener.local_addr().expect("local addr"));
        drop(listener);

        let status = Arc::new(status_store());
        let cancel_token = CancellationToken::new();
        let feed = tokio::spawn(run_trade_feed(
            test_config(endpoint, Duration::from_millis(100)),
            Arc::new(OrderBookStore::new()),
            Arc::clone(&status),
            cancel_token.clone(),
        ));

        let deadline = Instant::now() + Duration::from_secs(5);
        while status.read().await.reconnect_attempts < 2 {
            assert!(Instant::now() < deadline, "feed did not retry");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        cancel_token.cancel();
        tokio::time::timeout(Duration::from_secs(5), feed)
            .await
            .expect("feed loop should stop after cancellation")
            .expect("feed task should not panic");
        assert_eq!(status.read().await.state, FeedConnectionState::Stopped);
    }
}
