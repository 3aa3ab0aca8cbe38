use crate::error::AppError;
use crate::market::order_book::OrderBookStore;
use crate::market::pipeline::run_trade_feed;
use crate::market::types::{
    default_symbols, FeedConnectionState, FeedStatusSnapshot, StartTradeFeedArgs,
    TradeFeedConfig, TradeFeedSession, TradeFeedStopResult,
};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct TradeFeedHandle {
    pub config: TradeFeedConfig,
    pub cancellation_token: CancellationToken,
    pub join_handle: JoinHandle<()>,
}

/// Owns the single streaming connection of the process. At most one feed loop
/// is active per client, no matter how often `start` is called.
pub struct TradeFeedClient {
    store: Arc<OrderBookStore>,
    status: Arc<RwLock<FeedStatusSnapshot>>,
    active: Mutex<Option<TradeFeedHandle>>,
}

impl TradeFeedClient {
    pub fn new(store: Arc<OrderBookStore>) -> Self {
        Self {
            store,
            status: Arc::new(RwLock::new(FeedStatusSnapshot::idle(default_symbols()))),
            active: Mutex::new(None),
        }
    }

    pub async fn start(&self, args: StartTradeFeedArgs) -> Result<TradeFeedSession, AppError> {
        let mut slot = self.active.lock().await;
        if let Some(handle) = slot.as_ref() {
            if !handle.join_handle.is_finished() {
                tracing::info!("trade feed already running; ignoring start request");
                return Ok(TradeFeedSession::from_config(&handle.config, true));
            }
        }
        if let Some(finished) = slot.take() {
            let _ = finished.join_handle.await;
        }

        let config = match args.normalize() {
            Ok(config) => config,
            Err(error) => {
                tracing::error!(%error, "trade feed not started");
                if matches!(error, AppError::MissingCredential(_)) {
                    let mut writable = self.status.write().await;
                    writable.state = FeedConnectionState::Disabled;
                    writable.reason = Some(error.to_string());
                }
                return Err(error);
            }
        };

        {
            let mut writable = self.status.write().await;
            *writable = FeedStatusSnapshot::idle(config.symbols.clone());
        }

        let cancellation_token = CancellationToken::new();
        let join_handle = tokio::spawn(run_trade_feed(
            config.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.status),
            cancellation_token.clone(),
        ));

        tracing::info!(symbols = ?config.symbols, endpoint = %config.endpoint, "trade feed started");
        let session = TradeFeedSession::from_config(&config, false);
        *slot = Some(TradeFeedHandle {
            config,
            cancellation_token,
            join_handle,
        });

        Ok(session)
    }

    /// Cancels the active loop and waits for it to close its socket. The slot
    /// stays locked until then, so a concurrent `start` cannot open a second
    /// connection or race the old loop's final status write.
    pub async fn stop(&self) -> TradeFeedStopResult {
        let mut slot = self.active.lock().await;

        let stopped = if let Some(handle) = slot.take() {
            handle.cancellation_token.cancel();
            let _ = handle.join_handle.await;
            true
        } else {
            false
        };
        drop(slot);

        if stopped {
            tracing::info!("trade feed stopped by request");
        }
        TradeFeedStopResult { stopped }
    }

    pub async fn is_running(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.join_handle.is_finished())
    }

    pub async fn status(&self) -> FeedStatusSnapshot {
        self.status.read().await.clone()
    }

    pub fn store(&self) -> &Arc<OrderBookStore> {
        &self.store
    }
}
