pub mod alerts;
pub mod feed_client;
pub mod order_book;
pub mod pipeline;
pub mod polygon;
pub mod types;

/// Capacity of the broadcast channel bridging alerts to push transports.
pub const ALERT_CHANNEL_CAPACITY: usize = 256;
