//! WebSocket handlers
//!
//! Uses bounded channels with try_send so a slow client cannot stall the feed.

pub mod feed;

/// Maximum number of messages to buffer per WebSocket connection
pub const WS_BUFFER_SIZE: usize = 256;
