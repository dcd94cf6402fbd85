//! POS Realtime - Channel Multiplexing Registry
//!
//! Shares one realtime change-feed connection per channel name across any
//! number of in-process subscribers.
//!
//! ## Features
//!
//! - Reference-counted channel registry with idempotent unsubscribe handles
//! - Periodic sweep of channels whose transport has closed
//! - Phoenix-protocol socket feed for Postgres change events
//! - In-memory feed for tests and offline runs
//! - Relay server exposing registry status and a WebSocket change feed

pub mod api;
pub mod config;
pub mod error;
pub mod feed;
pub mod models;
pub mod registry;

pub use config::Config;
pub use error::{RealtimeError, Result};
pub use registry::{ChannelRegistry, Subscription};
