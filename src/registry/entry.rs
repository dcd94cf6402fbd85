//! Per-channel registry state

use std::sync::Arc;
use std::time::Instant;

use crate::feed::FeedConnection;
use crate::models::{ChannelSnapshot, ChannelState};

/// Entry for a single logical feed in the registry
pub(super) struct ChannelEntry {
    /// Shared connection, owned by this entry alone
    pub(super) connection: Arc<dyn FeedConnection>,

    /// Number of outstanding subscriptions
    pub(super) listener_count: usize,

    /// Which lifetime of this name the entry belongs to
    pub(super) generation: u64,

    /// When the entry was created
    pub(super) created_at: Instant,
}

impl ChannelEntry {
    pub(super) fn new(connection: Arc<dyn FeedConnection>, generation: u64) -> Self {
        Self {
            connection,
            listener_count: 0,
            generation,
            created_at: Instant::now(),
        }
    }

    /// Transport state, polled from the connection
    pub(super) fn state(&self) -> ChannelState {
        self.connection.state()
    }

    pub(super) fn snapshot(&self, name: &str) -> ChannelSnapshot {
        ChannelSnapshot {
            name: name.to_string(),
            listeners: self.listener_count,
            state: self.state(),
            generation: self.generation,
            age_secs: self.created_at.elapsed().as_secs(),
        }
    }
}
