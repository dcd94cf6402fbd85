//! In-process change feed
//!
//! Used as the injectable fake in tests and when the relay runs without a
//! backend. Events are pushed with [`MemoryFeed::publish`] or
//! [`MemoryConnection::emit`]; transport death is simulated with
//! [`MemoryConnection::set_state`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{FeedClient, FeedConnection, Listener, ListenerId, ListenerSet};
use crate::models::{ChangeEvent, ChannelState, EventFilter};

/// What `activate()` does to a memory connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
    /// Handshake succeeds immediately
    #[default]
    Open,
    /// Handshake never completes
    Stall,
    /// Handshake fails
    Fail,
}

#[derive(Default)]
struct FeedCounters {
    opened: AtomicU64,
    closed: AtomicU64,
}

/// In-process [`FeedClient`]
#[derive(Default)]
pub struct MemoryFeed {
    channels: RwLock<HashMap<String, Arc<MemoryConnection>>>,
    activation: RwLock<Activation>,
    counters: Arc<FeedCounters>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed whose connections activate with the given outcome
    pub fn with_activation(activation: Activation) -> Self {
        let feed = Self::default();
        *feed.activation.write() = activation;
        feed
    }

    /// Change the outcome for connections opened from now on
    pub fn set_activation(&self, activation: Activation) {
        *self.activation.write() = activation;
    }

    /// Number of connections opened so far
    pub fn opened(&self) -> u64 {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Number of `close()` calls across all connections
    pub fn closed(&self) -> u64 {
        self.counters.closed.load(Ordering::SeqCst)
    }

    /// Most recently opened connection for `name`
    pub fn channel(&self, name: &str) -> Option<Arc<MemoryConnection>> {
        self.channels.read().get(name).cloned()
    }

    /// Push an event into the latest connection for `name`.
    /// Returns the number of listeners that received it.
    pub fn publish(&self, name: &str, event: ChangeEvent) -> usize {
        match self.channel(name) {
            Some(conn) => conn.emit(event),
            None => 0,
        }
    }
}

impl FeedClient for MemoryFeed {
    fn open_channel(&self, name: &str) -> Arc<dyn FeedConnection> {
        let serial = self.counters.opened.fetch_add(1, Ordering::SeqCst) + 1;
        let conn = Arc::new(MemoryConnection {
            name: name.to_string(),
            serial,
            activation: *self.activation.read(),
            state: Mutex::new(ChannelState::Connecting),
            listeners: ListenerSet::default(),
            activations: AtomicU64::new(0),
            counters: Arc::clone(&self.counters),
        });

        debug!(channel = %name, serial, "Memory channel opened");
        self.channels
            .write()
            .insert(name.to_string(), Arc::clone(&conn));
        conn
    }
}

/// Connection produced by [`MemoryFeed`]
pub struct MemoryConnection {
    name: String,
    serial: u64,
    activation: Activation,
    state: Mutex<ChannelState>,
    listeners: ListenerSet,
    activations: AtomicU64,
    counters: Arc<FeedCounters>,
}

impl MemoryConnection {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open order of this connection within its feed, starting at 1
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Number of `activate()` calls received
    pub fn activations(&self) -> u64 {
        self.activations.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Force the transport state, e.g. to simulate a dropped socket
    pub fn set_state(&self, state: ChannelState) {
        *self.state.lock() = state;
    }

    /// Deliver an event to matching listeners if the connection is open
    pub fn emit(&self, event: ChangeEvent) -> usize {
        if *self.state.lock() != ChannelState::Open {
            return 0;
        }
        self.listeners.dispatch(&event)
    }
}

impl FeedConnection for MemoryConnection {
    fn on_event(&self, filter: EventFilter, listener: Listener) -> ListenerId {
        self.listeners.add(filter, listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.remove(id);
    }

    fn activate(&self) {
        self.activations.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.lock();
        if *state != ChannelState::Connecting {
            return;
        }
        *state = match self.activation {
            Activation::Open => ChannelState::Open,
            Activation::Stall => ChannelState::Connecting,
            Activation::Fail => ChannelState::Closed,
        };
    }

    fn close(&self) {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = ChannelState::Closed;
        self.listeners.clear();
    }

    fn state(&self) -> ChannelState {
        *self.state.lock()
    }
}
