//! Channel registry implementation
//!
//! Deduplicates subscriptions to the same logical feed across independent
//! consumers. The first subscriber for a name opens the connection, later
//! ones multiplex onto it, and the last one out closes it.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::entry::ChannelEntry;
use crate::config::RegistryConfig;
use crate::error::{RealtimeError, Result};
use crate::feed::{FeedClient, Listener, ListenerId};
use crate::models::{ChangeEvent, ChannelSnapshot, ChannelState, EventFilter, RegistryStats};

/// Process-wide registry of shared change-feed connections
///
/// Subscribe, unsubscribe and sweep each hold the map lock for their whole
/// lookup-mutate-store sequence. Listener callbacks are never invoked while
/// it is held, so a callback may subscribe or unsubscribe freely.
pub struct ChannelRegistry {
    /// Feed client that opens connections
    client: Arc<dyn FeedClient>,

    /// Map of feed name to entry
    channels: Mutex<HashMap<String, ChannelEntry>>,

    /// Configuration
    config: RegistryConfig,

    next_generation: AtomicU64,
    created: AtomicU64,
    removed: AtomicU64,
    reaped: AtomicU64,
}

impl ChannelRegistry {
    /// Create a registry with default configuration
    pub fn new(client: Arc<dyn FeedClient>) -> Self {
        Self::with_config(client, RegistryConfig::default())
    }

    /// Create a registry with custom configuration
    pub fn with_config(client: Arc<dyn FeedClient>, config: RegistryConfig) -> Self {
        Self {
            client,
            channels: Mutex::new(HashMap::new()),
            config,
            next_generation: AtomicU64::new(1),
            created: AtomicU64::new(0),
            removed: AtomicU64::new(0),
            reaped: AtomicU64::new(0),
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Subscribe `callback` to every change event on the feed `name`.
    ///
    /// Returns immediately; the connection comes up in the background.
    /// Connection failures are not reported here, only the empty name is.
    pub fn subscribe<F>(self: &Arc<Self>, name: &str, callback: F) -> Result<Subscription>
    where
        F: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        self.subscribe_listener(name, Arc::new(callback))
    }

    /// Like [`subscribe`](Self::subscribe) with an already shared listener
    pub fn subscribe_listener(
        self: &Arc<Self>,
        name: &str,
        listener: Listener,
    ) -> Result<Subscription> {
        if name.is_empty() {
            return Err(RealtimeError::InvalidChannelName(name.to_string()));
        }

        let mut channels = self.channels.lock();

        let entry = match channels.entry(name.to_string()) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => {
                let connection = self.client.open_channel(name);
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                self.created.fetch_add(1, Ordering::Relaxed);

                info!(channel = %name, generation, "Channel created");
                vacant.insert(ChannelEntry::new(connection, generation))
            }
        };

        let listener_id = entry.connection.on_event(EventFilter::all(), listener);
        entry.listener_count += 1;

        // Re-issued on every subscribe; the transport ignores redundant calls.
        entry.connection.activate();

        debug!(
            channel = %name,
            listeners = entry.listener_count,
            state = %entry.state(),
            "Subscriber added"
        );

        Ok(Subscription {
            registry: Arc::downgrade(self),
            name: name.to_string(),
            generation: entry.generation,
            listener: listener_id,
            released: AtomicBool::new(false),
        })
    }

    /// Drop one subscriber from `name`, closing the connection at zero.
    ///
    /// No-op if the name is gone or now belongs to a newer entry.
    fn release(&self, name: &str, generation: u64, listener: ListenerId) {
        let mut channels = self.channels.lock();

        let Some(entry) = channels.get_mut(name) else {
            debug!(channel = %name, "Unsubscribe for absent channel ignored");
            return;
        };
        if entry.generation != generation {
            debug!(
                channel = %name,
                stale = generation,
                current = entry.generation,
                "Unsubscribe for replaced channel ignored"
            );
            return;
        }

        entry.connection.remove_listener(listener);
        entry.listener_count = entry.listener_count.saturating_sub(1);

        debug!(
            channel = %name,
            listeners = entry.listener_count,
            "Subscriber removed"
        );

        if entry.listener_count == 0 {
            if let Some(entry) = channels.remove(name) {
                entry.connection.close();
                self.removed.fetch_add(1, Ordering::Relaxed);
                info!(channel = %name, generation, "Channel removed");
            }
        }
    }

    /// Run one health sweep
    ///
    /// Removes every entry whose connection reports `Closed`, regardless of
    /// how many subscribers it still has. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let mut channels = self.channels.lock();
        let before = channels.len();

        channels.retain(|name, entry| {
            if !entry.state().is_closed() {
                return true;
            }

            entry.connection.close();
            self.reaped.fetch_add(1, Ordering::Relaxed);
            warn!(
                channel = %name,
                generation = entry.generation,
                listeners = entry.listener_count,
                age_secs = entry.created_at.elapsed().as_secs(),
                "Dead channel reaped by sweep"
            );
            false
        });

        before - channels.len()
    }

    /// Number of subscribers on `name`, if it is registered
    pub fn listener_count(&self, name: &str) -> Option<usize> {
        self.channels.lock().get(name).map(|e| e.listener_count)
    }

    /// Transport state of `name`, if it is registered
    pub fn channel_state(&self, name: &str) -> Option<ChannelState> {
        self.channels.lock().get(name).map(|e| e.state())
    }

    /// Check if a channel is registered
    pub fn contains(&self, name: &str) -> bool {
        self.channels.lock().contains_key(name)
    }

    /// Get total number of channels
    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }

    /// Snapshot of one channel
    pub fn channel(&self, name: &str) -> Option<ChannelSnapshot> {
        self.channels.lock().get(name).map(|e| e.snapshot(name))
    }

    /// Snapshot of every channel, sorted by name
    pub fn snapshot(&self) -> Vec<ChannelSnapshot> {
        let mut snapshots: Vec<ChannelSnapshot> = self
            .channels
            .lock()
            .iter()
            .map(|(name, entry)| entry.snapshot(name))
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Registry counters
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            active_channels: self.len(),
            channels_created: self.created.load(Ordering::Relaxed),
            channels_removed: self.removed.load(Ordering::Relaxed),
            channels_reaped: self.reaped.load(Ordering::Relaxed),
        }
    }
}

/// Disposer returned by [`ChannelRegistry::subscribe`]
///
/// Calling [`unsubscribe`](Self::unsubscribe) is the only way to release the
/// subscription; dropping it leaves the subscriber counted.
#[must_use = "the channel stays subscribed until `unsubscribe` is called"]
pub struct Subscription {
    registry: Weak<ChannelRegistry>,
    name: String,
    generation: u64,
    listener: ListenerId,
    released: AtomicBool,
}

impl Subscription {
    /// Feed name this subscription is on
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `unsubscribe` has not been called yet
    pub fn is_active(&self) -> bool {
        !self.released.load(Ordering::Acquire)
    }

    /// Release the subscription. Calls after the first do nothing.
    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.release(&self.name, self.generation, self.listener);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("generation", &self.generation)
            .field("active", &self.is_active())
            .finish()
    }
}
