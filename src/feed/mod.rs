//! Realtime feed client
//!
//! The registry sits on top of a generic change-feed client. A client opens
//! one connection per logical feed name; each connection fans events out to
//! the listeners registered on it.
//!
//! Every method here is synchronous and must not block: handshakes and socket
//! writes run on tasks owned by the implementation. Implementations must not
//! invoke listeners while holding a lock a listener could re-enter.

pub mod memory;
pub mod phoenix;
pub mod socket;

pub use memory::{MemoryConnection, MemoryFeed};
pub use socket::SocketFeed;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::models::{ChangeEvent, ChannelState, EventFilter};

/// Callback invoked with each change event a connection delivers
pub type Listener = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Handle for a listener registered on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Allocate a process-unique listener id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Factory for change-feed connections
pub trait FeedClient: Send + Sync {
    /// Create a new, not yet activated connection for `name`
    fn open_channel(&self, name: &str) -> Arc<dyn FeedConnection>;
}

/// A live subscription to one logical change feed
pub trait FeedConnection: Send + Sync {
    /// Register a listener for events matching `filter`
    fn on_event(&self, filter: EventFilter, listener: Listener) -> ListenerId;

    /// Detach a previously registered listener. Unknown ids are ignored.
    fn remove_listener(&self, id: ListenerId);

    /// Start (or restart) delivery. Redundant calls are tolerated.
    fn activate(&self);

    /// Tear the connection down
    fn close(&self);

    /// Current transport state, polled
    fn state(&self) -> ChannelState;
}

/// Listener table shared by the feed implementations
#[derive(Default)]
pub(crate) struct ListenerSet {
    entries: parking_lot::Mutex<Vec<(ListenerId, EventFilter, Listener)>>,
}

impl ListenerSet {
    pub(crate) fn add(&self, filter: EventFilter, listener: Listener) -> ListenerId {
        let id = ListenerId::next();
        self.entries.lock().push((id, filter, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) {
        self.entries.lock().retain(|(existing, _, _)| *existing != id);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Deliver `event` to every matching listener. Returns the number called.
    pub(crate) fn dispatch(&self, event: &ChangeEvent) -> usize {
        // Snapshot first so listeners run without the lock held.
        let targets: Vec<Listener> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, filter, _)| filter.matches(event))
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();

        for listener in &targets {
            listener(event.clone());
        }
        targets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangeKind, EventKind};
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_listener_ids_unique() {
        let a = ListenerId::next();
        let b = ListenerId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_listener_set_dispatch_filters() {
        let set = ListenerSet::default();
        let inserts = Arc::new(AtomicUsize::new(0));
        let all = Arc::new(AtomicUsize::new(0));

        let counter = inserts.clone();
        set.add(
            EventFilter::all().with_event(EventKind::Insert),
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let counter = all.clone();
        let all_id = set.add(
            EventFilter::all(),
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let update = ChangeEvent::new("orders", ChangeKind::Update, "orders");
        assert_eq!(set.dispatch(&update), 1);

        let insert = ChangeEvent::new("orders", ChangeKind::Insert, "orders");
        assert_eq!(set.dispatch(&insert), 2);

        set.remove(all_id);
        assert_eq!(set.len(), 1);
        assert_eq!(set.dispatch(&insert), 1);

        assert_eq!(inserts.load(Ordering::SeqCst), 2);
        assert_eq!(all.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_listener_may_mutate_set_during_dispatch() {
        let set = Arc::new(ListenerSet::default());
        let inner = set.clone();
        set.add(
            EventFilter::all(),
            Arc::new(move |_| {
                inner.add(EventFilter::all(), Arc::new(|_| {}));
            }),
        );

        let event = ChangeEvent::new("orders", ChangeKind::Insert, "orders");
        assert_eq!(set.dispatch(&event), 1);
        assert_eq!(set.len(), 2);
    }
}
