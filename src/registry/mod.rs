//! Channel registry
//!
//! Multiplexes change-feed subscriptions from many independent consumers onto
//! one connection per feed name, reference-counts them, and tears connections
//! down when the last consumer leaves.
//!
//! ```text
//!              Arc<ChannelRegistry>
//!         ┌───────────────────────────┐
//!         │ channels: Mutex<HashMap<  │
//!         │   name, ChannelEntry {    │
//!         │     connection,           │◄──── SweepService (every 30s)
//!         │     listener_count,       │      reaps `closed` entries
//!         │   }                       │
//!         │ >                         │
//!         └─────────────┬─────────────┘
//!                       │ open_channel / on_event / activate / close
//!                       ▼
//!                 dyn FeedClient  (SocketFeed | MemoryFeed)
//! ```

mod entry;
pub mod store;
pub mod sweep;

pub use store::{ChannelRegistry, Subscription};
pub use sweep::{SweepHandle, SweepService};
