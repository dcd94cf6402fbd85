//! Periodic health sweep
//!
//! Transports can die without anyone unsubscribing. The sweep drops entries
//! whose connection reports `Closed` so the next subscribe for that name gets
//! a fresh connection instead of the dead one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, instrument};

use super::store::ChannelRegistry;

/// Sweep service
pub struct SweepService {
    registry: Arc<ChannelRegistry>,
    interval: Duration,
}

impl SweepService {
    /// Create a sweep service using the registry's configured interval
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        let interval = registry.config().sweep_interval;
        Self { registry, interval }
    }

    /// Override the sweep interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the sweep loop (call in a spawned task)
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting channel sweep with {}ms interval",
            self.interval.as_millis()
        );

        let mut sweep_interval = interval(self.interval);
        sweep_interval.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = sweep_interval.tick() => {
                    let reaped = self.registry.sweep();
                    if reaped > 0 {
                        info!("Sweep reaped {} dead channels", reaped);
                    } else {
                        debug!("Sweep found no dead channels");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Channel sweep shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Handle for stopping the sweep service
pub struct SweepHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl SweepHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for SweepHandle {
    fn default() -> Self {
        Self::new().0
    }
}
