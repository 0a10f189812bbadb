//! Background Expiry Sweeper
//!
//! Reads already hide expired keys, but a key that expires and is never
//! touched again would sit in memory forever. The sweeper is a Tokio task
//! that wakes up on a fixed interval and asks the driver to evict every
//! expired key.
//!
//! Sweeping only reclaims space. It never changes what a read observes and
//! never reports errors.

use crate::storage::MemoryDriver;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// A handle to a running sweeper.
///
/// The sweeper stops when the handle is dropped.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
    storage: String,
}

impl ExpirySweeper {
    /// Starts sweeping `driver` every `interval`.
    ///
    /// `storage` is the registered name, used only for logging.
    pub fn start(driver: Arc<MemoryDriver>, storage: impl Into<String>, interval: Duration) -> Self {
        let storage = storage.into();
        // tokio's interval panics on zero
        let interval = interval.max(Duration::from_millis(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(driver, storage.clone(), interval, shutdown_rx));

        info!(storage = %storage, interval_ms = interval.as_millis() as u64, "Expiry sweeper started");

        Self {
            shutdown_tx,
            storage,
        }
    }

    /// Stops the sweeper. Called automatically on drop.
    pub fn stop(&self) {
        if self.shutdown_tx.send(true).is_ok() {
            info!(storage = %self.storage, "Expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    driver: Arc<MemoryDriver>,
    storage: String,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!(storage = %storage, "Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let evicted = driver.sweep_expired();

        if evicted > 0 {
            debug!(
                storage = %storage,
                evicted = evicted,
                keys_remaining = driver.len(),
                "Expired keys evicted"
            );
        }
    }
}
