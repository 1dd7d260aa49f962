//! Background reclamation of expired keys.
//!
//! Reads already hide expired entries, so the sweeper only bounds the memory held by keys that are
//! never read again. It wakes on a fixed interval and purges everything past its deadline through
//! the expiry index, at most [`PURGE_BATCH`] keys per lock acquisition. The lock is released and
//! the task yields between batches so connections are not stalled behind a large purge.

use tokio::sync::watch;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, info};

use crate::store::Store;

/// Largest number of keys removed while the store lock is held.
pub const PURGE_BATCH: usize = 64;

/// Handle to a running sweeper. The task stops when the handle is dropped.
#[derive(Debug)]
pub struct Sweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl Sweeper {
    /// Spawns the sweeper on the current tokio runtime.
    pub fn spawn(store: Store, interval: Duration) -> Sweeper {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweep(store, interval, shutdown_rx));
        info!(interval_ms = interval.as_millis() as u64, "expiry sweeper started");

        Sweeper { shutdown_tx }
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweep(store: Store, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("expiry sweeper stopped");
                    return;
                }
            }
        }

        let (removed, remaining) = purge(&store).await;

        if removed > 0 {
            debug!(removed, remaining, "purged expired keys");
        }
    }
}

/// Purges every expired key in batches and returns the number removed and the number left.
async fn purge(store: &Store) -> (usize, usize) {
    let mut removed = 0;

    loop {
        let (batch, remaining) = {
            let mut store = store.lock();
            (store.purge_expired(PURGE_BATCH), store.len())
        };
        removed += batch;

        if batch < PURGE_BATCH {
            return (removed, remaining);
        }
        tokio::task::yield_now().await;
    }
}
