//! Background eviction of expired rate limit entries.
//!
//! The sweep bounds memory; it is advisory cleanup with its own lifecycle
//! and may be disabled, delayed, or run at any cadence without affecting
//! decisions (logical expiry in the store is the source of truth). Tests
//! that need determinism call `MemoryRateLimitStore::sweep_now` directly.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::store::MemoryRateLimitStore;

/// Handle to a running sweep task.
pub struct Sweeper {
    shutdown: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn a periodic sweep over `store`.
    #[must_use]
    pub fn spawn(store: Arc<MemoryRateLimitStore>, interval: Duration) -> Self {
        let (shutdown, mut rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = store.sweep_now();
                        if removed > 0 {
                            debug!(removed, "evicted expired rate limit entries");
                        }
                    }
                    _ = rx.recv() => break,
                }
            }
        });
        Self { shutdown, handle }
    }

    /// Stop the sweep task and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(()).await;
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforce::store::{RateLimitEntry, RateLimitStore};
    use crate::enforce::unix_ms;

    #[tokio::test]
    async fn sweeper_evicts_expired_entries() {
        let store = Arc::new(MemoryRateLimitStore::new());
        let now = unix_ms();
        store
            .set(
                "stale",
                RateLimitEntry {
                    key: "stale".to_string(),
                    count: 1,
                    window_start_ms: now - 2000,
                    reset_at_ms: now - 1000,
                },
                Duration::ZERO,
            )
            .await
            .expect("set");
        assert_eq!(store.len(), 1);

        let sweeper = Sweeper::spawn(store.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.is_empty());

        sweeper.stop().await;
    }

    #[tokio::test]
    async fn stop_terminates_the_task() {
        let store = Arc::new(MemoryRateLimitStore::new());
        let sweeper = Sweeper::spawn(store, Duration::from_secs(3600));
        sweeper.stop().await;
    }
}
