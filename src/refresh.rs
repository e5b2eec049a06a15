//! Periodic background refresh with atomic snapshot publish
//!
//! A [`SnapshotCell`] holds the current immutable snapshot behind an `Arc`.
//! Refreshes build a complete replacement off to the side and swap it in with
//! a single pointer store, so readers see either the old or the new snapshot
//! in full and never block on a refresh in flight.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};

use crate::shutdown::ShutdownSignal;

/// Latest published snapshot plus refresh bookkeeping
pub struct SnapshotCell<T> {
    current: RwLock<Option<Arc<T>>>,
    refreshed: AtomicBool,
    last_refresh_ms: AtomicI64,
    refreshes: AtomicU64,
    failures: AtomicU64,
}

impl<T> SnapshotCell<T> {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
            refreshed: AtomicBool::new(false),
            last_refresh_ms: AtomicI64::new(0),
            refreshes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Current snapshot, `None` until the first successful publish
    pub fn load(&self) -> Option<Arc<T>> {
        self.current.read().clone()
    }

    /// Swap in a freshly built snapshot
    pub fn publish(&self, snapshot: T, now_ms: i64) {
        *self.current.write() = Some(Arc::new(snapshot));
        self.last_refresh_ms.store(now_ms, Ordering::SeqCst);
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        self.refreshed.store(true, Ordering::SeqCst);
    }

    /// Record a failed refresh; the previous snapshot stays in place
    pub fn mark_failed(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.refreshed.store(false, Ordering::SeqCst);
    }

    /// True when the most recent refresh attempt succeeded
    pub fn is_refreshed(&self) -> bool {
        self.refreshed.load(Ordering::SeqCst)
    }

    /// True once any snapshot has been published
    pub fn is_initialized(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn stats(&self) -> RefreshStats {
        RefreshStats {
            initialized: self.is_initialized(),
            refreshed: self.is_refreshed(),
            last_refresh_ms: self.last_refresh_ms.load(Ordering::SeqCst),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

impl<T> Default for SnapshotCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Refresh bookkeeping exposed on the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct RefreshStats {
    pub initialized: bool,
    pub refreshed: bool,
    pub last_refresh_ms: i64,
    pub refreshes: u64,
    pub failures: u64,
}

/// Something that can rebuild its snapshot on demand
#[async_trait]
pub trait Refreshable: Send + Sync + 'static {
    /// Name used in log lines
    fn name(&self) -> &'static str;

    /// Rebuild and publish; returns whether the refresh succeeded
    async fn refresh(&self) -> bool;
}

/// Run `target.refresh()` every `period` until shutdown
///
/// The first refresh happens immediately.
pub fn spawn_periodic<R: Refreshable>(
    target: Arc<R>,
    period: Duration,
    mut shutdown: ShutdownSignal,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(cache = target.name(), "Refresh loop started with period {:?}", period);

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !target.refresh().await {
                        tracing::warn!(cache = target.name(), "Refresh failed, serving previous snapshot");
                    }
                }
                _ = shutdown.recv() => {
                    break;
                }
            }
        }

        tracing::info!(cache = target.name(), "Refresh loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_cell_publish_and_failure() {
        let cell: SnapshotCell<Vec<u32>> = SnapshotCell::new();
        assert!(!cell.is_initialized());
        assert!(!cell.is_refreshed());
        assert!(cell.load().is_none());

        cell.publish(vec![1, 2], 100);
        assert!(cell.is_initialized());
        assert!(cell.is_refreshed());

        let held = cell.load().unwrap();
        cell.mark_failed();
        assert!(!cell.is_refreshed());
        assert_eq!(*cell.load().unwrap(), vec![1, 2]);

        cell.publish(vec![3], 200);
        // Readers holding the old Arc keep a complete old snapshot
        assert_eq!(*held, vec![1, 2]);
        assert_eq!(*cell.load().unwrap(), vec![3]);

        let stats = cell.stats();
        assert_eq!(stats.refreshes, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.last_refresh_ms, 200);
    }

    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Refreshable for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn refresh(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[tokio::test]
    async fn test_spawn_periodic_refreshes_and_stops() {
        let target = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let (trigger, signal) = shutdown::channel();
        let handle = spawn_periodic(Arc::clone(&target), Duration::from_millis(10), signal);

        tokio::time::sleep(Duration::from_millis(55)).await;
        trigger.trigger();
        handle.await.unwrap();

        assert!(target.calls.load(Ordering::SeqCst) >= 2);
    }
}
