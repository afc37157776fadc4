//! Join barrier shared by every worker of every tenant.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Counts live workers across all generations and lets shutdown wait for zero.
#[derive(Debug, Default)]
pub struct WorkerTracker {
    live: AtomicUsize,
    spawned: AtomicU64,
    idle: Notify,
}

/// Registration of one live worker; releases the barrier when dropped.
#[derive(Debug)]
pub struct WorkerGuard {
    tracker: Arc<WorkerTracker>,
}

impl WorkerTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a worker before it is spawned.
    pub fn register(self: &Arc<Self>) -> WorkerGuard {
        self.live.fetch_add(1, Ordering::AcqRel);
        self.spawned.fetch_add(1, Ordering::Relaxed);
        WorkerGuard {
            tracker: Arc::clone(self),
        }
    }

    /// Workers that have been registered and not yet exited.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Workers ever registered.
    pub fn spawned_total(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    /// Wait until no worker is live. Returns immediately if none are.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.live() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if self.tracker.live.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_idle_with_no_workers_returns() {
        let tracker = WorkerTracker::new();
        tokio::time::timeout(Duration::from_millis(100), tracker.wait_idle())
            .await
            .expect("wait_idle blocked with zero workers");
    }

    #[tokio::test]
    async fn test_wait_idle_blocks_until_last_guard_drops() {
        let tracker = WorkerTracker::new();
        let first = tracker.register();
        let second = tracker.register();
        assert_eq!(tracker.live(), 2);

        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.wait_idle().await })
        };

        drop(first);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(second);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter not released")
            .unwrap();
        assert_eq!(tracker.live(), 0);
        assert_eq!(tracker.spawned_total(), 2);
    }
}
