//! Tracks in-flight connections so a shutdown can close listeners and then
//! wait for every accepted connection to finish before the final flush.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    active: AtomicUsize,
    idle: Notify,
}

/// Cloneable handle shared between a listener's accept loop and the process
/// shutdown path.
#[derive(Clone, Default)]
pub struct ConnTracker {
    inner: Arc<Inner>,
}

/// Held for the lifetime of one accepted connection; dropping it (including
/// via task panic-unwind) marks the connection finished.
pub struct ConnGuard {
    inner: Arc<Inner>,
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        if self.inner.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

impl ConnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one in-flight connection. Keep the returned guard alive for
    /// as long as the connection is being served.
    pub fn track(&self) -> ConnGuard {
        self.inner.active.fetch_add(1, Ordering::AcqRel);
        ConnGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Wait until no connection is in flight.
    pub async fn drain(&self) {
        loop {
            let idle = self.inner.idle.notified();
            if self.inner.active.load(Ordering::Acquire) == 0 {
                return;
            }
            idle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_returns_immediately_with_nothing_in_flight() {
        let tracker = ConnTracker::new();
        tracker.drain().await;
    }

    #[tokio::test]
    async fn drain_waits_for_every_guard_to_drop() {
        let tracker = ConnTracker::new();
        let a = tracker.track();
        let b = tracker.track();

        let drained = Arc::new(tokio::sync::Notify::new());
        let waiter = tokio::spawn({
            let tracker = tracker.clone();
            let drained = Arc::clone(&drained);
            async move {
                tracker.drain().await;
                drained.notify_one();
            }
        });

        tokio::task::yield_now().await;
        drop(a);
        tokio::task::yield_now().await;
        drop(b);

        waiter.await.unwrap();
    }
}
