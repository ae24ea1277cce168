//! In-flight operation tracking.
//!
//! [`Wait`] counts operations that are in progress and lets a closer wait for
//! the count to drop to zero, optionally with a timeout.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Counter of in-flight operations.
#[derive(Debug, Default)]
pub struct Wait {
    count: AtomicUsize,
    notify: Notify,
}

impl Wait {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one in-flight operation. It ends when the guard is dropped.
    pub fn add(&self) -> WaitGuard<'_> {
        self.count.fetch_add(1, Ordering::AcqRel);
        WaitGuard { wait: self }
    }

    /// Number of operations currently in flight.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Waits until no operation is in flight.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent `done` cannot be missed
            notified.as_mut().enable();

            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Waits until no operation is in flight or `timeout` elapses.
    ///
    /// Returns `true` if everything drained in time.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.notify.notify_waiters();
        }
    }
}

/// Marks the end of an in-flight operation when dropped.
#[derive(Debug)]
pub struct WaitGuard<'a> {
    wait: &'a Wait,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.wait.done();
    }
}
