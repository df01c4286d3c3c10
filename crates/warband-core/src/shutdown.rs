//! Cooperative shutdown signal shared by every loop.
//!
//! Loops check [`ShutdownSignal::is_triggered`] before starting a tick and
//! sleep through [`ShutdownSignal::sleep`], which returns early once a
//! shutdown is requested. Work already in flight is never cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

/// A one-way stop flag with wakeup.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    triggered: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    /// A signal that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every waiter. Idempotent.
    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::AcqRel) {
            tracing::info!("Shutdown requested");
        }
        self.notify.notify_waiters();
    }

    /// Whether shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// Wait until shutdown is requested.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }

    /// Sleep for `duration` unless shutdown fires first.
    ///
    /// Returns `true` when the sleep was cut short by shutdown.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        tokio::select! {
            () = tokio::time::sleep(duration) => self.is_triggered(),
            () = self.wait() => true,
        }
    }
}
