//! Transaction watchdog.
//!
//! One scheduled callback at a time: arming replaces whatever was pending,
//! stopping drops it. Must be used from within a Tokio runtime.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

#[derive(Debug, Default)]
pub struct TransactionTimer {
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl TransactionTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `on_fire` after `after` unless rearmed or stopped first.
    pub fn arm<F>(&self, after: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        debug!(?after, "Refreshing verification transaction timeout");
        let handle = tokio::spawn(async move {
            sleep(after).await;
            on_fire();
        });
        let previous = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Cancel the pending callback, if any.
    pub fn stop(&self) {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = pending {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for TransactionTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_window() {
        let timer = TransactionTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        timer.arm(Duration::from_secs(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sleep(Duration::from_secs(9)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_pushes_deadline_back() {
        let timer = TransactionTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        timer.arm(Duration::from_secs(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sleep(Duration::from_secs(8)).await;

        let counter = fired.clone();
        timer.arm(Duration::from_secs(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sleep(Duration::from_secs(8)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_fire() {
        let timer = TransactionTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        timer.arm(Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timer.is_armed());
        timer.stop();
        assert!(!timer.is_armed());

        sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
