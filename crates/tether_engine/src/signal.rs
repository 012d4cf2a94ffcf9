//! The process-queue signal.
//!
//! Raised whenever the queue should drain: on a transition to online and on
//! explicit sync requests. Raises that happen while nobody waits are kept as a
//! single pending permit, so bursts collapse into one drain.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// Wakes the queue worker.
#[derive(Debug, Default)]
pub struct ProcessQueueSignal {
    notify: Notify,
    raised: AtomicU64,
}

impl ProcessQueueSignal {
    /// Creates a signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a drain.
    pub fn raise(&self) {
        self.raised.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
        tracing::debug!("process-queue signal raised");
    }

    /// Waits until the signal is raised.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    /// Number of times the signal was raised.
    pub fn raised_count(&self) -> u64 {
        self.raised.load(Ordering::Relaxed)
    }
}
