//! Global atomic counters for AWE observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a batch).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters with no allocation or locking.
pub struct Metrics {
    episodes_evaluated: AtomicU64,
    batches_evaluated: AtomicU64,
    tracking_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            episodes_evaluated: AtomicU64::new(0),
            batches_evaluated: AtomicU64::new(0),
            tracking_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_episodes_evaluated(&self) {
        self.episodes_evaluated.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "episodes_evaluated", "counter incremented");
    }

    pub fn inc_batches_evaluated(&self) {
        self.batches_evaluated.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "batches_evaluated", "counter incremented");
    }

    /// Count a swallowed tracking sink error.
    pub fn inc_tracking_failures(&self) {
        self.tracking_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "tracking_failures", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            episodes_evaluated = self.episodes_evaluated(),
            batches_evaluated = self.batches_evaluated(),
            tracking_failures = self.tracking_failures(),
        );
    }

    pub fn episodes_evaluated(&self) -> u64 {
        self.episodes_evaluated.load(Ordering::Relaxed)
    }

    pub fn batches_evaluated(&self) -> u64 {
        self.batches_evaluated.load(Ordering::Relaxed)
    }

    pub fn tracking_failures(&self) -> u64 {
        self.tracking_failures.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.episodes_evaluated.store(0, Ordering::Relaxed);
        self.batches_evaluated.store(0, Ordering::Relaxed);
        self.tracking_failures.store(0, Ordering::Relaxed);
    }
}
