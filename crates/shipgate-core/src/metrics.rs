//! Global atomic counters for Shipgate observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. on a daemon tick).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters. No allocations, no locking.
pub struct Metrics {
    runs_started: AtomicU64,
    runs_succeeded: AtomicU64,
    runs_failed: AtomicU64,
    runs_rolled_back: AtomicU64,
    requests_forwarded: AtomicU64,
    requests_denied: AtomicU64,
    requests_redirected: AtomicU64,
    requests_unavailable: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub runs_started: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub runs_rolled_back: u64,
    pub requests_forwarded: u64,
    pub requests_denied: u64,
    pub requests_redirected: u64,
    pub requests_unavailable: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_succeeded: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            runs_rolled_back: AtomicU64::new(0),
            requests_forwarded: AtomicU64::new(0),
            requests_denied: AtomicU64::new(0),
            requests_redirected: AtomicU64::new(0),
            requests_unavailable: AtomicU64::new(0),
        }
    }

    pub fn inc_runs_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_runs_succeeded(&self) {
        self.runs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_runs_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_runs_rolled_back(&self) {
        self.runs_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_requests_forwarded(&self) {
        self.requests_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_requests_denied(&self) {
        self.requests_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_requests_redirected(&self) {
        self.requests_redirected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_requests_unavailable(&self) {
        self.requests_unavailable.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "requests_unavailable", "counter incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_succeeded: self.runs_succeeded.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            runs_rolled_back: self.runs_rolled_back.load(Ordering::Relaxed),
            requests_forwarded: self.requests_forwarded.load(Ordering::Relaxed),
            requests_denied: self.requests_denied.load(Ordering::Relaxed),
            requests_redirected: self.requests_redirected.load(Ordering::Relaxed),
            requests_unavailable: self.requests_unavailable.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (daemon tick, shutdown) rather than
    /// on every increment.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            runs_started = s.runs_started,
            runs_succeeded = s.runs_succeeded,
            runs_failed = s.runs_failed,
            runs_rolled_back = s.runs_rolled_back,
            requests_forwarded = s.requests_forwarded,
            requests_denied = s.requests_denied,
            requests_redirected = s.requests_redirected,
            requests_unavailable = s.requests_unavailable,
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.runs_started,
            &self.runs_succeeded,
            &self.runs_failed,
            &self.runs_rolled_back,
            &self.requests_forwarded,
            &self.requests_denied,
            &self.requests_redirected,
            &self.requests_unavailable,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
