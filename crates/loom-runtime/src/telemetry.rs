// SPDX-License-Identifier: MIT OR Apache-2.0
//! Telemetry: dispatcher metrics and tracing initialisation.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use tracing_subscriber::EnvFilter;

/// Atomic dispatch-level metrics that can be shared across workers.
pub struct DispatcherMetrics {
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    idempotent_hits: AtomicU64,
    /// Cumulative duration used to compute the running average.
    cumulative_duration_ms: AtomicU64,
    average_duration_ms: AtomicU64,
}

impl DispatcherMetrics {
    /// Create a new, zero-initialised metrics collector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dispatched: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            idempotent_hits: AtomicU64::new(0),
            cumulative_duration_ms: AtomicU64::new(0),
            average_duration_ms: AtomicU64::new(0),
        }
    }

    /// Record the outcome of one handled message.
    pub fn record_dispatch(&self, duration_ms: u64, success: bool) {
        let total = self.dispatched.fetch_add(1, Relaxed) + 1;
        if success {
            self.succeeded.fetch_add(1, Relaxed);
        } else {
            self.failed.fetch_add(1, Relaxed);
        }
        let cumulative = self.cumulative_duration_ms.fetch_add(duration_ms, Relaxed) + duration_ms;
        self.average_duration_ms.store(cumulative / total, Relaxed);
    }

    /// Record an idempotency short-circuit (not counted as a dispatch).
    pub fn record_idempotent_hit(&self) {
        self.idempotent_hits.fetch_add(1, Relaxed);
    }

    /// Take a point-in-time snapshot of the current metric values.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            dispatched: self.dispatched.load(Relaxed),
            succeeded: self.succeeded.load(Relaxed),
            failed: self.failed.load(Relaxed),
            idempotent_hits: self.idempotent_hits.load(Relaxed),
            average_duration_ms: self.average_duration_ms.load(Relaxed),
        }
    }
}

impl Default for DispatcherMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-atomic, serialisable snapshot of [`DispatcherMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Messages handed to handlers.
    pub dispatched: u64,
    /// Invocations that completed successfully.
    pub succeeded: u64,
    /// Invocations that failed (before retries resolve them).
    pub failed: u64,
    /// Messages short-circuited by the idempotency store.
    pub idempotent_hits: u64,
    /// Running average of handling duration in milliseconds.
    pub average_duration_ms: u64,
}

/// Initialise process-wide tracing from `LOOM_LOG` (falling back to
/// `RUST_LOG`, then `info`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOOM_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_dispatches() {
        let metrics = DispatcherMetrics::new();
        metrics.record_dispatch(100, true);
        metrics.record_dispatch(300, false);
        metrics.record_idempotent_hit();

        let snap = metrics.snapshot();
        assert_eq!(snap.dispatched, 2);
        assert_eq!(snap.succeeded, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.idempotent_hits, 1);
        assert_eq!(snap.average_duration_ms, 200);
    }

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
