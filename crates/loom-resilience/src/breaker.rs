// SPDX-License-Identifier: MIT OR Apache-2.0
//! Three-state circuit breaker.
//!
//! Transitions: `closed → open` on `failure_threshold` consecutive
//! failures; `open → half-open` once `timeout` elapses; `half-open →
//! closed` on `success_threshold` consecutive successes; `half-open →
//! open` when the admitted probe attempts are spent without reaching the
//! success threshold.  While open, calls fail fast without attempting.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Breaker tuning knobs.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that trip a closed breaker.
    pub failure_threshold: u32,
    /// Consecutive successes that close a half-open breaker.
    pub success_threshold: u32,
    /// How long an open breaker rejects before admitting a probe.
    pub timeout: Duration,
    /// Probe attempts admitted while half-open.
    pub half_open_requests: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            half_open_requests: 3,
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls flow through; consecutive failures are counted.
    Closed,
    /// Calls fail fast.
    Open,
    /// A bounded number of probe calls are admitted.
    HalfOpen,
}

/// Error from a breaker-guarded call.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker rejected the call without attempting it.
    #[error("circuit breaker is open")]
    Open,
    /// The underlying operation failed (counted against the breaker).
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_attempts: u32,
    opened_at: Option<Instant>,
}

/// A three-state circuit breaker guarding one downstream dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker with the given configuration.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                half_open_attempts: 0,
                opened_at: None,
            }),
        }
    }

    /// Current state, promoting `open` to `half-open` if the open timeout
    /// has elapsed.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.promote_if_elapsed(&mut inner);
        inner.state
    }

    /// Run `fut` under the breaker.
    ///
    /// Returns [`BreakerError::Open`] without polling the future when the
    /// breaker rejects the call.
    pub async fn call<T, E, Fut>(&self, fut: Fut) -> Result<T, BreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.admit() {
            return Err(BreakerError::Open);
        }
        match fut.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    fn admit(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.promote_if_elapsed(&mut inner);
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                if inner.half_open_attempts >= self.config.half_open_requests {
                    // Probes spent without closing; arm another open window.
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    return false;
                }
                inner.half_open_attempts += 1;
                true
            }
        }
    }

    fn promote_if_elapsed(&self, inner: &mut Inner) {
        if inner.state == BreakerState::Open {
            let elapsed = inner
                .opened_at
                .is_some_and(|t| t.elapsed() >= self.config.timeout);
            if elapsed {
                debug!(target: "loom.resilience", "breaker open timeout elapsed, probing");
                inner.state = BreakerState::HalfOpen;
                inner.half_open_successes = 0;
                inner.half_open_attempts = 0;
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            BreakerState::Closed => inner.consecutive_failures = 0,
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    debug!(target: "loom.resilience", "breaker closed after successful probes");
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(target: "loom.resilience", failures = inner.consecutive_failures, "breaker tripped open");
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                // A failure breaks the consecutive-success run; once the
                // admitted probes are spent without closing, trip back open.
                inner.half_open_successes = 0;
                if inner.half_open_attempts >= self.config.half_open_requests {
                    warn!(target: "loom.resilience", "probes exhausted, breaker re-opened");
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Open => {}
        }
    }
}
