// SPDX-License-Identifier: MIT OR Apache-2.0
//! loom-resilience
//!
//! Resilience primitives shared by the queue and the dispatcher:
//! retry with exponential backoff, deadline enforcement, a three-state
//! circuit breaker, and a token-bucket rate limiter.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Three-state circuit breaker.
pub mod breaker;
/// Token-bucket rate limiter.
pub mod ratelimit;
/// Retry policies with exponential backoff.
pub mod retry;
/// Deadline enforcement for async operations.
pub mod timeout;

pub use breaker::{BreakerConfig, BreakerError, BreakerState, CircuitBreaker};
pub use ratelimit::RateLimiter;
pub use retry::{RetryError, RetryPolicy, RetryPolicyBuilder};
pub use timeout::{with_timeout, TimeoutError};
