// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deadline enforcement for async operations.
//!
//! The contract is about *returning* by the deadline: cancellation of the
//! underlying work is best-effort (the future is dropped, which cancels at
//! its next suspension point).

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// An operation did not complete by its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation timed out after {}ms", .limit.as_millis())]
pub struct TimeoutError {
    /// The enforced deadline.
    pub limit: Duration,
}

/// Race `fut` against a timer, failing with [`TimeoutError`] on expiry.
pub async fn with_timeout<T>(
    limit: Duration,
    fut: impl Future<Output = T>,
) -> Result<T, TimeoutError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TimeoutError { limit })
}
