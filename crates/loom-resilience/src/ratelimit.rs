// SPDX-License-Identifier: MIT OR Apache-2.0
//! Token-bucket rate limiter.
//!
//! A bucket of capacity `requests` refills at `requests / period` tokens per
//! second.  [`RateLimiter::acquire`] computes
//! `wait = max(0, (n - tokens) / refill_rate)`, reserves the tokens, and
//! suspends for that duration.  Reserving before sleeping lets concurrent
//! waiters queue up in arrival order without re-checking.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter shared across tasks.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_rate: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Allow `requests` permits per `period`, starting with a full bucket.
    #[must_use]
    pub fn new(requests: u32, period: Duration) -> Self {
        let capacity = f64::from(requests.max(1));
        let refill_rate = capacity / period.as_secs_f64().max(f64::EPSILON);
        Self {
            capacity,
            refill_rate,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Acquire `n` permits, suspending until the bucket can cover them.
    pub async fn acquire(&self, n: u32) {
        let n = f64::from(n);
        let wait = {
            let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
            bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.capacity);
            bucket.last_refill = now;

            let wait = ((n - bucket.tokens) / self.refill_rate).max(0.0);
            // Reserve now; a negative balance represents queued debt.
            bucket.tokens -= n;
            wait
        };
        if wait > 0.0 {
            trace!(target: "loom.resilience", wait_ms = (wait * 1000.0) as u64, "rate limited");
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }

    /// Acquire a single permit.
    pub async fn acquire_one(&self) {
        self.acquire(1).await;
    }

    /// Tokens currently available (may be negative while waiters are queued).
    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.capacity);
        bucket.last_refill = now;
        bucket.tokens
    }
}
