// SPDX-License-Identifier: MIT OR Apache-2.0
//! Runtime events published to observers.

use crate::ActorRef;
use chrono::{DateTime, Utc};
use loom_error::LoomErrorDto;
use serde::{Deserialize, Serialize};

/// Published when a message exhausts its retry budget or fails terminally.
///
/// Observers receive the error kind, a redacted message, the attempt number,
/// the actor ref, and the correlation id — never the raw payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEvent {
    /// Actor the message was addressed to.
    pub actor_ref: ActorRef,
    /// Correlation id of the failed request.
    pub correlation_id: String,
    /// Message id of the final attempt.
    pub message_id: String,
    /// Attempt number of the final attempt (1-based).
    pub attempt: u32,
    /// Error code and redacted message.
    pub error: LoomErrorDto,
    /// Whether the job was moved to the dead-letter state.
    pub dead_lettered: bool,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Events emitted on the runtime bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// An actor record was hydrated into memory.
    ActorHydrated {
        /// The hydrated actor.
        actor_ref: ActorRef,
        /// Number of journal entries replayed.
        replayed_entries: usize,
    },
    /// An invocation completed successfully.
    InvocationSucceeded {
        /// The invoked actor.
        actor_ref: ActorRef,
        /// Message id of the invocation.
        message_id: String,
        /// Handling duration in milliseconds.
        duration_ms: u64,
    },
    /// An invocation was short-circuited by the idempotency store.
    IdempotencyHit {
        /// The invoked actor.
        actor_ref: ActorRef,
        /// The deduplicated idempotency key.
        idempotency_key: String,
    },
    /// An invocation failed (may be retried).
    InvocationFailed(FailureEvent),
    /// An idle actor was evicted from memory.
    ActorEvicted {
        /// The evicted actor.
        actor_ref: ActorRef,
        /// Why it was evicted.
        reason: EvictionReason,
    },
}

/// Why an actor was dropped from the in-memory cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// No message for longer than the idle timeout.
    IdleTimeout,
    /// The LRU cap was exceeded.
    LruCapacity,
    /// Explicit teardown via the admin surface.
    Explicit,
}
