// SPDX-License-Identifier: MIT OR Apache-2.0
//! Message envelope and metadata carried through the durable queues.

use crate::ActorRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Scheduling priority for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    /// Lowest priority.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Elevated priority.
    High,
}

/// Delivery metadata attached to every [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// When the message was created.
    pub timestamp: DateTime<Utc>,
    /// Scheduling priority.
    #[serde(default)]
    pub priority: MessagePriority,
    /// How many delivery attempts preceded this one.
    #[serde(default)]
    pub retry_count: u32,
    /// Target actor type, duplicated here for routing without the full ref.
    pub actor_type: String,
    /// Arbitrary extension metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, String>,
}

/// A single message addressed to an actor.
///
/// `message_id` is unique across retries (every redelivery mints a new queue
/// job, never a new message id); `idempotency_key` identifies the logical
/// request and may repeat across distinct message ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message.
    pub message_id: String,
    /// Destination actor.
    pub actor_ref: ActorRef,
    /// Handler-visible message type tag.
    pub message_type: String,
    /// Correlates requests with their replies and markers.
    pub correlation_id: String,
    /// Handler input.
    pub payload: serde_json::Value,
    /// Opaque trace propagation context.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub trace_context: BTreeMap<String, String>,
    /// Logical-request identifier used for deduplication.
    pub idempotency_key: String,
    /// Delivery metadata.
    pub metadata: MessageMetadata,
}

/// Fluent builder for [`Message`].
///
/// ```
/// use loom_core::{ActorRef, MessageBuilder};
///
/// let msg = MessageBuilder::new(ActorRef::new("acme", "crm", "lead-1"), "score")
///     .payload(serde_json::json!({"source": "webhook"}))
///     .build();
/// assert_eq!(msg.message_type, "score");
/// ```
pub struct MessageBuilder {
    actor_ref: ActorRef,
    message_type: String,
    correlation_id: Option<String>,
    payload: serde_json::Value,
    trace_context: BTreeMap<String, String>,
    idempotency_key: Option<String>,
    priority: MessagePriority,
    extensions: BTreeMap<String, String>,
}

impl MessageBuilder {
    /// Start a builder for the given destination and message type.
    #[must_use]
    pub fn new(actor_ref: ActorRef, message_type: impl Into<String>) -> Self {
        Self {
            actor_ref,
            message_type: message_type.into(),
            correlation_id: None,
            payload: serde_json::Value::Null,
            trace_context: BTreeMap::new(),
            idempotency_key: None,
            priority: MessagePriority::Normal,
            extensions: BTreeMap::new(),
        }
    }

    /// Set the handler input payload.
    #[must_use]
    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set an explicit correlation id (defaults to a fresh UUID).
    #[must_use]
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set the logical-request idempotency key (defaults to the message id).
    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Set the scheduling priority.
    #[must_use]
    pub fn priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Attach a trace-context entry.
    #[must_use]
    pub fn trace(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.trace_context.insert(key.into(), value.into());
        self
    }

    /// Attach an extension metadata entry.
    #[must_use]
    pub fn extension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    /// Finalise the message.
    #[must_use]
    pub fn build(self) -> Message {
        let message_id = Uuid::new_v4().to_string();
        let actor_type = self.actor_ref.actor_type.clone();
        Message {
            idempotency_key: self.idempotency_key.unwrap_or_else(|| message_id.clone()),
            correlation_id: self
                .correlation_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            message_id,
            actor_ref: self.actor_ref,
            message_type: self.message_type,
            payload: self.payload,
            trace_context: self.trace_context,
            metadata: MessageMetadata {
                timestamp: Utc::now(),
                priority: self.priority,
                retry_count: 0,
                actor_type,
                extensions: self.extensions,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dest() -> ActorRef {
        ActorRef::new("acme", "crm", "lead-1")
    }

    #[test]
    fn builder_fills_defaults() {
        let msg = MessageBuilder::new(dest(), "score").build();
        assert!(!msg.message_id.is_empty());
        assert_eq!(msg.idempotency_key, msg.message_id);
        assert!(!msg.correlation_id.is_empty());
        assert_eq!(msg.metadata.retry_count, 0);
        assert_eq!(msg.metadata.priority, MessagePriority::Normal);
        assert_eq!(msg.metadata.actor_type, "crm");
    }

    #[test]
    fn explicit_idempotency_key_is_kept() {
        let msg = MessageBuilder::new(dest(), "score")
            .idempotency_key("k-1")
            .build();
        assert_eq!(msg.idempotency_key, "k-1");
        assert_ne!(msg.message_id, "k-1");
    }

    #[test]
    fn two_builds_mint_distinct_message_ids() {
        let a = MessageBuilder::new(dest(), "score").idempotency_key("k").build();
        let b = MessageBuilder::new(dest(), "score").idempotency_key("k").build();
        assert_ne!(a.message_id, b.message_id);
        assert_eq!(a.idempotency_key, b.idempotency_key);
    }

    #[test]
    fn message_roundtrips_through_json() {
        let msg = MessageBuilder::new(dest(), "score")
            .payload(serde_json::json!({"n": 1}))
            .trace("traceparent", "00-abc-def-01")
            .build();
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.message_id, msg.message_id);
        assert_eq!(back.payload, serde_json::json!({"n": 1}));
        assert_eq!(back.trace_context.get("traceparent").unwrap(), "00-abc-def-01");
    }

    #[test]
    fn priority_orders_low_to_high() {
        assert!(MessagePriority::Low < MessagePriority::Normal);
        assert!(MessagePriority::Normal < MessagePriority::High);
    }
}
