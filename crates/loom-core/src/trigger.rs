// SPDX-License-Identifier: MIT OR Apache-2.0
//! Normalized external trigger events.
//!
//! Every trigger adapter (webhook, timer, stream) emits this shape; the
//! runtime maps it to a [`Message`](crate::Message) through a per-trigger
//! filter and transformer supplied at registration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A normalized external event, independent of its source adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Unique event identifier.
    pub id: String,
    /// Event type tag (e.g. `"invoice.created"`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Source adapter name (e.g. `"webhook:stripe"`, `"timer"`).
    pub source: String,
    /// When the source observed the event.
    pub timestamp: DateTime<Utc>,
    /// Event body.
    pub data: serde_json::Value,
    /// Adapter-specific metadata (headers, delivery ids, …).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl TriggerEvent {
    /// Create a new event with a fresh id and the current timestamp.
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            source: source.into(),
            timestamp: Utc::now(),
            data,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach an adapter metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_has_fresh_id() {
        let a = TriggerEvent::new("invoice.created", "webhook:stripe", serde_json::json!({}));
        let b = TriggerEvent::new("invoice.created", "webhook:stripe", serde_json::json!({}));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn type_field_serializes_as_type() {
        let ev = TriggerEvent::new("tick", "timer", serde_json::Value::Null);
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "tick");
        assert!(json.get("event_type").is_none());
    }

    #[test]
    fn metadata_builder_accumulates() {
        let ev = TriggerEvent::new("tick", "timer", serde_json::Value::Null)
            .with_metadata("delivery", "d-1")
            .with_metadata("signature", "sha256=…");
        assert_eq!(ev.metadata.len(), 2);
    }
}
