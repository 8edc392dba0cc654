// SPDX-License-Identifier: MIT OR Apache-2.0
//! loom-core
//!
//! The stable contract for the Loom actor platform.
//!
//! Everything that crosses a queue, a store, or a port is defined here:
//! actor identity, messages, trigger events, invocation outcomes, and the
//! runtime events published to observers.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Runtime events published to observers (lifecycle and failure events).
pub mod event;
/// Message envelope and metadata carried through the durable queues.
pub mod message;
/// Normalized external trigger events and their mapping hooks.
pub mod trigger;

pub use event::{EvictionReason, FailureEvent, RuntimeEvent};
pub use message::{Message, MessageBuilder, MessageMetadata, MessagePriority};
pub use trigger::TriggerEvent;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved tenant segment for values visible to every tenant.
pub const GLOBAL_PARTITION: &str = "global";

/// Fully-qualified actor identity: `(tenant_id, actor_type, actor_id)`.
///
/// `actor_id` is unique within `(tenant_id, actor_type)`; the triple is
/// unique across the cluster and is the unit of mutual exclusion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorRef {
    /// Owning tenant.
    pub tenant_id: String,
    /// Registered actor type name.
    pub actor_type: String,
    /// Identifier unique within `(tenant_id, actor_type)`.
    pub actor_id: String,
}

impl ActorRef {
    /// Create a new actor reference.
    pub fn new(
        tenant_id: impl Into<String>,
        actor_type: impl Into<String>,
        actor_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            actor_type: actor_type.into(),
            actor_id: actor_id.into(),
        }
    }

    /// Canonical `tenant/type/id` form, used as queue and lease keys.
    pub fn qualified(&self) -> String {
        format!("{}/{}/{}", self.tenant_id, self.actor_type, self.actor_id)
    }

    /// Name of the per-actor delivery queue.
    pub fn queue_name(&self) -> String {
        format!("loom.actors.{}.{}.{}", self.tenant_id, self.actor_type, self.actor_id)
    }
}

impl std::fmt::Display for ActorRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.qualified())
    }
}

/// Terminal status of a completed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    /// The handler returned a result and all patches were persisted.
    Succeeded,
    /// The handler failed; its patches were compensated.
    Failed,
}

/// Summary of the most recent invocation, kept on the persisted actor record
/// for fast start and surfaced to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationOutcome {
    /// Message that produced this invocation.
    pub message_id: String,
    /// Terminal status.
    pub status: InvocationStatus,
    /// Handler result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error code and redacted message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<loom_error::LoomErrorDto>,
    /// When the invocation reached its terminal status.
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_form_joins_with_slashes() {
        let a = ActorRef::new("acme", "crm", "lead-42");
        assert_eq!(a.qualified(), "acme/crm/lead-42");
        assert_eq!(a.to_string(), "acme/crm/lead-42");
    }

    #[test]
    fn queue_name_is_stable() {
        let a = ActorRef::new("acme", "crm", "lead-42");
        assert_eq!(a.queue_name(), "loom.actors.acme.crm.lead-42");
    }

    #[test]
    fn actor_ref_roundtrips_through_json() {
        let a = ActorRef::new("t", "ty", "id");
        let json = serde_json::to_string(&a).unwrap();
        let back: ActorRef = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);
    }

    #[test]
    fn invocation_outcome_omits_empty_fields() {
        let o = InvocationOutcome {
            message_id: "m-1".into(),
            status: InvocationStatus::Succeeded,
            result: None,
            error: None,
            completed_at: Utc::now(),
        };
        let json = serde_json::to_string(&o).unwrap();
        assert!(!json.contains("result"));
        assert!(!json.contains("error"));
        assert!(json.contains("succeeded"));
    }
}
