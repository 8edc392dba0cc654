// SPDX-License-Identifier: MIT OR Apache-2.0
//! Routing of external events and activity completions into suspended
//! handlers.
//!
//! A suspended handler parks a oneshot sender here under its routing key;
//! the runtime resumes it by delivering the payload.  Keys are
//! `(actor, event name)` for external events and the correlation id for
//! activity completions.

use loom_core::ActorRef;
use loom_error::LoomErrorDto;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

type EventKey = (String, String);
type ActivityResult = Result<Value, LoomErrorDto>;

/// In-process router for event waits and activity acks.
#[derive(Default)]
pub struct EventRouter {
    events: Mutex<HashMap<EventKey, oneshot::Sender<Value>>>,
    activities: Mutex<HashMap<String, oneshot::Sender<ActivityResult>>>,
}

impl EventRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a waiter for `(actor, event_name)`, replacing any previous
    /// waiter for the same key.
    pub fn wait_event(&self, actor: &ActorRef, event_name: &str) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut events) = self.events.lock() {
            events.insert((actor.qualified(), event_name.to_string()), tx);
        }
        rx
    }

    /// Resume the waiter for `(actor, event_name)` with `payload`.
    ///
    /// Returns whether a waiter was resumed.
    pub fn deliver_event(&self, actor: &ActorRef, event_name: &str, payload: Value) -> bool {
        let sender = self
            .events
            .lock()
            .ok()
            .and_then(|mut events| events.remove(&(actor.qualified(), event_name.to_string())));
        match sender {
            Some(tx) => {
                debug!(target: "loom.actor", actor = %actor, event_name, "delivering event");
                tx.send(payload).is_ok()
            }
            None => false,
        }
    }

    /// Park a waiter for an activity `correlation_id`.
    pub fn wait_activity(&self, correlation_id: &str) -> oneshot::Receiver<ActivityResult> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut activities) = self.activities.lock() {
            activities.insert(correlation_id.to_string(), tx);
        }
        rx
    }

    /// Complete the activity with `correlation_id`.
    ///
    /// Returns whether a waiter was resumed.
    pub fn complete_activity(&self, correlation_id: &str, result: ActivityResult) -> bool {
        let sender = self
            .activities
            .lock()
            .ok()
            .and_then(|mut activities| activities.remove(correlation_id));
        match sender {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Drop the parked activity waiter, if any (used when a wait times out).
    pub fn cancel_activity(&self, correlation_id: &str) {
        if let Ok(mut activities) = self.activities.lock() {
            activities.remove(correlation_id);
        }
    }

    /// Drop the parked event waiter, if any.
    pub fn cancel_event(&self, actor: &ActorRef, event_name: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.remove(&(actor.qualified(), event_name.to_string()));
        }
    }
}
