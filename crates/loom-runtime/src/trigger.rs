// SPDX-License-Identifier: MIT OR Apache-2.0
//! Trigger adapters: normalized external events into dispatched messages.
//!
//! Each adapter (webhook, timer, stream) emits [`TriggerEvent`]s; a
//! registration pairs a filter with a transformer that maps matching events
//! to messages, which the hub publishes onto the target actor's queue.

use loom_core::{Message, TriggerEvent};
use loom_error::{ErrorCode, LoomError};
use loom_queue::{PublishOptions, QueuePort};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

type TriggerFilter = Box<dyn Fn(&TriggerEvent) -> bool + Send + Sync>;
type TriggerTransform = Box<dyn Fn(&TriggerEvent) -> Option<Message> + Send + Sync>;

/// One registered trigger subscription.
pub struct TriggerRegistration {
    /// Registration name, for diagnostics.
    pub name: String,
    filter: TriggerFilter,
    transform: TriggerTransform,
}

impl TriggerRegistration {
    /// Pair a filter with a transformer under a diagnostic name.
    pub fn new(
        name: impl Into<String>,
        filter: impl Fn(&TriggerEvent) -> bool + Send + Sync + 'static,
        transform: impl Fn(&TriggerEvent) -> Option<Message> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            filter: Box::new(filter),
            transform: Box::new(transform),
        }
    }
}

/// Routes normalized external events into actor queues.
pub struct TriggerHub {
    queue: Arc<dyn QueuePort>,
    registrations: RwLock<Vec<TriggerRegistration>>,
}

impl TriggerHub {
    /// Create a hub publishing onto the given queue port.
    pub fn new(queue: Arc<dyn QueuePort>) -> Self {
        Self {
            queue,
            registrations: RwLock::new(Vec::new()),
        }
    }

    /// Add a registration.
    pub async fn register(&self, registration: TriggerRegistration) {
        self.registrations.write().await.push(registration);
    }

    /// Remove a registration by name; returns whether it existed.
    pub async fn unregister(&self, name: &str) -> bool {
        let mut registrations = self.registrations.write().await;
        let before = registrations.len();
        registrations.retain(|r| r.name != name);
        registrations.len() < before
    }

    /// Names of the current registrations, in registration order.
    pub async fn registration_names(&self) -> Vec<String> {
        self.registrations
            .read()
            .await
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }

    /// Ingest one external event.
    ///
    /// Every registration whose filter matches transforms the event; each
    /// produced message is published to its actor's queue.  Returns the
    /// published message ids.
    pub async fn ingest(&self, event: &TriggerEvent) -> Result<Vec<String>, LoomError> {
        let mut published = Vec::new();
        let registrations = self.registrations.read().await;
        for registration in registrations.iter() {
            if !(registration.filter)(event) {
                continue;
            }
            let Some(message) = (registration.transform)(event) else {
                debug!(
                    target: "loom.runtime",
                    trigger = %registration.name,
                    event = %event.id,
                    "transformer declined event"
                );
                continue;
            };
            let queue_name = message.actor_ref.queue_name();
            let message_id = message.message_id.clone();
            self.queue
                .publish(
                    &queue_name,
                    serde_json::to_value(&message).unwrap_or(Value::Null),
                    PublishOptions::default(),
                )
                .await
                .map_err(|e| {
                    warn!(target: "loom.runtime", trigger = %registration.name, error = %e, "trigger publish failed");
                    LoomError::new(
                        ErrorCode::Transient,
                        format!("trigger '{}' publish failed: {e}", registration.name),
                    )
                })?;
            debug!(
                target: "loom.runtime",
                trigger = %registration.name,
                event = %event.id,
                %message_id,
                "event dispatched"
            );
            published.push(message_id);
        }
        Ok(published)
    }
}
