// SPDX-License-Identifier: MIT OR Apache-2.0
//! Execution context handed to handlers.
//!
//! The context owns the actor's state manager for the duration of one
//! invocation and mediates every effect a handler can have: state updates,
//! configuration reads, memory, activities, child spawns, and event waits.
//! Memory failures never propagate out of the helpers; config, state, and
//! queue failures always do.

use crate::router::EventRouter;
use crate::status::ActorStatus;
use loom_config::{ConfigContext, ConfigResolver};
use loom_core::{ActorRef, Message, MessageBuilder};
use loom_error::{ErrorCode, LoomError};
use loom_memory::{
    AddOptions, CacheHit, MemoryIndex, MemoryItem, MemoryKind, MemoryMetadata, ScoredItem,
    SearchOptions,
};
use loom_queue::{PublishOptions, QueuePort};
use loom_state::{MarkerKind, PatchSet, StateManager};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Shared queue every activity request is published to.
///
/// Activities travel on their own queue, not on per-actor queues: actor
/// messages need per-actor FIFO, activity work does not.
pub const ACTIVITY_QUEUE: &str = "loom.activities";

/// Wire shape of an activity request published to [`ACTIVITY_QUEUE`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRequest {
    /// Actor awaiting the result.
    pub actor_ref: ActorRef,
    /// Activity name.
    pub activity: String,
    /// Correlation id the ack must carry.
    pub correlation_id: String,
    /// Activity input.
    pub input: Value,
}

/// Journal payload of a `SpawnChild` marker; also what replay re-drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildSpawn {
    /// The spawned child.
    pub child: ActorRef,
    /// Input delivered as the child's first message.
    pub input: Value,
    /// Idempotency key protecting the spawn against duplicate publishes.
    pub idempotency_key: String,
}

/// Long-lived services an actor context borrows from the runtime.
pub struct ActorServices {
    /// The layered configuration resolver.
    pub config: Arc<ConfigResolver>,
    /// The memory index, when the deployment has one.
    pub memory: Option<Arc<MemoryIndex>>,
    /// The durable queue.
    pub queue: Arc<dyn QueuePort>,
    /// Router resuming suspended waits.
    pub router: Arc<EventRouter>,
    /// Deployment-level dimensions merged into every actor's config context.
    pub base_context: ConfigContext,
    /// Deadline for each suspension (activity ack, event wait).
    pub suspend_timeout: Duration,
}

/// Per-invocation execution context.
pub struct ActorContext {
    actor_ref: ActorRef,
    message: Message,
    services: Arc<ActorServices>,
    state: StateManager,
    status: ActorStatus,
    config_ctx: ConfigContext,
    config_cache: HashMap<String, Option<Value>>,
}

impl ActorContext {
    /// Build a context for one invocation, taking ownership of the actor's
    /// state manager.
    ///
    /// The context starts in [`ActorStatus::Hydrating`]; the runtime
    /// advances it to `Executing` before invoking the handler and to
    /// `Persisting` once the invocation settles.
    #[must_use]
    pub fn new(
        actor_ref: ActorRef,
        message: Message,
        state: StateManager,
        services: Arc<ActorServices>,
    ) -> Self {
        let config_ctx = services
            .base_context
            .clone()
            .tenant(actor_ref.tenant_id.clone())
            .actor(actor_ref.actor_id.clone());
        Self {
            actor_ref,
            message,
            services,
            state,
            status: ActorStatus::Hydrating,
            config_ctx,
            config_cache: HashMap::new(),
        }
    }

    /// The actor this context belongs to.
    #[must_use]
    pub fn actor_ref(&self) -> &ActorRef {
        &self.actor_ref
    }

    /// The message being processed.
    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> ActorStatus {
        self.status
    }

    /// Record a lifecycle transition; illegal transitions are logged and
    /// applied anyway (the status is observability, not a gate).
    pub fn set_status(&mut self, next: ActorStatus) {
        if !self.status.can_transition_to(next) {
            warn!(
                target: "loom.actor",
                actor = %self.actor_ref,
                from = %self.status,
                to = %next,
                "irregular lifecycle transition"
            );
        }
        self.status = next;
    }

    /// The resolution context config lookups run in.
    #[must_use]
    pub fn config_context(&self) -> &ConfigContext {
        &self.config_ctx
    }

    /// Current materialized state.
    #[must_use]
    pub fn state(&self) -> &Value {
        self.state.state()
    }

    /// Borrow the state manager (journal inspection, marks).
    #[must_use]
    pub fn state_manager(&self) -> &StateManager {
        &self.state
    }

    /// Mutably borrow the state manager (dispatcher rollback path).
    pub fn state_manager_mut(&mut self) -> &mut StateManager {
        &mut self.state
    }

    /// Give the state manager back to the runtime.
    #[must_use]
    pub fn into_state(self) -> StateManager {
        self.state
    }

    /// Mutate a draft of the state; the structural diff is journaled.
    pub fn update_state(&mut self, recipe: impl FnOnce(&mut Value)) -> PatchSet {
        self.state.update_state(recipe)
    }

    // -- Activities, spawns, event waits ------------------------------------

    /// Publish an activity request and suspend until its ack arrives.
    ///
    /// Records an `ActivityScheduled` marker before publishing and an
    /// `ActivityCompleted` marker when the result lands.
    pub async fn call_activity(&mut self, name: &str, input: Value) -> Result<Value, LoomError> {
        let correlation_id = Uuid::new_v4().to_string();
        let request = ActivityRequest {
            actor_ref: self.actor_ref.clone(),
            activity: name.to_string(),
            correlation_id: correlation_id.clone(),
            input,
        };
        self.state.record_marker(
            MarkerKind::ActivityScheduled,
            serde_json::to_value(&request).unwrap_or(Value::Null),
        );

        let rx = self.services.router.wait_activity(&correlation_id);
        self.services
            .queue
            .publish(
                ACTIVITY_QUEUE,
                serde_json::to_value(&request).unwrap_or(Value::Null),
                PublishOptions::default(),
            )
            .await
            .map_err(|e| {
                LoomError::new(ErrorCode::Transient, format!("activity publish failed: {e}"))
            })?;
        debug!(target: "loom.actor", actor = %self.actor_ref, activity = name, %correlation_id, "activity scheduled");

        let outcome = tokio::time::timeout(self.services.suspend_timeout, rx).await;
        match outcome {
            Err(_) => {
                self.services.router.cancel_activity(&correlation_id);
                Err(LoomError::new(
                    ErrorCode::Timeout,
                    format!("activity '{name}' did not ack in time"),
                )
                .with_context("correlation_id", &correlation_id))
            }
            Ok(Err(_)) => Err(LoomError::new(
                ErrorCode::Internal,
                "activity router dropped the waiter",
            )),
            Ok(Ok(Err(dto))) => {
                self.state.record_marker(
                    MarkerKind::ActivityCompleted,
                    serde_json::json!({
                        "correlation_id": correlation_id,
                        "error": dto,
                    }),
                );
                Err(dto.into())
            }
            Ok(Ok(Ok(result))) => {
                self.state.record_marker(
                    MarkerKind::ActivityCompleted,
                    serde_json::json!({
                        "correlation_id": correlation_id,
                        "result": result,
                    }),
                );
                Ok(result)
            }
        }
    }

    /// Spawn a child actor of `actor_type` in the same tenant, delivering
    /// `input` as its first message.  Returns the child's actor id.
    pub async fn spawn_child(
        &mut self,
        actor_type: &str,
        input: Value,
    ) -> Result<String, LoomError> {
        let child = ActorRef::new(
            self.actor_ref.tenant_id.clone(),
            actor_type,
            Uuid::new_v4().to_string(),
        );
        let spawn = ChildSpawn {
            idempotency_key: format!("spawn-{}", child.actor_id),
            child: child.clone(),
            input: input.clone(),
        };
        self.state.record_marker(
            MarkerKind::SpawnChild,
            serde_json::to_value(&spawn).unwrap_or(Value::Null),
        );
        publish_child_spawn(self.services.queue.as_ref(), &spawn).await?;
        debug!(target: "loom.actor", parent = %self.actor_ref, child = %spawn.child, "child spawn published");
        Ok(child.actor_id)
    }

    /// Suspend until the runtime routes a matching external event here.
    pub async fn wait_for_event<T: DeserializeOwned>(
        &mut self,
        event_name: &str,
    ) -> Result<T, LoomError> {
        self.state.record_marker(
            MarkerKind::EventAwaited,
            serde_json::json!({ "event": event_name }),
        );
        let rx = self.services.router.wait_event(&self.actor_ref, event_name);
        let outcome = tokio::time::timeout(self.services.suspend_timeout, rx).await;
        let payload = match outcome {
            Err(_) => {
                self.services.router.cancel_event(&self.actor_ref, event_name);
                return Err(LoomError::new(
                    ErrorCode::Timeout,
                    format!("event '{event_name}' did not arrive in time"),
                ));
            }
            Ok(Err(_)) => {
                return Err(LoomError::new(
                    ErrorCode::Internal,
                    "event router dropped the waiter",
                ));
            }
            Ok(Ok(payload)) => payload,
        };
        self.state.record_marker(
            MarkerKind::EventReceived,
            serde_json::json!({ "event": event_name, "payload": payload }),
        );
        serde_json::from_value(payload).map_err(|e| {
            LoomError::new(
                ErrorCode::Permanent,
                format!("event '{event_name}' payload did not deserialize: {e}"),
            )
        })
    }

    // -- Configuration ------------------------------------------------------

    /// Resolve a required configuration key through the actor's context.
    ///
    /// The resolved value is cached for the lifetime of this invocation;
    /// runtime config updates do not retroactively change it.
    pub async fn get_config<T: DeserializeOwned>(&mut self, key: &str) -> Result<T, LoomError> {
        let value = self.resolve_config(key).await?;
        match value {
            Some(v) => serde_json::from_value(v).map_err(|e| {
                LoomError::new(
                    ErrorCode::ConfigInvalid,
                    format!("config '{key}' did not deserialize: {e}"),
                )
            }),
            None => Err(LoomError::config_missing(
                key,
                &self.config_ctx.fallback_paths(key),
            )),
        }
    }

    /// Resolve an optional configuration key; absence is silent.
    pub async fn try_get_config<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        match self.resolve_config(key).await {
            Ok(Some(v)) => serde_json::from_value(v).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(target: "loom.actor", key, error = %e, "optional config lookup failed");
                None
            }
        }
    }

    async fn resolve_config(&mut self, key: &str) -> Result<Option<Value>, LoomError> {
        if let Some(cached) = self.config_cache.get(key) {
            return Ok(cached.clone());
        }
        let resolved = self
            .services
            .config
            .get_with_context(key, &self.config_ctx)
            .await
            .map_err(|e| {
                LoomError::new(
                    ErrorCode::ConfigInvalid,
                    format!("config lookup for '{key}' failed: {e}"),
                )
            })?;
        self.config_cache.insert(key.to_string(), resolved.clone());
        Ok(resolved)
    }

    // -- Memory helpers -----------------------------------------------------
    //
    // Memory errors are logged and turned into "absent"; when no memory
    // index is configured every helper is a no-op.

    /// Store a memory for this actor's thread.  Returns the item id, or
    /// `None` when memory is unavailable.
    pub async fn remember(
        &self,
        text: &str,
        kind: MemoryKind,
        category: Option<&str>,
    ) -> Option<String> {
        let memory = self.services.memory.as_ref()?;
        let item = MemoryItem {
            id: String::new(),
            tenant_id: self.actor_ref.tenant_id.clone(),
            thread_id: self.actor_ref.actor_id.clone(),
            turn_index: 0,
            text: text.to_string(),
            content: text.to_string(),
            embedding: Vec::new(),
            timestamp: chrono::Utc::now(),
            kind,
            category: category.map(str::to_string),
            ttl_sec: None,
            metadata: MemoryMetadata::default(),
        };
        match memory.add(item, AddOptions::default()).await {
            Ok(outcome) => Some(outcome.id),
            Err(e) => {
                warn!(target: "loom.actor", actor = %self.actor_ref, error = %e, "remember failed");
                None
            }
        }
    }

    /// Search this actor's memories.  Empty on error or when memory is
    /// unavailable.
    pub async fn recall(&self, query: &str, limit: usize) -> Vec<ScoredItem> {
        let Some(memory) = self.services.memory.as_ref() else {
            return Vec::new();
        };
        let opts = SearchOptions {
            tenant_id: self.actor_ref.tenant_id.clone(),
            thread_id: Some(self.actor_ref.actor_id.clone()),
            category: None,
            kind: None,
            limit: Some(limit),
        };
        match memory.search(query, &opts).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(target: "loom.actor", actor = %self.actor_ref, error = %e, "recall failed");
                Vec::new()
            }
        }
    }

    /// Cache a response for a query in the tenant's semantic cache.
    pub async fn cache(&self, query: &str, response: &str, ttl_sec: Option<u64>) -> Option<String> {
        let memory = self.services.memory.as_ref()?;
        match memory
            .add_to_cache(query, response, &self.actor_ref.tenant_id, ttl_sec)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(target: "loom.actor", actor = %self.actor_ref, error = %e, "cache write failed");
                None
            }
        }
    }

    /// Check the tenant's semantic cache for a query.
    pub async fn check_cache(&self, query: &str, max_age_sec: Option<u64>) -> Option<CacheHit> {
        let memory = self.services.memory.as_ref()?;
        match memory
            .check_semantic_cache(query, &self.actor_ref.tenant_id, max_age_sec)
            .await
        {
            Ok(hit) => hit,
            Err(e) => {
                warn!(target: "loom.actor", actor = %self.actor_ref, error = %e, "cache check failed");
                None
            }
        }
    }
}

/// Publish a child-spawn request as the child's first message.
///
/// Shared with the dispatcher's replay path, which re-drives unacked
/// `SpawnChild` markers with the journaled [`ChildSpawn`] payload.
pub async fn publish_child_spawn(
    queue: &dyn QueuePort,
    spawn: &ChildSpawn,
) -> Result<(), LoomError> {
    let message = MessageBuilder::new(spawn.child.clone(), "spawn")
        .payload(spawn.input.clone())
        .idempotency_key(spawn.idempotency_key.clone())
        .build();
    queue
        .publish(
            spawn.child.queue_name().as_str(),
            serde_json::to_value(&message).unwrap_or(Value::Null),
            PublishOptions::default(),
        )
        .await
        .map_err(|e| LoomError::new(ErrorCode::Transient, format!("spawn publish failed: {e}")))?;
    Ok(())
}
