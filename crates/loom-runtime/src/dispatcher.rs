// SPDX-License-Identifier: MIT OR Apache-2.0
//! The dispatcher: binds messages to actors and enforces one-at-a-time
//! execution per actor.
//!
//! Per-message protocol: acquire the actor's lease, hydrate from the state
//! port (journal authoritative), short-circuit on idempotency, journal the
//! invocation, run the handler under a per-actor-type circuit breaker and a
//! timeout, persist the delta, release the lease.  Failures roll back the
//! invocation's patches by compensation and the message returns to the
//! queue per the retry policy.

use crate::bus::EventBus;
use crate::ports::{
    ActivityPort, ActorRecord, AuthorizationPort, IdempotencyKey, IdempotencyStore, LeasePort,
    StatePort, StoredResult,
};
use crate::registry::ActorRegistry;
use crate::telemetry::DispatcherMetrics;
use chrono::Utc;
use loom_actor::{
    publish_child_spawn, ActivityRequest, ActorContext, ActorServices, ActorStatus, ChildSpawn,
    ACTIVITY_QUEUE,
};
use loom_core::{
    ActorRef, EvictionReason, FailureEvent, InvocationOutcome, InvocationStatus, Message,
    RuntimeEvent,
};
use loom_error::{ErrorCode, LoomError};
use loom_queue::{ConsumerHandle, JobHandler, QueueJob, QueuePort};
use loom_resilience::{with_timeout, BreakerConfig, BreakerError, CircuitBreaker};
use loom_state::{JournalEntry, MarkerKind, StateManager};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Dispatcher tuning knobs.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// TTL of the per-actor lease; renewed at half-life while executing.
    pub lease_ttl: Duration,
    /// Deadline for a single handler invocation.
    pub handler_timeout: Duration,
    /// Circuit-breaker settings applied per actor type.
    pub breaker: BreakerConfig,
    /// Hydrated actors idle longer than this are evicted by the sweeper.
    pub idle_timeout: Duration,
    /// LRU cap on hydrated actors.
    pub max_cached_actors: usize,
    /// Initial state for actors with no persisted record.
    pub default_state: Value,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(30),
            handler_timeout: Duration::from_secs(60),
            breaker: BreakerConfig::default(),
            idle_timeout: Duration::from_secs(300),
            max_cached_actors: 1024,
            default_state: Value::Object(serde_json::Map::new()),
        }
    }
}

/// How a message was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The handler ran and returned this result.
    Completed(Value),
    /// The stored result was replayed without running the handler.
    IdempotentHit(Value),
}

impl DispatchOutcome {
    /// The result value, whichever way it was produced.
    #[must_use]
    pub fn result(&self) -> &Value {
        match self {
            Self::Completed(v) | Self::IdempotentHit(v) => v,
        }
    }
}

struct CachedActor {
    manager: StateManager,
    logical_clock: u64,
    last_invocation: Option<InvocationOutcome>,
    last_used: Instant,
    status: ActorStatus,
}

/// Advance a resident actor's lifecycle status, logging transitions the
/// state machine does not name.
fn advance_status(actor: &str, status: &mut ActorStatus, next: ActorStatus) {
    if !status.can_transition_to(next) {
        warn!(
            target: "loom.runtime",
            %actor,
            from = %status,
            to = %next,
            "irregular lifecycle transition"
        );
    }
    *status = next;
}

/// The runtime dispatcher.
pub struct Dispatcher {
    registry: Arc<ActorRegistry>,
    services: Arc<ActorServices>,
    state_port: Arc<dyn StatePort>,
    leases: Arc<dyn LeasePort>,
    idempotency: Arc<dyn IdempotencyStore>,
    authorization: Arc<dyn AuthorizationPort>,
    bus: Arc<EventBus>,
    metrics: Arc<DispatcherMetrics>,
    breakers: StdMutex<HashMap<String, Arc<CircuitBreaker>>>,
    cache: Mutex<HashMap<String, CachedActor>>,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Assemble a dispatcher from its collaborating services and ports.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ActorRegistry>,
        services: Arc<ActorServices>,
        state_port: Arc<dyn StatePort>,
        leases: Arc<dyn LeasePort>,
        idempotency: Arc<dyn IdempotencyStore>,
        authorization: Arc<dyn AuthorizationPort>,
        bus: Arc<EventBus>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            services,
            state_port,
            leases,
            idempotency,
            authorization,
            bus,
            metrics: Arc::new(DispatcherMetrics::new()),
            breakers: StdMutex::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// The shared metrics collector.
    #[must_use]
    pub fn metrics(&self) -> &DispatcherMetrics {
        &self.metrics
    }

    /// The runtime event bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The services handed to actor contexts.
    #[must_use]
    pub fn services(&self) -> &Arc<ActorServices> {
        &self.services
    }

    /// Route an external event to an actor suspended in `wait_for_event`.
    pub fn deliver_event(&self, actor: &ActorRef, event_name: &str, payload: Value) -> bool {
        self.services.router.deliver_event(actor, event_name, payload)
    }

    /// Handle one message end to end (steps 2–8 of the dispatch protocol;
    /// dequeue and ack/nack belong to the queue worker).
    pub async fn handle_message(
        &self,
        msg: &Message,
        attempt: u32,
    ) -> Result<DispatchOutcome, LoomError> {
        let actor = msg.actor_ref.clone();
        let handler =
            self.registry
                .get(&actor.actor_type)
                .ok_or_else(|| {
                    LoomError::new(
                        ErrorCode::Permanent,
                        format!("no handler registered for actor type '{}'", actor.actor_type),
                    )
                })?;

        // Optional authorization; absent plugin is allow-all.
        let principal = msg
            .metadata
            .extensions
            .get("principal")
            .map_or("anonymous", String::as_str);
        let decision = self
            .authorization
            .authorize(principal, &actor.actor_type, &msg.message_type)
            .await;
        if !decision.allow {
            return Err(LoomError::new(
                ErrorCode::Unauthorized,
                format!(
                    "principal '{principal}' denied '{}' on '{}'",
                    msg.message_type, actor.actor_type
                ),
            )
            .with_context("reason", decision.reason)
            .with_context("required_permissions", decision.required_permissions));
        }

        // Exclusive lease; losing the race is retryable.
        let lease_id = self
            .leases
            .acquire(&actor.qualified(), self.config.lease_ttl)
            .await
            .map_err(|e| {
                LoomError::new(ErrorCode::StateStoreFailed, format!("lease acquire failed: {e}"))
            })?
            .ok_or_else(|| {
                LoomError::new(
                    ErrorCode::LeaseUnavailable,
                    format!("actor {actor} is leased elsewhere"),
                )
            })?;

        // Renew at half-life while the handler runs (it may suspend for a
        // long time waiting on activities or events).
        let renewer = {
            let leases = Arc::clone(&self.leases);
            let lease = lease_id.clone();
            let ttl = self.config.lease_ttl;
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(ttl / 2).await;
                    match leases.renew(&lease, ttl).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => {
                            warn!(target: "loom.runtime", error = %e, "lease renew failed");
                        }
                    }
                }
            })
        };

        let result = self.run_leased(&actor, handler.as_ref(), msg, attempt).await;

        renewer.abort();
        if let Err(e) = self.leases.release(&lease_id).await {
            warn!(target: "loom.runtime", actor = %actor, error = %e, "lease release failed");
        }
        result
    }

    async fn run_leased(
        &self,
        actor: &ActorRef,
        handler: &dyn loom_actor::ActorHandler,
        msg: &Message,
        attempt: u32,
    ) -> Result<DispatchOutcome, LoomError> {
        let mut cached = self.checkout(actor).await?;

        // Idempotency: a stored result short-circuits without journaling a
        // new invocation.
        let key = IdempotencyKey::for_actor(actor, &msg.idempotency_key);
        match self.idempotency.get(&key).await {
            Ok(Some(stored)) => {
                debug!(target: "loom.runtime", actor = %actor, key = %msg.idempotency_key, "idempotency hit");
                self.metrics.record_idempotent_hit();
                self.bus.publish(RuntimeEvent::IdempotencyHit {
                    actor_ref: actor.clone(),
                    idempotency_key: msg.idempotency_key.clone(),
                });
                // Hydrated but never executed: the actor settles at Idle.
                self.checkin(actor, cached).await;
                return Ok(DispatchOutcome::IdempotentHit(stored.result));
            }
            Ok(None) => {}
            Err(e) => {
                // A read failure must not run the handler twice silently;
                // treat the store as unavailable and retry later.
                self.checkin(actor, cached).await;
                return Err(LoomError::new(
                    ErrorCode::StateStoreFailed,
                    format!("idempotency lookup failed: {e}"),
                ));
            }
        }

        let start = std::time::Instant::now();
        cached
            .manager
            .record_invocation(msg.message_id.clone(), msg.payload.clone());
        let mark = cached.manager.update_mark();

        let resumed = cached.status == ActorStatus::Idle;
        let mut ctx = ActorContext::new(
            actor.clone(),
            msg.clone(),
            cached.manager,
            Arc::clone(&self.services),
        );
        // A resident actor resumes from Idle; a fresh checkout is still
        // mid-hydration when the context is built.
        if resumed {
            ctx.set_status(ActorStatus::Idle);
        }
        ctx.set_status(ActorStatus::Executing);

        let breaker = self.breaker_for(&actor.actor_type);
        let timeout = self.config.handler_timeout;
        let invoke = async {
            match with_timeout(timeout, handler.execute(&mut ctx, msg.payload.clone())).await {
                Ok(inner) => inner,
                Err(t) => Err(LoomError::new(ErrorCode::Timeout, t.to_string())),
            }
        };
        let outcome = match breaker.call(invoke).await {
            Ok(value) => Ok(value),
            Err(BreakerError::Open) => Err(LoomError::new(
                ErrorCode::CircuitOpen,
                format!("breaker open for actor type '{}'", actor.actor_type),
            )),
            Err(BreakerError::Inner(e)) => Err(e),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                ctx.set_status(ActorStatus::Persisting);
                cached.status = ctx.status();
                cached.manager = ctx.into_state();
                cached.logical_clock += 1;
                cached.last_invocation = Some(InvocationOutcome {
                    message_id: msg.message_id.clone(),
                    status: InvocationStatus::Succeeded,
                    result: Some(result.clone()),
                    error: None,
                    completed_at: Utc::now(),
                });
                self.persist(actor, &cached).await?;

                if let Err(e) = self
                    .idempotency
                    .put(
                        key,
                        StoredResult {
                            result: result.clone(),
                            message_id: msg.message_id.clone(),
                            stored_at: Utc::now(),
                        },
                    )
                    .await
                {
                    // At-least-once tolerates a lost record; a duplicate
                    // would simply re-run.
                    warn!(target: "loom.runtime", actor = %actor, error = %e, "idempotency record failed");
                }

                self.metrics.record_dispatch(duration_ms, true);
                self.bus.publish(RuntimeEvent::InvocationSucceeded {
                    actor_ref: actor.clone(),
                    message_id: msg.message_id.clone(),
                    duration_ms,
                });
                self.checkin(actor, cached).await;
                Ok(DispatchOutcome::Completed(result))
            }
            Err(error) => {
                // The failed invocation still persists its compensation
                // entries and outcome.
                ctx.set_status(ActorStatus::Persisting);
                cached.status = ctx.status();
                let mut manager = ctx.into_state();
                if let Err(e) = manager.rollback_to(mark) {
                    warn!(target: "loom.runtime", actor = %actor, error = %e, "rollback failed");
                }
                cached.manager = manager;
                cached.logical_clock += 1;
                cached.last_invocation = Some(InvocationOutcome {
                    message_id: msg.message_id.clone(),
                    status: InvocationStatus::Failed,
                    result: None,
                    error: Some((&error).into()),
                    completed_at: Utc::now(),
                });
                if let Err(e) = self.persist(actor, &cached).await {
                    warn!(target: "loom.runtime", actor = %actor, error = %e, "failed-invocation persist failed");
                }

                self.metrics.record_dispatch(duration_ms, false);
                self.bus
                    .publish(RuntimeEvent::InvocationFailed(FailureEvent {
                        actor_ref: actor.clone(),
                        correlation_id: msg.correlation_id.clone(),
                        message_id: msg.message_id.clone(),
                        attempt,
                        error: (&error).into(),
                        dead_lettered: false,
                        timestamp: Utc::now(),
                    }));
                self.checkin(actor, cached).await;
                Err(error)
            }
        }
    }

    /// Take the actor out of the cache, hydrating from the state port when
    /// it is not resident.
    async fn checkout(&self, actor: &ActorRef) -> Result<CachedActor, LoomError> {
        if let Some(mut entry) = self.cache.lock().await.remove(&actor.qualified()) {
            entry.last_used = Instant::now();
            return Ok(entry);
        }
        let mut status = ActorStatus::Created;
        advance_status(&actor.qualified(), &mut status, ActorStatus::Hydrating);
        let record = self.state_port.load(actor).await.map_err(|e| {
            LoomError::new(ErrorCode::StateStoreFailed, format!("actor load failed: {e}"))
        })?;
        let cached = match record {
            Some(record) => {
                let replayed_entries = record.journal.len();
                let (manager, repaired) = StateManager::hydrate(
                    record.state,
                    record.journal,
                    self.config.default_state.clone(),
                );
                if repaired {
                    warn!(target: "loom.runtime", actor = %actor, "stored projection diverged from journal, replay wins");
                }
                self.redrive_spawns(&manager).await;
                self.bus.publish(RuntimeEvent::ActorHydrated {
                    actor_ref: actor.clone(),
                    replayed_entries,
                });
                info!(target: "loom.runtime", actor = %actor, replayed_entries, "actor hydrated");
                CachedActor {
                    manager,
                    logical_clock: record.logical_clock,
                    last_invocation: record.last_invocation,
                    last_used: Instant::now(),
                    status,
                }
            }
            None => CachedActor {
                manager: StateManager::new(self.config.default_state.clone()),
                logical_clock: 0,
                last_invocation: None,
                last_used: Instant::now(),
                status,
            },
        };
        Ok(cached)
    }

    /// Re-drive `SpawnChild` markers whose spawn was never acknowledged by
    /// the idempotency layer.  Activity markers are never re-driven: the
    /// queue retries the whole invocation instead.
    async fn redrive_spawns(&self, manager: &StateManager) {
        for entry in manager.journal().iter() {
            let JournalEntry::Marker {
                kind: MarkerKind::SpawnChild,
                payload,
                ..
            } = entry
            else {
                continue;
            };
            let Ok(spawn) = serde_json::from_value::<ChildSpawn>(payload.clone()) else {
                warn!(target: "loom.runtime", "unreadable spawn marker skipped");
                continue;
            };
            let key = IdempotencyKey {
                tenant_id: spawn.child.tenant_id.clone(),
                actor_id: spawn.child.actor_id.clone(),
                idempotency_key: spawn.idempotency_key.clone(),
            };
            let acked = matches!(self.idempotency.get(&key).await, Ok(Some(_)));
            if acked {
                continue;
            }
            debug!(target: "loom.runtime", child = %spawn.child, "re-driving unacked child spawn");
            if let Err(e) = publish_child_spawn(self.services.queue.as_ref(), &spawn).await {
                warn!(target: "loom.runtime", child = %spawn.child, error = %e, "spawn re-drive failed");
            }
        }
    }

    async fn persist(&self, actor: &ActorRef, cached: &CachedActor) -> Result<(), LoomError> {
        let record = ActorRecord {
            actor_ref: actor.clone(),
            state: cached.manager.state().clone(),
            journal: cached.manager.journal().clone(),
            last_invocation: cached.last_invocation.clone(),
            logical_clock: cached.logical_clock,
            updated_at: Utc::now(),
        };
        self.state_port.save(actor, record).await.map_err(|e| {
            LoomError::new(ErrorCode::StateStoreFailed, format!("actor save failed: {e}"))
        })
    }

    /// Put the actor back into the cache at `Idle` and enforce the LRU cap.
    async fn checkin(&self, actor: &ActorRef, mut cached: CachedActor) {
        cached.last_used = Instant::now();
        if cached.status != ActorStatus::Idle {
            advance_status(&actor.qualified(), &mut cached.status, ActorStatus::Idle);
        }
        let mut cache = self.cache.lock().await;
        cache.insert(actor.qualified(), cached);
        while cache.len() > self.config.max_cached_actors {
            let Some(oldest) = cache
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            if let Some(mut entry) = cache.remove(&oldest) {
                advance_status(&oldest, &mut entry.status, ActorStatus::Evicted);
            }
            if let Some(actor_ref) = parse_qualified(&oldest) {
                self.bus.publish(RuntimeEvent::ActorEvicted {
                    actor_ref,
                    reason: EvictionReason::LruCapacity,
                });
            }
        }
    }

    /// Drop actors idle longer than the configured timeout.  Their
    /// persisted records remain; the next message re-hydrates.
    pub async fn evict_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout;
        let mut cache = self.cache.lock().await;
        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| entry.last_used.elapsed() > idle_timeout)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            if let Some(mut entry) = cache.remove(key) {
                advance_status(key, &mut entry.status, ActorStatus::Evicted);
            }
            if let Some(actor_ref) = parse_qualified(key) {
                self.bus.publish(RuntimeEvent::ActorEvicted {
                    actor_ref,
                    reason: EvictionReason::IdleTimeout,
                });
            }
        }
        expired.len()
    }

    /// Number of actors currently resident in memory.
    pub async fn resident_actors(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Lifecycle status of a resident actor.
    ///
    /// `None` when the actor is not in memory — never hydrated, evicted, or
    /// currently checked out by a running invocation.
    pub async fn actor_status(&self, actor: &ActorRef) -> Option<ActorStatus> {
        self.cache
            .lock()
            .await
            .get(&actor.qualified())
            .map(|entry| entry.status)
    }

    /// Tear an actor down: drop it from memory and delete its persisted
    /// record.
    pub async fn destroy_actor(&self, actor: &ActorRef) -> Result<bool, LoomError> {
        if let Some(mut entry) = self.cache.lock().await.remove(&actor.qualified()) {
            advance_status(&actor.qualified(), &mut entry.status, ActorStatus::Evicted);
        }
        let removed = self.state_port.remove(actor).await.map_err(|e| {
            LoomError::new(ErrorCode::StateStoreFailed, format!("actor remove failed: {e}"))
        })?;
        self.bus.publish(RuntimeEvent::ActorEvicted {
            actor_ref: actor.clone(),
            reason: EvictionReason::Explicit,
        });
        Ok(removed)
    }

    /// Compact an idle actor's journal into a snapshot.
    pub async fn compact_actor(&self, actor: &ActorRef) -> Result<(), LoomError> {
        let mut cached = self.checkout(actor).await?;
        cached.manager.compact();
        self.persist(actor, &cached).await?;
        self.checkin(actor, cached).await;
        Ok(())
    }

    fn breaker_for(&self, actor_type: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            breakers
                .entry(actor_type.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.breaker.clone()))),
        )
    }

    /// Start consuming an actor queue, dispatching each job's message.
    pub async fn bind_queue(
        self: &Arc<Self>,
        queue_name: &str,
    ) -> Result<ConsumerHandle, LoomError> {
        let worker = QueueWorker {
            dispatcher: Arc::clone(self),
            queue: Arc::clone(&self.services.queue),
        };
        self.services
            .queue
            .consume(queue_name, Arc::new(worker))
            .await
            .map_err(|e| {
                LoomError::new(ErrorCode::QueueNotFound, format!("consume failed: {e}"))
            })
    }

    /// Publish a message onto its actor's queue.
    pub async fn enqueue(&self, msg: &Message) -> Result<String, LoomError> {
        self.services
            .queue
            .publish(
                &msg.actor_ref.queue_name(),
                serde_json::to_value(msg).unwrap_or(Value::Null),
                loom_queue::PublishOptions::default(),
            )
            .await
            .map_err(|e| LoomError::new(ErrorCode::Transient, format!("publish failed: {e}")))
    }

    /// Start the worker that executes activity requests through the
    /// activity port and acks suspended handlers.
    pub async fn start_activity_worker(
        self: &Arc<Self>,
        port: Arc<dyn ActivityPort>,
    ) -> Result<ConsumerHandle, LoomError> {
        let worker = ActivityWorker {
            queue: Arc::clone(&self.services.queue),
            router: Arc::clone(&self.services.router),
            port,
        };
        self.services
            .queue
            .consume(ACTIVITY_QUEUE, Arc::new(worker))
            .await
            .map_err(|e| {
                LoomError::new(ErrorCode::QueueNotFound, format!("consume failed: {e}"))
            })
    }
}

/// Stop a set of queue consumers, waiting for every delivery loop to exit.
pub async fn stop_consumers(handles: Vec<ConsumerHandle>) {
    futures::future::join_all(handles.into_iter().map(ConsumerHandle::stop)).await;
}

fn parse_qualified(qualified: &str) -> Option<ActorRef> {
    let mut parts = qualified.splitn(3, '/');
    Some(ActorRef::new(parts.next()?, parts.next()?, parts.next()?))
}

/// Queue consumer delivering actor messages into the dispatcher.
struct QueueWorker {
    dispatcher: Arc<Dispatcher>,
    queue: Arc<dyn QueuePort>,
}

#[async_trait::async_trait]
impl JobHandler for QueueWorker {
    async fn handle(&self, job: QueueJob) -> anyhow::Result<()> {
        let mut msg: Message = match serde_json::from_value(job.payload.clone()) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(target: "loom.runtime", job_id = %job.job_id, error = %e, "malformed message dead-lettered");
                self.queue
                    .fail(&job.job_id, &format!("malformed message: {e}"), false)
                    .await?;
                return Ok(());
            }
        };
        msg.metadata.retry_count = job.attempt_number.saturating_sub(1);

        match self
            .dispatcher
            .handle_message(&msg, job.attempt_number)
            .await
        {
            Ok(_) => {
                self.queue.ack(&job.job_id).await?;
            }
            Err(error) => {
                let retry = error.is_retryable();
                let successor = self
                    .queue
                    .fail(&job.job_id, &error.to_string(), retry)
                    .await?;
                if successor.is_none() {
                    self.dispatcher
                        .bus
                        .publish(RuntimeEvent::InvocationFailed(FailureEvent {
                            actor_ref: msg.actor_ref.clone(),
                            correlation_id: msg.correlation_id.clone(),
                            message_id: msg.message_id.clone(),
                            attempt: job.attempt_number,
                            error: (&error).into(),
                            dead_lettered: true,
                            timestamp: Utc::now(),
                        }));
                }
            }
        }
        Ok(())
    }
}

/// Queue consumer executing activity requests and acking suspended
/// handlers through the router.
struct ActivityWorker {
    queue: Arc<dyn QueuePort>,
    router: Arc<loom_actor::EventRouter>,
    port: Arc<dyn ActivityPort>,
}

#[async_trait::async_trait]
impl JobHandler for ActivityWorker {
    async fn handle(&self, job: QueueJob) -> anyhow::Result<()> {
        let request: ActivityRequest = match serde_json::from_value(job.payload.clone()) {
            Ok(request) => request,
            Err(e) => {
                warn!(target: "loom.runtime", job_id = %job.job_id, error = %e, "malformed activity request");
                self.queue
                    .fail(&job.job_id, &format!("malformed activity request: {e}"), false)
                    .await?;
                return Ok(());
            }
        };
        let result = self
            .port
            .execute(&request.activity, None, request.input.clone())
            .await;
        let delivered = self
            .router
            .complete_activity(&request.correlation_id, result.map_err(|e| (&e).into()));
        if !delivered {
            debug!(
                target: "loom.runtime",
                correlation_id = %request.correlation_id,
                "no waiter for activity result (handler gone or retried)"
            );
        }
        self.queue.ack(&job.job_id).await?;
        Ok(())
    }
}
