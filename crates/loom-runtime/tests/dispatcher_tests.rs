// SPDX-License-Identifier: MIT OR Apache-2.0
use async_trait::async_trait;
use loom_actor::{ActorContext, ActorHandler, ActorServices, ActorStatus, ChildSpawn, EventRouter};
use loom_config::{ConfigContext, ConfigResolver, MemoryConfigStore};
use loom_core::{ActorRef, InvocationStatus, Message, MessageBuilder, RuntimeEvent};
use loom_error::{ErrorCode, LoomError};
use loom_queue::{InMemoryMetadataStore, InMemoryQueue, QueueMetadataStore};
use loom_resilience::{BreakerConfig, RetryPolicy};
use loom_runtime::{
    ActivityPort, ActorRecord, AllowAll, DispatchOutcome, Dispatcher, DispatcherConfig, EventBus,
    IdempotencyStore, InMemoryIdempotencyStore, InMemoryLeaseStore, InMemoryStateStore,
    StatePort,
};
use loom_state::{JournalEntry, MarkerKind, StateManager};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

struct Fixture {
    dispatcher: Arc<Dispatcher>,
    queue: InMemoryQueue,
    metadata: Arc<InMemoryMetadataStore>,
    state: Arc<InMemoryStateStore>,
    idempotency: Arc<InMemoryIdempotencyStore>,
}

fn fixture_with(
    registry: loom_runtime::ActorRegistry,
    config: DispatcherConfig,
) -> Fixture {
    let metadata = Arc::new(InMemoryMetadataStore::new());
    let backoff = RetryPolicy::builder()
        .initial_delay(Duration::from_millis(50))
        .multiplier(2.0)
        .build();
    let queue = InMemoryQueue::new(metadata.clone(), backoff, 2);
    let state = Arc::new(InMemoryStateStore::new());
    let idempotency = Arc::new(InMemoryIdempotencyStore::new());

    let services = Arc::new(ActorServices {
        config: Arc::new(ConfigResolver::new(Arc::new(MemoryConfigStore::new()))),
        memory: None,
        queue: Arc::new(queue.clone()),
        router: Arc::new(EventRouter::new()),
        base_context: ConfigContext::new().environment("test"),
        suspend_timeout: Duration::from_secs(10),
    });
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(registry),
        services,
        state.clone(),
        Arc::new(InMemoryLeaseStore::new()),
        idempotency.clone(),
        Arc::new(AllowAll),
        Arc::new(EventBus::new()),
        config,
    ));
    Fixture {
        dispatcher,
        queue,
        metadata,
        state,
        idempotency,
    }
}

fn fixture(registry: loom_runtime::ActorRegistry) -> Fixture {
    fixture_with(registry, DispatcherConfig::default())
}

fn actor() -> ActorRef {
    ActorRef::new("acme", "crm", "lead-1")
}

fn message(payload: Value) -> Message {
    MessageBuilder::new(actor(), "score").payload(payload).build()
}

/// Counts executions and folds the payload into the state.
struct Counter {
    executions: Arc<AtomicU32>,
}

#[async_trait]
impl ActorHandler for Counter {
    async fn execute(&self, ctx: &mut ActorContext, input: Value) -> Result<Value, LoomError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        ctx.update_state(|state| {
            let count = state["count"].as_u64().unwrap_or(0);
            state["count"] = json!(count + 1);
            state["last_input"] = input.clone();
        });
        Ok(json!({"count": ctx.state()["count"]}))
    }
}

/// Updates state, then fails.
struct FailAfterUpdate {
    code: ErrorCode,
}

#[async_trait]
impl ActorHandler for FailAfterUpdate {
    async fn execute(&self, ctx: &mut ActorContext, _input: Value) -> Result<Value, LoomError> {
        ctx.update_state(|state| {
            state["reserved"] = json!(100);
            state["available"] = json!(900);
        });
        Err(LoomError::new(self.code, "downstream rejected the reservation"))
    }
}

#[tokio::test]
async fn successful_invocation_persists_state_and_journal() {
    let executions = Arc::new(AtomicU32::new(0));
    let mut registry = loom_runtime::ActorRegistry::new();
    registry.register("crm", Counter { executions: executions.clone() });
    let fx = fixture(registry);

    let outcome = fx
        .dispatcher
        .handle_message(&message(json!({"n": 1})), 1)
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Completed(json!({"count": 1})));
    assert_eq!(executions.load(Ordering::SeqCst), 1);

    let record = fx.state.load(&actor()).await.unwrap().unwrap();
    assert_eq!(record.state["count"], 1);
    assert_eq!(record.logical_clock, 1);
    assert_eq!(
        record.last_invocation.as_ref().unwrap().status,
        InvocationStatus::Succeeded
    );
    // Invocation entry plus one StatePatches entry.
    assert_eq!(record.journal.len(), 2);
    // Replay over the journal reproduces the projection exactly.
    assert_eq!(record.journal.replay(&json!({})), record.state);
}

#[tokio::test]
async fn second_message_reuses_cached_actor_state() {
    let executions = Arc::new(AtomicU32::new(0));
    let mut registry = loom_runtime::ActorRegistry::new();
    registry.register("crm", Counter { executions });
    let fx = fixture(registry);

    fx.dispatcher.handle_message(&message(json!(1)), 1).await.unwrap();
    let outcome = fx
        .dispatcher
        .handle_message(&message(json!(2)), 1)
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Completed(json!({"count": 2})));
    assert_eq!(fx.dispatcher.resident_actors().await, 1);
}

#[tokio::test]
async fn duplicate_idempotency_key_replays_the_stored_result() {
    let executions = Arc::new(AtomicU32::new(0));
    let mut registry = loom_runtime::ActorRegistry::new();
    registry.register("crm", Counter { executions: executions.clone() });
    let fx = fixture(registry);

    let first = MessageBuilder::new(actor(), "score")
        .payload(json!(1))
        .idempotency_key("k-1")
        .build();
    let second = MessageBuilder::new(actor(), "score")
        .payload(json!(2))
        .idempotency_key("k-1")
        .build();
    assert_ne!(first.message_id, second.message_id);

    let a = fx.dispatcher.handle_message(&first, 1).await.unwrap();
    let b = fx.dispatcher.handle_message(&second, 1).await.unwrap();

    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert_eq!(a.result(), b.result());
    assert!(matches!(b, DispatchOutcome::IdempotentHit(_)));

    // No new Invocation entry was journaled for the duplicate.
    let record = fx.state.load(&actor()).await.unwrap().unwrap();
    let invocations = record
        .journal
        .iter()
        .filter(|e| matches!(e, JournalEntry::Invocation { .. }))
        .count();
    assert_eq!(invocations, 1);
    assert_eq!(fx.dispatcher.metrics().snapshot().idempotent_hits, 1);
}

#[tokio::test]
async fn failed_invocation_rolls_back_patches_by_compensation() {
    let mut registry = loom_runtime::ActorRegistry::new();
    registry.register("crm", FailAfterUpdate { code: ErrorCode::Permanent });
    let mut config = DispatcherConfig::default();
    config.default_state = json!({"balance": 1000});
    let fx = fixture_with(registry, config);

    let err = fx
        .dispatcher
        .handle_message(&message(json!({})), 1)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Permanent);

    let record = fx.state.load(&actor()).await.unwrap().unwrap();
    assert_eq!(record.state, json!({"balance": 1000}));
    assert_eq!(
        record.last_invocation.as_ref().unwrap().status,
        InvocationStatus::Failed
    );
    // Invocation, the update, and its compensation.
    assert_eq!(record.journal.len(), 3);
    assert_eq!(record.journal.replay(&json!({"balance": 1000})), record.state);

    // The failed invocation still settles the actor at Idle.
    assert_eq!(
        fx.dispatcher.actor_status(&actor()).await,
        Some(ActorStatus::Idle)
    );
}

#[tokio::test]
async fn lease_enforces_mutual_exclusion() {
    struct Blocking {
        started: Arc<Notify>,
        release: Arc<Notify>,
    }
    #[async_trait]
    impl ActorHandler for Blocking {
        async fn execute(&self, _ctx: &mut ActorContext, _input: Value) -> Result<Value, LoomError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(json!("done"))
        }
    }

    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let mut registry = loom_runtime::ActorRegistry::new();
    registry.register(
        "crm",
        Blocking {
            started: started.clone(),
            release: release.clone(),
        },
    );
    let fx = fixture(registry);

    let dispatcher = fx.dispatcher.clone();
    let holder = tokio::spawn(async move {
        dispatcher.handle_message(&message(json!(1)), 1).await
    });
    started.notified().await;

    // While the first invocation is suspended inside the handler, a second
    // message for the same actor cannot acquire the lease.
    let err = fx
        .dispatcher
        .handle_message(&message(json!(2)), 1)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::LeaseUnavailable);
    assert!(err.is_retryable());

    release.notify_one();
    holder.await.unwrap().unwrap();

    // With the lease released, the actor is available again.
    let dispatcher = fx.dispatcher.clone();
    let again = tokio::spawn(async move {
        dispatcher.handle_message(&message(json!(3)), 1).await
    });
    started.notified().await;
    release.notify_one();
    again.await.unwrap().unwrap();
}

#[tokio::test]
async fn breaker_opens_per_actor_type_and_fails_fast() {
    let mut registry = loom_runtime::ActorRegistry::new();
    registry.register("crm", FailAfterUpdate { code: ErrorCode::Transient });
    let mut config = DispatcherConfig::default();
    config.breaker = BreakerConfig {
        failure_threshold: 2,
        success_threshold: 1,
        timeout: Duration::from_secs(60),
        half_open_requests: 1,
    };
    let fx = fixture_with(registry, config);

    for _ in 0..2 {
        let err = fx
            .dispatcher
            .handle_message(&message(json!({})), 1)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Transient);
    }

    // The breaker is keyed by actor type: a different actor id of the same
    // type is rejected without running the handler.
    let other = MessageBuilder::new(ActorRef::new("acme", "crm", "lead-2"), "score").build();
    let err = fx.dispatcher.handle_message(&other, 1).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::CircuitOpen);
    assert!(err.is_retryable());
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_dead_letter_and_publish_a_failure_event() {
    let mut registry = loom_runtime::ActorRegistry::new();
    registry.register("crm", FailAfterUpdate { code: ErrorCode::Transient });
    let fx = fixture(registry);

    let mut failures = fx
        .dispatcher
        .bus()
        .subscribe_filtered(|ev| matches!(ev, RuntimeEvent::InvocationFailed(f) if f.dead_lettered));

    let consumer = fx.dispatcher.bind_queue(&actor().queue_name()).await.unwrap();
    let msg = message(json!({}));
    fx.dispatcher.enqueue(&msg).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(60), failures.recv())
        .await
        .expect("failure event should arrive")
        .expect("bus should stay open");
    match event {
        RuntimeEvent::InvocationFailed(failure) => {
            assert!(failure.dead_lettered);
            assert_eq!(failure.attempt, 2);
            assert_eq!(failure.error.code, ErrorCode::Transient);
            assert_eq!(failure.actor_ref, actor());
            assert_eq!(failure.correlation_id, msg.correlation_id);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let dead = fx.queue.dead_letter(&actor().queue_name()).await;
    assert_eq!(dead.len(), 1);
    consumer.stop().await;
}

#[tokio::test]
async fn activity_round_trip_through_the_worker() {
    struct Doubler;
    #[async_trait]
    impl ActivityPort for Doubler {
        async fn execute(
            &self,
            module: &str,
            _version: Option<&str>,
            input: Value,
        ) -> Result<Value, LoomError> {
            assert_eq!(module, "double");
            Ok(json!(input.as_i64().unwrap_or(0) * 2))
        }
    }

    struct CallsActivity;
    #[async_trait]
    impl ActorHandler for CallsActivity {
        async fn execute(&self, ctx: &mut ActorContext, input: Value) -> Result<Value, LoomError> {
            let doubled = ctx.call_activity("double", input).await?;
            ctx.update_state(|state| state["doubled"] = doubled.clone());
            Ok(doubled)
        }
    }

    let mut registry = loom_runtime::ActorRegistry::new();
    registry.register("crm", CallsActivity);
    let fx = fixture(registry);
    let worker = fx
        .dispatcher
        .start_activity_worker(Arc::new(Doubler))
        .await
        .unwrap();

    let outcome = fx
        .dispatcher
        .handle_message(&message(json!(21)), 1)
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Completed(json!(42)));

    // The suspension left scheduled/completed markers in the journal.
    let record = fx.state.load(&actor()).await.unwrap().unwrap();
    let kinds: Vec<MarkerKind> = record
        .journal
        .iter()
        .filter_map(|e| match e {
            JournalEntry::Marker { kind, .. } => Some(*kind),
            _ => None,
        })
        .collect();
    assert_eq!(
        kinds,
        vec![MarkerKind::ActivityScheduled, MarkerKind::ActivityCompleted]
    );
    worker.stop().await;
}

#[tokio::test]
async fn unacked_spawn_markers_are_redriven_on_hydration() {
    struct Noop;
    #[async_trait]
    impl ActorHandler for Noop {
        async fn execute(&self, _ctx: &mut ActorContext, _input: Value) -> Result<Value, LoomError> {
            Ok(Value::Null)
        }
    }

    let mut registry = loom_runtime::ActorRegistry::new();
    registry.register("crm", Noop);
    let mut config = DispatcherConfig::default();
    config.idle_timeout = Duration::ZERO;
    let fx = fixture_with(registry, config);

    // Persist a record whose journal holds a spawn marker that was never
    // acknowledged by the idempotency layer.
    let child = ActorRef::new("acme", "worker", "child-1");
    let spawn = ChildSpawn {
        child: child.clone(),
        input: json!({"task": "t"}),
        idempotency_key: "spawn-child-1".into(),
    };
    let mut manager = StateManager::new(json!({}));
    manager.record_marker(
        MarkerKind::SpawnChild,
        serde_json::to_value(&spawn).unwrap(),
    );
    fx.state
        .save(
            &actor(),
            ActorRecord {
                actor_ref: actor(),
                state: manager.state().clone(),
                journal: manager.journal().clone(),
                last_invocation: None,
                logical_clock: 1,
                updated_at: chrono::Utc::now(),
            },
        )
        .await
        .unwrap();

    fx.dispatcher.handle_message(&message(json!({})), 1).await.unwrap();

    // The spawn was republished onto the child's queue.
    let stats = fx.metadata.stats(&child.queue_name()).await.unwrap();
    assert_eq!(stats.total_jobs, 1);
    assert_eq!(stats.waiting_jobs, 1);

    // Re-hydrating after an eviction does not double-publish once the
    // child's handler has recorded the idempotency result.
    fx.idempotency
        .put(
            loom_runtime::IdempotencyKey {
                tenant_id: child.tenant_id.clone(),
                actor_id: child.actor_id.clone(),
                idempotency_key: spawn.idempotency_key.clone(),
            },
            loom_runtime::StoredResult {
                result: Value::Null,
                message_id: "m-child".into(),
                stored_at: chrono::Utc::now(),
            },
        )
        .await
        .unwrap();
    // Force a re-hydration by evicting the cached entry.
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(fx.dispatcher.evict_idle().await, 1);
    fx.dispatcher.handle_message(&message(json!({})), 1).await.unwrap();
    let stats = fx.metadata.stats(&child.queue_name()).await.unwrap();
    assert_eq!(stats.total_jobs, 1, "acked spawn must not be re-driven");
}

#[tokio::test(start_paused = true)]
async fn idle_actors_are_evicted_and_rehydrate_on_demand() {
    let executions = Arc::new(AtomicU32::new(0));
    let mut registry = loom_runtime::ActorRegistry::new();
    registry.register("crm", Counter { executions });
    let mut config = DispatcherConfig::default();
    config.idle_timeout = Duration::from_secs(60);
    let fx = fixture_with(registry, config);

    fx.dispatcher.handle_message(&message(json!(1)), 1).await.unwrap();
    assert_eq!(fx.dispatcher.resident_actors().await, 1);

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(fx.dispatcher.evict_idle().await, 1);
    assert_eq!(fx.dispatcher.resident_actors().await, 0);

    // The persisted record survives; the next message re-hydrates and the
    // count keeps growing.
    let outcome = fx
        .dispatcher
        .handle_message(&message(json!(2)), 1)
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Completed(json!({"count": 2})));
}

#[tokio::test]
async fn lru_cap_evicts_the_least_recently_used() {
    let executions = Arc::new(AtomicU32::new(0));
    let mut registry = loom_runtime::ActorRegistry::new();
    registry.register("crm", Counter { executions });
    let mut config = DispatcherConfig::default();
    config.max_cached_actors = 2;
    let fx = fixture_with(registry, config);

    for i in 0..3 {
        let msg = MessageBuilder::new(
            ActorRef::new("acme", "crm", format!("lead-{i}")),
            "score",
        )
        .build();
        fx.dispatcher.handle_message(&msg, 1).await.unwrap();
    }
    assert_eq!(fx.dispatcher.resident_actors().await, 2);
}

#[tokio::test(start_paused = true)]
async fn lifecycle_states_advance_through_dispatch() {
    /// Observes the context status at each phase a handler can see.
    struct ObservesStatus;
    #[async_trait]
    impl ActorHandler for ObservesStatus {
        async fn execute(&self, ctx: &mut ActorContext, _input: Value) -> Result<Value, LoomError> {
            assert_eq!(ctx.status(), ActorStatus::Executing);
            ctx.update_state(|state| state["touched"] = json!(true));
            assert_eq!(ctx.status(), ActorStatus::Executing);
            Ok(Value::Null)
        }
    }

    let mut registry = loom_runtime::ActorRegistry::new();
    registry.register("crm", ObservesStatus);
    let mut config = DispatcherConfig::default();
    config.idle_timeout = Duration::from_secs(60);
    let fx = fixture_with(registry, config);

    // Never hydrated: not resident, no status.
    assert_eq!(fx.dispatcher.actor_status(&actor()).await, None);

    // A completed invocation settles the actor at Idle.
    let first = MessageBuilder::new(actor(), "score")
        .idempotency_key("k-1")
        .build();
    fx.dispatcher.handle_message(&first, 1).await.unwrap();
    assert_eq!(
        fx.dispatcher.actor_status(&actor()).await,
        Some(ActorStatus::Idle)
    );

    // An idempotency short-circuit leaves it Idle without executing.
    let duplicate = MessageBuilder::new(actor(), "score")
        .idempotency_key("k-1")
        .build();
    let outcome = fx.dispatcher.handle_message(&duplicate, 1).await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::IdempotentHit(_)));
    assert_eq!(
        fx.dispatcher.actor_status(&actor()).await,
        Some(ActorStatus::Idle)
    );

    // Eviction drops it from memory; the next message re-hydrates into the
    // same Idle resting state.
    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(fx.dispatcher.evict_idle().await, 1);
    assert_eq!(fx.dispatcher.actor_status(&actor()).await, None);

    let next = MessageBuilder::new(actor(), "score").build();
    fx.dispatcher.handle_message(&next, 1).await.unwrap();
    assert_eq!(
        fx.dispatcher.actor_status(&actor()).await,
        Some(ActorStatus::Idle)
    );
}

#[tokio::test]
async fn unregistered_actor_type_is_a_permanent_error() {
    let registry = loom_runtime::ActorRegistry::new();
    let fx = fixture(registry);
    let err = fx
        .dispatcher
        .handle_message(&message(json!({})), 1)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Permanent);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn destroy_actor_removes_the_persisted_record() {
    let executions = Arc::new(AtomicU32::new(0));
    let mut registry = loom_runtime::ActorRegistry::new();
    registry.register("crm", Counter { executions });
    let fx = fixture(registry);

    fx.dispatcher.handle_message(&message(json!(1)), 1).await.unwrap();
    assert!(fx.state.load(&actor()).await.unwrap().is_some());
    assert!(fx.dispatcher.destroy_actor(&actor()).await.unwrap());
    assert!(fx.state.load(&actor()).await.unwrap().is_none());
    assert_eq!(fx.dispatcher.resident_actors().await, 0);
}

#[tokio::test]
async fn compaction_preserves_observable_state() {
    let executions = Arc::new(AtomicU32::new(0));
    let mut registry = loom_runtime::ActorRegistry::new();
    registry.register("crm", Counter { executions });
    let fx = fixture(registry);

    fx.dispatcher.handle_message(&message(json!(1)), 1).await.unwrap();
    fx.dispatcher.compact_actor(&actor()).await.unwrap();

    let record = fx.state.load(&actor()).await.unwrap().unwrap();
    assert!(record.journal.is_empty());
    assert_eq!(record.journal.replay(&json!({})), record.state);

    // The actor keeps working after compaction.
    let outcome = fx
        .dispatcher
        .handle_message(&message(json!(2)), 1)
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Completed(json!({"count": 2})));
}
