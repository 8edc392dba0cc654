// SPDX-License-Identifier: MIT OR Apache-2.0
//! loom-runtime
//!
//! Orchestration layer.
//!
//! Responsibilities:
//! - bind messages to actors and enforce one-at-a-time execution per actor
//!   through leases
//! - hydrate actors from their journal, enforce idempotency, persist the
//!   invocation delta, acknowledge the queue
//! - guard handlers with per-actor-type circuit breakers and timeouts
//! - translate external trigger events into dispatched messages
//! - evict idle actors and publish runtime events to observers

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Broadcast-based event bus for runtime event distribution.
pub mod bus;
/// The dispatcher: the per-message protocol and the actor cache.
pub mod dispatcher;
/// State, lease, idempotency, activity, and authorization ports.
pub mod ports;
/// Actor type registry with native and WASM-module handler variants.
pub mod registry;
/// Telemetry: dispatcher metrics and tracing initialisation.
pub mod telemetry;
/// Trigger adapters: normalized external events into messages.
pub mod trigger;

pub use bus::{EventBus, EventBusStats, EventSubscription, FilteredSubscription};
pub use dispatcher::{stop_consumers, DispatchOutcome, Dispatcher, DispatcherConfig};
pub use ports::{
    ActivityPort, ActorRecord, AllowAll, AuthorizationDecision, AuthorizationPort,
    FileStateStore, IdempotencyKey, IdempotencyStore, InMemoryIdempotencyStore,
    InMemoryLeaseStore, InMemoryStateStore, LeasePort, StatePort, StoredResult,
};
pub use registry::{ActorRegistry, WasmModuleHandler};
pub use telemetry::{init_tracing, DispatcherMetrics, MetricsSnapshot};
pub use trigger::{TriggerHub, TriggerRegistration};
