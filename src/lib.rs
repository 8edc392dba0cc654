// SPDX-License-Identifier: MIT OR Apache-2.0
//! Loom — a multi-tenant actor execution platform.
//!
//! Actors are stateful entities identified by `(tenant, type, id)` that
//! process messages one at a time from durable queues.  Every observable
//! change is journaled for deterministic replay; configuration resolves
//! through context-aware fallback paths; semantic memory deduplicates on
//! insert and caches responses by embedding similarity.
//!
//! This crate is a facade over the workspace:
//!
//! - [`core`]: the shared data model (actors, messages, trigger events)
//! - [`error`]: the unified error taxonomy
//! - [`config`]: key-path resolution, the layered resolver, bootstrap
//! - [`resilience`]: retry, timeout, circuit breaker, rate limiting
//! - [`queue`]: durable delivery and job metadata
//! - [`state`]: patches, the journal, and the state manager
//! - [`memory`]: the vector-indexed semantic memory
//! - [`actor`]: the handler contract and execution context
//! - [`runtime`]: the dispatcher, ports, triggers, and eviction

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub use loom_actor as actor;
pub use loom_config as config;
pub use loom_core as core;
pub use loom_error as error;
pub use loom_memory as memory;
pub use loom_queue as queue;
pub use loom_resilience as resilience;
pub use loom_runtime as runtime;
pub use loom_state as state;

pub use loom_actor::{ActorContext, ActorHandler, ActorServices};
pub use loom_config::{ConfigContext, ConfigResolver};
pub use loom_core::{ActorRef, Message, MessageBuilder, TriggerEvent};
pub use loom_error::{ErrorCode, LoomError};
pub use loom_memory::{MemoryIndex, MemoryItem, MemoryKind};
pub use loom_queue::{QueuePort, QueueStats};
pub use loom_runtime::{Dispatcher, DispatcherConfig, TriggerHub};
pub use loom_state::{Journal, StateManager};
