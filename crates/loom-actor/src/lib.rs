// SPDX-License-Identifier: MIT OR Apache-2.0
//! loom-actor
//!
//! The actor core: what a handler author sees.
//!
//! A handler implements [`ActorHandler::execute`] and receives an
//! [`ActorContext`] — the single gateway to state updates, configuration,
//! memory, activities, child spawns, and event waits.  All state changes go
//! through `update_state`; everything else the handler can observe is
//! journaled as markers so replay can reconstruct what happened.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Execution context handed to handlers.
pub mod context;
/// Routing of external events and activity completions into suspended
/// handlers.
pub mod router;
/// Lifecycle states of a hydrated actor.
pub mod status;

pub use context::{
    publish_child_spawn, ActivityRequest, ActorContext, ActorServices, ChildSpawn, ACTIVITY_QUEUE,
};
pub use router::EventRouter;
pub use status::ActorStatus;

use async_trait::async_trait;
use loom_error::LoomError;
use serde_json::Value;

/// A message handler bound to one actor type.
///
/// `execute` is the single entry point the runtime calls per message.  The
/// handler must route every state change through
/// [`ActorContext::update_state`]; direct side effects outside the context
/// are invisible to the journal and will not survive replay.
#[async_trait]
pub trait ActorHandler: Send + Sync {
    /// Process one message, returning the invocation result.
    async fn execute(&self, ctx: &mut ActorContext, input: Value) -> Result<Value, LoomError>;
}
