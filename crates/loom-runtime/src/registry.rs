// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed registry of actor handlers keyed by actor type.
//!
//! Handlers come in two variants: native Rust implementations of
//! [`ActorHandler`], and WASM guest modules invoked through the activity
//! port, wrapped here so the dispatcher sees one trait either way.

use crate::ports::ActivityPort;
use async_trait::async_trait;
use loom_actor::{ActorContext, ActorHandler};
use loom_error::LoomError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A typed registry of named [`ActorHandler`] implementations.
#[derive(Default)]
pub struct ActorRegistry {
    handlers: HashMap<String, Arc<dyn ActorHandler>>,
}

impl ActorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a native handler for an actor type, replacing any previous
    /// registration.
    pub fn register(&mut self, actor_type: impl Into<String>, handler: impl ActorHandler + 'static) {
        self.handlers.insert(actor_type.into(), Arc::new(handler));
    }

    /// Register a WASM guest module for an actor type, resolved by
    /// `(actor_type, version)` through the activity port.
    pub fn register_wasm(
        &mut self,
        actor_type: impl Into<String>,
        version: Option<String>,
        activity: Arc<dyn ActivityPort>,
    ) {
        let actor_type = actor_type.into();
        let handler = WasmModuleHandler {
            module: actor_type.clone(),
            version,
            activity,
        };
        self.handlers.insert(actor_type, Arc::new(handler));
    }

    /// Return an `Arc` handle to the handler for an actor type.
    #[must_use]
    pub fn get(&self, actor_type: &str) -> Option<Arc<dyn ActorHandler>> {
        self.handlers.get(actor_type).cloned()
    }

    /// Check whether an actor type is registered.
    #[must_use]
    pub fn contains(&self, actor_type: &str) -> bool {
        self.handlers.contains_key(actor_type)
    }

    /// Return a sorted list of registered actor types.
    #[must_use]
    pub fn list(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        v.sort();
        v
    }

    /// Remove a registration, returning whether it existed.
    pub fn remove(&mut self, actor_type: &str) -> bool {
        self.handlers.remove(actor_type).is_some()
    }
}

/// Adapter running a WASM guest module behind the [`ActorHandler`] trait.
pub struct WasmModuleHandler {
    module: String,
    version: Option<String>,
    activity: Arc<dyn ActivityPort>,
}

impl WasmModuleHandler {
    /// Create an adapter for `(module, version)`.
    pub fn new(
        module: impl Into<String>,
        version: Option<String>,
        activity: Arc<dyn ActivityPort>,
    ) -> Self {
        Self {
            module: module.into(),
            version,
            activity,
        }
    }
}

#[async_trait]
impl ActorHandler for WasmModuleHandler {
    async fn execute(&self, ctx: &mut ActorContext, input: Value) -> Result<Value, LoomError> {
        // The guest receives the current state alongside the input and
        // returns `{state?, result}`; state replacement is journaled like
        // any recipe-driven update.
        let guest_input = serde_json::json!({
            "state": ctx.state().clone(),
            "input": input,
        });
        let output = self
            .activity
            .execute(&self.module, self.version.as_deref(), guest_input)
            .await?;
        if let Some(new_state) = output.get("state").cloned() {
            ctx.update_state(|state| *state = new_state);
        }
        Ok(output.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_actor::{ActorServices, EventRouter};
    use loom_config::{ConfigContext, ConfigResolver, MemoryConfigStore};
    use loom_core::{ActorRef, MessageBuilder};
    use loom_queue::{InMemoryMetadataStore, InMemoryQueue};
    use loom_resilience::RetryPolicy;
    use loom_state::StateManager;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl ActorHandler for Echo {
        async fn execute(&self, _ctx: &mut ActorContext, input: Value) -> Result<Value, LoomError> {
            Ok(input)
        }
    }

    struct StubActivity;

    #[async_trait]
    impl ActivityPort for StubActivity {
        async fn execute(
            &self,
            module: &str,
            version: Option<&str>,
            input: Value,
        ) -> Result<Value, LoomError> {
            Ok(json!({
                "state": {"ran": module, "version": version},
                "result": input["input"].clone(),
            }))
        }
    }

    fn test_context() -> ActorContext {
        let actor = ActorRef::new("t", "wasm-type", "a-1");
        let message = MessageBuilder::new(actor.clone(), "run").build();
        let services = Arc::new(ActorServices {
            config: Arc::new(ConfigResolver::new(Arc::new(MemoryConfigStore::new()))),
            memory: None,
            queue: Arc::new(InMemoryQueue::new(
                Arc::new(InMemoryMetadataStore::new()),
                RetryPolicy::default(),
                3,
            )),
            router: Arc::new(EventRouter::new()),
            base_context: ConfigContext::new(),
            suspend_timeout: std::time::Duration::from_secs(5),
        });
        ActorContext::new(actor, message, StateManager::new(json!({})), services)
    }

    #[test]
    fn register_get_list_remove() {
        let mut registry = ActorRegistry::new();
        registry.register("crm", Echo);
        registry.register("billing", Echo);
        assert!(registry.contains("crm"));
        assert_eq!(registry.list(), vec!["billing", "crm"]);
        assert!(registry.get("crm").is_some());
        assert!(registry.remove("crm"));
        assert!(!registry.contains("crm"));
    }

    #[tokio::test]
    async fn wasm_handler_updates_state_and_returns_result() {
        let mut registry = ActorRegistry::new();
        registry.register_wasm("wasm-type", Some("1.2.0".into()), Arc::new(StubActivity));

        let handler = registry.get("wasm-type").unwrap();
        let mut ctx = test_context();
        let result = handler.execute(&mut ctx, json!({"n": 5})).await.unwrap();
        assert_eq!(result, json!({"n": 5}));
        assert_eq!(ctx.state()["ran"], "wasm-type");
        assert_eq!(ctx.state()["version"], "1.2.0");
        // The state replacement went through the journal.
        assert_eq!(ctx.state_manager().journal().len(), 1);
    }
}
