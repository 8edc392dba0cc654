// SPDX-License-Identifier: MIT OR Apache-2.0
//! Layered configuration resolver.
//!
//! Reads go through an optional TTL cache in front of the persist store:
//! a fresh cache entry is authoritative, a stale or missing one falls
//! through to the persist layer and re-populates the cache.  Writes are
//! write-through — persist first, then cache, where a cache failure is
//! logged and ignored.  `get_all` and `list_keys` always consult the
//! persist layer, since the cache may be partial.

use crate::context::ConfigContext;
use crate::keypath::validate_key_path;
use crate::store::{ConfigRecord, ConfigStore};
use crate::ConfigError;
use chrono::Utc;
use loom_error::LoomError;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// What changed in a [`ConfigChange`] notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChangeKind {
    /// A path was written.
    Set,
    /// A path was removed.
    Delete,
}

/// In-process change notification delivered on every successful write.
#[derive(Debug, Clone)]
pub struct ConfigChange {
    /// What happened.
    pub kind: ConfigChangeKind,
    /// The affected path.
    pub path: String,
    /// The new value for `Set`, `None` for `Delete`.
    pub value: Option<Value>,
}

type Listener = Arc<dyn Fn(&ConfigChange) + Send + Sync>;

/// Handle returned by [`ConfigResolver::on_change`]; unsubscribes the
/// listener when consumed.
pub struct ChangeListenerHandle {
    id: u64,
    listeners: Arc<Mutex<Vec<(u64, Listener)>>>,
}

impl ChangeListenerHandle {
    /// Remove the listener this handle refers to.
    pub fn unsubscribe(self) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Layered, context-aware configuration resolver.
pub struct ConfigResolver {
    persist: Arc<dyn ConfigStore>,
    cache: Option<Arc<dyn ConfigStore>>,
    cache_ttl: Duration,
    listeners: Arc<Mutex<Vec<(u64, Listener)>>>,
    next_listener_id: AtomicU64,
}

impl ConfigResolver {
    /// Create a resolver over the persist store alone (no cache layer).
    pub fn new(persist: Arc<dyn ConfigStore>) -> Self {
        Self {
            persist,
            cache: None,
            cache_ttl: Duration::ZERO,
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
        }
    }

    /// Attach a cache layer with the given freshness window.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn ConfigStore>, cache_ttl: Duration) -> Self {
        self.cache = Some(cache);
        self.cache_ttl = cache_ttl;
        self
    }

    /// Fetch the value at an exact path.
    ///
    /// Never synthesizes a value: `Ok(None)` means the path is absent from
    /// both layers.
    pub async fn get(&self, path: &str) -> Result<Option<Value>, ConfigError> {
        validate_key_path(path)?;
        if let Some(cache) = &self.cache {
            match cache.get(path).await {
                Ok(Some(rec)) if self.is_fresh(&rec) => {
                    debug!(target: "loom.config", %path, "cache hit");
                    return Ok(Some(rec.value));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(target: "loom.config", %path, error = %e, "cache read failed");
                }
            }
        }
        match self.persist.get(path).await? {
            Some(rec) => {
                self.refresh_cache(path, &rec.value).await;
                Ok(Some(rec.value))
            }
            None => Ok(None),
        }
    }

    /// Resolve `key` through the fallback paths of `ctx`, returning the value
    /// at the first path that resolves.
    pub async fn get_with_context(
        &self,
        key: &str,
        ctx: &ConfigContext,
    ) -> Result<Option<Value>, ConfigError> {
        validate_key_path(key)?;
        for path in ctx.fallback_paths(key) {
            if let Some(value) = self.get(&path).await? {
                debug!(target: "loom.config", %key, %path, "resolved");
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Resolve a required key; absence is an error enumerating every
    /// searched path.
    pub async fn get_config(&self, key: &str, ctx: &ConfigContext) -> Result<Value, LoomError> {
        let searched = ctx.fallback_paths(key);
        match self.get_with_context(key, ctx).await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(LoomError::config_missing(key, &searched)),
            Err(e) => Err(LoomError::new(
                loom_error::ErrorCode::ConfigInvalid,
                format!("config lookup for '{key}' failed: {e}"),
            )),
        }
    }

    /// Resolve an optional key; absence and store errors both come back as
    /// `None` (errors are logged).
    pub async fn try_get_config(&self, key: &str, ctx: &ConfigContext) -> Option<Value> {
        match self.get_with_context(key, ctx).await {
            Ok(v) => v,
            Err(e) => {
                warn!(target: "loom.config", %key, error = %e, "optional lookup failed");
                None
            }
        }
    }

    /// Fetch every record under `prefix` from the persist layer.
    pub async fn get_all(&self, prefix: &str) -> Result<Vec<ConfigRecord>, ConfigError> {
        self.persist.get_all(prefix).await
    }

    /// List every key under `prefix` from the persist layer.
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, ConfigError> {
        self.persist.list_keys(prefix).await
    }

    /// Write `value` at `path` (persist first, then cache) and notify
    /// listeners.
    pub async fn set(&self, path: &str, value: Value) -> Result<(), ConfigError> {
        validate_key_path(path)?;
        self.persist.set(path, value.clone()).await?;
        self.refresh_cache(path, &value).await;
        self.notify(&ConfigChange {
            kind: ConfigChangeKind::Set,
            path: path.to_string(),
            value: Some(value),
        });
        Ok(())
    }

    /// Delete `path` (persist first, then cache) and notify listeners when
    /// something was removed.
    pub async fn delete(&self, path: &str) -> Result<bool, ConfigError> {
        validate_key_path(path)?;
        let removed = self.persist.delete(path).await?;
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.delete(path).await {
                warn!(target: "loom.config", %path, error = %e, "cache delete failed");
            }
        }
        if removed {
            self.notify(&ConfigChange {
                kind: ConfigChangeKind::Delete,
                path: path.to_string(),
                value: None,
            });
        }
        Ok(removed)
    }

    /// Register a change listener, called synchronously on every successful
    /// `set` and `delete`.  A panicking listener is logged and skipped; it
    /// never blocks delivery to the others.
    #[must_use]
    pub fn on_change(
        &self,
        listener: impl Fn(&ConfigChange) + Send + Sync + 'static,
    ) -> ChangeListenerHandle {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push((id, Arc::new(listener)));
        }
        ChangeListenerHandle {
            id,
            listeners: Arc::clone(&self.listeners),
        }
    }

    fn notify(&self, change: &ConfigChange) {
        let snapshot: Vec<Listener> = match self.listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
            Err(_) => return,
        };
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(change))).is_err() {
                warn!(target: "loom.config", path = %change.path, "change listener panicked");
            }
        }
    }

    fn is_fresh(&self, rec: &ConfigRecord) -> bool {
        let age = Utc::now().signed_duration_since(rec.updated_at);
        age.to_std().is_ok_and(|age| age <= self.cache_ttl)
    }

    async fn refresh_cache(&self, path: &str, value: &Value) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(path, value.clone()).await {
                // The next read will fall through and re-populate.
                warn!(target: "loom.config", %path, error = %e, "cache write failed");
            }
        }
    }
}
