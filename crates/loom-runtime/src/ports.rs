// SPDX-License-Identifier: MIT OR Apache-2.0
//! Outbound ports of the runtime and their reference implementations.
//!
//! The concrete storage engines are pluggable; the in-memory
//! implementations back tests and single-process deployments, and the
//! file-backed state store is the persistent reference implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loom_core::{ActorRef, InvocationOutcome};
use loom_error::LoomError;
use loom_state::Journal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// State port
// ---------------------------------------------------------------------------

/// Persisted actor record: the materialized projection plus the
/// authoritative journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorRecord {
    /// Actor identity.
    pub actor_ref: ActorRef,
    /// Materialized state projection (fast start; journal wins on conflict).
    pub state: Value,
    /// The authoritative journal.
    pub journal: Journal,
    /// Most recent invocation summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_invocation: Option<InvocationOutcome>,
    /// Monotonic per-actor persistence counter.
    pub logical_clock: u64,
    /// When the record was last saved.
    pub updated_at: DateTime<Utc>,
}

/// Port over the actor state store.
#[async_trait]
pub trait StatePort: Send + Sync {
    /// Load the record for an actor, if one exists.
    async fn load(&self, actor: &ActorRef) -> anyhow::Result<Option<ActorRecord>>;

    /// Save (upsert) the record for an actor.
    async fn save(&self, actor: &ActorRef, record: ActorRecord) -> anyhow::Result<()>;

    /// Qualified ids of every stored actor, for recovery sweeps.
    async fn keys(&self) -> anyhow::Result<Vec<String>>;

    /// Remove an actor's record; returns whether it existed.
    async fn remove(&self, actor: &ActorRef) -> anyhow::Result<bool>;
}

/// In-memory [`StatePort`].
#[derive(Default)]
pub struct InMemoryStateStore {
    records: Mutex<HashMap<String, ActorRecord>>,
}

impl InMemoryStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatePort for InMemoryStateStore {
    async fn load(&self, actor: &ActorRef) -> anyhow::Result<Option<ActorRecord>> {
        Ok(self.records.lock().await.get(&actor.qualified()).cloned())
    }

    async fn save(&self, actor: &ActorRef, record: ActorRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .await
            .insert(actor.qualified(), record);
        Ok(())
    }

    async fn keys(&self) -> anyhow::Result<Vec<String>> {
        let mut keys: Vec<String> = self.records.lock().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn remove(&self, actor: &ActorRef) -> anyhow::Result<bool> {
        Ok(self.records.lock().await.remove(&actor.qualified()).is_some())
    }
}

/// File-backed [`StatePort`]: one JSON file per actor under a root
/// directory, named by a sanitized qualified id.
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn record_path(&self, actor: &ActorRef) -> PathBuf {
        // Qualified ids contain '/', which cannot appear in file names.
        let name = actor.qualified().replace('/', "__");
        self.root.join(format!("{name}.json"))
    }
}

#[async_trait]
impl StatePort for FileStateStore {
    async fn load(&self, actor: &ActorRef) -> anyhow::Result<Option<ActorRecord>> {
        let path = self.record_path(actor);
        match std::fs::read_to_string(&path) {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("read actor record {}", path.display()))),
        }
    }

    async fn save(&self, actor: &ActorRef, record: ActorRecord) -> anyhow::Result<()> {
        let path = self.record_path(actor);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&record)?;
        std::fs::write(&path, json)?;
        Ok(())
    }

    async fn keys(&self) -> anyhow::Result<Vec<String>> {
        let dir = match std::fs::read_dir(&self.root) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut keys = Vec::new();
        for entry in dir {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.replace("__", "/"));
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn remove(&self, actor: &ActorRef) -> anyhow::Result<bool> {
        let path = self.record_path(actor);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Lease port
// ---------------------------------------------------------------------------

/// Port over the advisory-lock store enforcing per-actor mutual exclusion.
#[async_trait]
pub trait LeasePort: Send + Sync {
    /// Try to acquire an exclusive lease on `resource` for `ttl`.
    ///
    /// Returns the lease id, or `None` when another holder is alive.
    async fn acquire(&self, resource: &str, ttl: Duration) -> anyhow::Result<Option<String>>;

    /// Extend a held lease; returns `false` when the lease is gone.
    async fn renew(&self, lease_id: &str, ttl: Duration) -> anyhow::Result<bool>;

    /// Release a held lease.
    async fn release(&self, lease_id: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
struct LeaseEntry {
    lease_id: String,
    resource: String,
    expires_at: Instant,
}

/// In-memory [`LeasePort`].
#[derive(Default)]
pub struct InMemoryLeaseStore {
    by_resource: Mutex<HashMap<String, LeaseEntry>>,
}

impl InMemoryLeaseStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeasePort for InMemoryLeaseStore {
    async fn acquire(&self, resource: &str, ttl: Duration) -> anyhow::Result<Option<String>> {
        let mut leases = self.by_resource.lock().await;
        let now = Instant::now();
        if let Some(existing) = leases.get(resource) {
            if existing.expires_at > now {
                return Ok(None);
            }
        }
        let lease_id = Uuid::new_v4().to_string();
        leases.insert(
            resource.to_string(),
            LeaseEntry {
                lease_id: lease_id.clone(),
                resource: resource.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(Some(lease_id))
    }

    async fn renew(&self, lease_id: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut leases = self.by_resource.lock().await;
        let now = Instant::now();
        for entry in leases.values_mut() {
            if entry.lease_id == lease_id {
                if entry.expires_at <= now {
                    return Ok(false);
                }
                entry.expires_at = now + ttl;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn release(&self, lease_id: &str) -> anyhow::Result<()> {
        let mut leases = self.by_resource.lock().await;
        let resource = leases
            .values()
            .find(|e| e.lease_id == lease_id)
            .map(|e| e.resource.clone());
        if let Some(resource) = resource {
            leases.remove(&resource);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Idempotency store
// ---------------------------------------------------------------------------

/// Key identifying one logical request against one actor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    /// Owning tenant.
    pub tenant_id: String,
    /// Target actor id.
    pub actor_id: String,
    /// The logical-request key.
    pub idempotency_key: String,
}

impl IdempotencyKey {
    /// Key for a message addressed to `actor`.
    #[must_use]
    pub fn for_actor(actor: &ActorRef, idempotency_key: impl Into<String>) -> Self {
        Self {
            tenant_id: actor.tenant_id.clone(),
            actor_id: actor.actor_id.clone(),
            idempotency_key: idempotency_key.into(),
        }
    }
}

/// Result stored under an idempotency key after first successful
/// processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResult {
    /// The handler result replayed to duplicates.
    pub result: Value,
    /// Message id of the invocation that produced it.
    pub message_id: String,
    /// When the result was stored.
    pub stored_at: DateTime<Utc>,
}

/// Port over the idempotency store.
///
/// Entries are keyed to guarantee a single winner; `put` is last-writer-wins
/// because only one worker can hold the actor's lease at a time.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Look up the stored result for a key.
    async fn get(&self, key: &IdempotencyKey) -> anyhow::Result<Option<StoredResult>>;

    /// Record the result for a key.
    async fn put(&self, key: IdempotencyKey, result: StoredResult) -> anyhow::Result<()>;
}

/// In-memory [`IdempotencyStore`].
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    entries: Mutex<HashMap<IdempotencyKey, StoredResult>>,
}

impl InMemoryIdempotencyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &IdempotencyKey) -> anyhow::Result<Option<StoredResult>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(&self, key: IdempotencyKey, result: StoredResult) -> anyhow::Result<()> {
        self.entries.lock().await.insert(key, result);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Activity port
// ---------------------------------------------------------------------------

/// Port over the activity executor.
///
/// Modules are resolved by `(module, version)` from a blob-like store on the
/// other side of this port; the runtime only ever invokes them.
#[async_trait]
pub trait ActivityPort: Send + Sync {
    /// Execute the named module against `input`.
    async fn execute(
        &self,
        module: &str,
        version: Option<&str>,
        input: Value,
    ) -> Result<Value, LoomError>;
}

// ---------------------------------------------------------------------------
// Authorization port
// ---------------------------------------------------------------------------

/// Outcome of an authorization check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationDecision {
    /// Whether the action is allowed.
    pub allow: bool,
    /// Why the decision was made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Permissions the principal would need.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_permissions: Vec<String>,
}

/// Optional authorization plugin; absent plugin means allow-all.
#[async_trait]
pub trait AuthorizationPort: Send + Sync {
    /// Decide whether `principal` may perform `action` on `resource`.
    async fn authorize(
        &self,
        principal: &str,
        resource: &str,
        action: &str,
    ) -> AuthorizationDecision;
}

/// The default authorization policy when no plugin is configured.
pub struct AllowAll;

#[async_trait]
impl AuthorizationPort for AllowAll {
    async fn authorize(
        &self,
        _principal: &str,
        _resource: &str,
        _action: &str,
    ) -> AuthorizationDecision {
        AuthorizationDecision {
            allow: true,
            reason: None,
            required_permissions: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn actor() -> ActorRef {
        ActorRef::new("t", "ty", "a-1")
    }

    fn record(actor: &ActorRef, clock: u64) -> ActorRecord {
        ActorRecord {
            actor_ref: actor.clone(),
            state: json!({"clock": clock}),
            journal: Journal::new(),
            last_invocation: None,
            logical_clock: clock,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn memory_state_store_round_trips() {
        let store = InMemoryStateStore::new();
        assert!(store.load(&actor()).await.unwrap().is_none());
        store.save(&actor(), record(&actor(), 1)).await.unwrap();
        let loaded = store.load(&actor()).await.unwrap().unwrap();
        assert_eq!(loaded.logical_clock, 1);
        assert_eq!(store.keys().await.unwrap(), vec!["t/ty/a-1"]);
        assert!(store.remove(&actor()).await.unwrap());
        assert!(!store.remove(&actor()).await.unwrap());
    }

    #[tokio::test]
    async fn file_state_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        store.save(&actor(), record(&actor(), 7)).await.unwrap();
        let loaded = store.load(&actor()).await.unwrap().unwrap();
        assert_eq!(loaded.logical_clock, 7);
        assert_eq!(store.keys().await.unwrap(), vec!["t/ty/a-1"]);

        // A second instance over the same directory sees the record.
        let store2 = FileStateStore::new(dir.path());
        assert!(store2.load(&actor()).await.unwrap().is_some());
        assert!(store2.remove(&actor()).await.unwrap());
        assert!(store2.load(&actor()).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn lease_is_exclusive_until_expiry() {
        let leases = InMemoryLeaseStore::new();
        let ttl = Duration::from_secs(30);
        let held = leases.acquire("t/ty/a-1", ttl).await.unwrap().unwrap();
        assert!(leases.acquire("t/ty/a-1", ttl).await.unwrap().is_none());

        // Renewal extends the claim.
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(leases.renew(&held, ttl).await.unwrap());
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(leases.acquire("t/ty/a-1", ttl).await.unwrap().is_none());

        // An expired lease can be taken over.
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(leases.acquire("t/ty/a-1", ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn released_lease_is_immediately_available() {
        let leases = InMemoryLeaseStore::new();
        let ttl = Duration::from_secs(30);
        let held = leases.acquire("r", ttl).await.unwrap().unwrap();
        leases.release(&held).await.unwrap();
        assert!(leases.acquire("r", ttl).await.unwrap().is_some());
        // Renewing a released lease reports it gone.
        assert!(!leases.renew(&held, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn idempotency_store_round_trips() {
        let store = InMemoryIdempotencyStore::new();
        let key = IdempotencyKey::for_actor(&actor(), "k-1");
        assert!(store.get(&key).await.unwrap().is_none());
        store
            .put(
                key.clone(),
                StoredResult {
                    result: json!({"ok": true}),
                    message_id: "m-1".into(),
                    stored_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        let stored = store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.result, json!({"ok": true}));

        // A different logical request does not collide.
        let other = IdempotencyKey::for_actor(&actor(), "k-2");
        assert!(store.get(&other).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn allow_all_permits_everything() {
        let auth = AllowAll;
        let decision = auth.authorize("anyone", "crm", "score").await;
        assert!(decision.allow);
    }
}
