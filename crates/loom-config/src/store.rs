// SPDX-License-Identifier: MIT OR Apache-2.0
//! Config store port and reference implementations.
//!
//! The persist layer is pluggable; the in-memory store backs both tests and
//! the resolver's cache layer, and the file store is the reference document
//! backend (one JSON document per partition).

use crate::keypath::partition_of;
use crate::ConfigError;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio::sync::RwLock;

/// A persisted configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRecord {
    /// Full key path.
    pub key_path: String,
    /// Stored value.
    pub value: Value,
    /// When the path was first written.
    pub created_at: DateTime<Utc>,
    /// When the path was last written (cache layers refresh this on fill).
    pub updated_at: DateTime<Utc>,
}

/// Port over a configuration backend.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetch the record at `path`, if present.
    async fn get(&self, path: &str) -> Result<Option<ConfigRecord>, ConfigError>;

    /// Write `value` at `path`, preserving `created_at` on overwrite.
    async fn set(&self, path: &str, value: Value) -> Result<(), ConfigError>;

    /// Remove the record at `path`; returns whether anything was removed.
    async fn delete(&self, path: &str) -> Result<bool, ConfigError>;

    /// List every stored key path starting with `prefix`, sorted.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, ConfigError>;

    /// Fetch every record whose key path starts with `prefix`, sorted by path.
    async fn get_all(&self, prefix: &str) -> Result<Vec<ConfigRecord>, ConfigError>;
}

// ---------------------------------------------------------------------------
// Memory store
// ---------------------------------------------------------------------------

/// In-memory [`ConfigStore`], also used as the resolver's cache layer.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    entries: RwLock<HashMap<String, ConfigRecord>>,
}

impl MemoryConfigStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, path: &str) -> Result<Option<ConfigRecord>, ConfigError> {
        Ok(self.entries.read().await.get(path).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), ConfigError> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let created_at = entries.get(path).map_or(now, |r| r.created_at);
        entries.insert(
            path.to_string(),
            ConfigRecord {
                key_path: path.to_string(),
                value,
                created_at,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool, ConfigError> {
        Ok(self.entries.write().await.remove(path).is_some())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, ConfigError> {
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn get_all(&self, prefix: &str) -> Result<Vec<ConfigRecord>, ConfigError> {
        let entries = self.entries.read().await;
        let mut records: Vec<ConfigRecord> = entries
            .values()
            .filter(|r| r.key_path.starts_with(prefix))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.key_path.cmp(&b.key_path));
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// File-backed document store
// ---------------------------------------------------------------------------

/// File-backed [`ConfigStore`]: one JSON document per partition under a
/// root directory (`<root>/<partition>.json`).
#[derive(Debug)]
pub struct FileConfigStore {
    root: PathBuf,
}

type Partition = BTreeMap<String, ConfigRecord>;

impl FileConfigStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn partition_path(&self, partition: &str) -> PathBuf {
        self.root.join(format!("{partition}.json"))
    }

    fn load_partition(&self, partition: &str) -> Result<Partition, ConfigError> {
        let path = self.partition_path(partition);
        match std::fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json).map_err(|e| {
                ConfigError::Store(
                    anyhow::Error::new(e).context(format!("parse partition {}", path.display())),
                )
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Partition::new()),
            Err(e) => Err(ConfigError::Store(
                anyhow::Error::new(e).context(format!("read partition {}", path.display())),
            )),
        }
    }

    fn save_partition(&self, partition: &str, data: &Partition) -> Result<(), ConfigError> {
        let path = self.partition_path(partition);
        let write = || -> anyhow::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create config dir {}", parent.display()))?;
            }
            let json = serde_json::to_string_pretty(data)?;
            std::fs::write(&path, json)
                .with_context(|| format!("write partition {}", path.display()))?;
            Ok(())
        };
        write().map_err(ConfigError::Store)
    }

    fn list_partitions(&self) -> Result<Vec<String>, ConfigError> {
        let dir = match std::fs::read_dir(&self.root) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ConfigError::Store(
                    anyhow::Error::new(e)
                        .context(format!("read config dir {}", self.root.display())),
                ));
            }
        };
        let mut names = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|e| ConfigError::Store(e.into()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn get(&self, path: &str) -> Result<Option<ConfigRecord>, ConfigError> {
        let partition = self.load_partition(partition_of(path))?;
        Ok(partition.get(path).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), ConfigError> {
        let name = partition_of(path).to_string();
        let mut partition = self.load_partition(&name)?;
        let now = Utc::now();
        let created_at = partition.get(path).map_or(now, |r| r.created_at);
        partition.insert(
            path.to_string(),
            ConfigRecord {
                key_path: path.to_string(),
                value,
                created_at,
                updated_at: now,
            },
        );
        self.save_partition(&name, &partition)
    }

    async fn delete(&self, path: &str) -> Result<bool, ConfigError> {
        let name = partition_of(path).to_string();
        let mut partition = self.load_partition(&name)?;
        let removed = partition.remove(path).is_some();
        if removed {
            self.save_partition(&name, &partition)?;
        }
        Ok(removed)
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, ConfigError> {
        Ok(self
            .get_all(prefix)
            .await?
            .into_iter()
            .map(|r| r.key_path)
            .collect())
    }

    async fn get_all(&self, prefix: &str) -> Result<Vec<ConfigRecord>, ConfigError> {
        let mut records = Vec::new();
        for name in self.list_partitions()? {
            let partition = self.load_partition(&name)?;
            records.extend(
                partition
                    .into_values()
                    .filter(|r| r.key_path.starts_with(prefix)),
            );
        }
        records.sort_by(|a, b| a.key_path.cmp(&b.key_path));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_set_get_delete() {
        let store = MemoryConfigStore::new();
        store.set("acme/finance/llm", json!("gpt")).await.unwrap();
        let rec = store.get("acme/finance/llm").await.unwrap().unwrap();
        assert_eq!(rec.value, json!("gpt"));
        assert!(store.delete("acme/finance/llm").await.unwrap());
        assert!(!store.delete("acme/finance/llm").await.unwrap());
        assert!(store.get("acme/finance/llm").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store_preserves_created_at_on_overwrite() {
        let store = MemoryConfigStore::new();
        store.set("k", json!(1)).await.unwrap();
        let first = store.get("k").await.unwrap().unwrap();
        store.set("k", json!(2)).await.unwrap();
        let second = store.get("k").await.unwrap().unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.value, json!(2));
    }

    #[tokio::test]
    async fn memory_store_lists_by_prefix_sorted() {
        let store = MemoryConfigStore::new();
        store.set("acme/b", json!(1)).await.unwrap();
        store.set("acme/a", json!(2)).await.unwrap();
        store.set("other/c", json!(3)).await.unwrap();
        assert_eq!(store.list_keys("acme/").await.unwrap(), vec!["acme/a", "acme/b"]);
        assert_eq!(store.get_all("").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileConfigStore::new(dir.path());
            store.set("acme/finance/llm", json!("opus")).await.unwrap();
            store.set("global/llm", json!("haiku")).await.unwrap();
        }
        let store = FileConfigStore::new(dir.path());
        let rec = store.get("acme/finance/llm").await.unwrap().unwrap();
        assert_eq!(rec.value, json!("opus"));
        assert_eq!(
            store.list_keys("").await.unwrap(),
            vec!["acme/finance/llm", "global/llm"]
        );
    }

    #[tokio::test]
    async fn file_store_partitions_by_tenant_segment() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::new(dir.path());
        store.set("acme/finance/llm", json!(1)).await.unwrap();
        store.set("llm", json!(2)).await.unwrap();
        assert!(dir.path().join("finance.json").exists());
        assert!(dir.path().join("global.json").exists());
    }

    #[tokio::test]
    async fn file_store_missing_dir_reads_empty() {
        let store = FileConfigStore::new("/nonexistent/loom-config");
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.get_all("").await.unwrap().is_empty());
    }
}
