// SPDX-License-Identifier: MIT OR Apache-2.0
//! The memory index: embedding on insert, dedup-by-similarity, partitioned
//! search, and the semantic cache.

use crate::embedding::EmbeddingProvider;
use crate::vector::{ScoredItem, SearchFilter, VectorIndex};
use crate::{MemoryError, MemoryItem, MemoryKind, MemoryMetadata};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Tuning knobs for the memory index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Whether near-duplicate inserts merge into the existing item.
    pub dedup_enabled: bool,
    /// Similarity at or above which an insert counts as a duplicate.
    pub dedup_threshold: f32,
    /// Similarity at or above which a cache lookup hits.
    pub cache_threshold: f32,
    /// Default result limit for searches.
    pub default_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            dedup_enabled: true,
            dedup_threshold: 0.95,
            cache_threshold: 0.9,
            default_limit: 10,
        }
    }
}

/// Options for [`MemoryIndex::add`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AddOptions {
    /// Keep the provided (possibly empty) embedding instead of computing one.
    pub skip_embedding: bool,
    /// Bypass dedup for this insert.
    pub skip_dedup: bool,
}

/// Result of an [`MemoryIndex::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOutcome {
    /// Id of the inserted item, or of the existing item merged into.
    pub id: String,
    /// Whether the insert merged into an existing near-duplicate.
    pub merged: bool,
}

/// Options for [`MemoryIndex::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Owning tenant (required).
    pub tenant_id: String,
    /// Restrict to one thread.
    pub thread_id: Option<String>,
    /// Restrict to one category.
    pub category: Option<String>,
    /// Restrict to one kind.
    pub kind: Option<MemoryKind>,
    /// Result limit (defaults to the index's configured limit).
    pub limit: Option<usize>,
}

/// A semantic-cache hit.
#[derive(Debug, Clone)]
pub struct CacheHit {
    /// The cached response.
    pub response: String,
    /// Age of the cached entry in seconds.
    pub age_sec: u64,
    /// Similarity between the query and the cached entry.
    pub similarity: f32,
    /// The cached item's metadata.
    pub metadata: MemoryMetadata,
}

/// Vector-indexed semantic memory for one deployment.
pub struct MemoryIndex {
    provider: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    config: MemoryConfig,
}

impl std::fmt::Debug for MemoryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryIndex")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MemoryIndex {
    /// Create an index, validating that the provider and the vector
    /// container agree on the embedding dimension.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        config: MemoryConfig,
    ) -> Result<Self, MemoryError> {
        if provider.dimension() != index.dimension() {
            return Err(MemoryError::DimensionMismatch {
                expected: index.dimension(),
                got: provider.dimension(),
            });
        }
        Ok(Self {
            provider,
            index,
            config,
        })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Insert a memory item.
    ///
    /// An absent embedding is computed from `content` (falling back to
    /// `text`).  With dedup enabled, a sufficiently similar existing item in
    /// the same `(tenant, thread, category)` partition absorbs the insert:
    /// the new text is appended, `occurrences` is bumped, and the existing
    /// id is returned.
    pub async fn add(
        &self,
        mut item: MemoryItem,
        opts: AddOptions,
    ) -> Result<AddOutcome, MemoryError> {
        if item.embedding.is_empty() && !opts.skip_embedding {
            let source = if item.content.is_empty() {
                item.text.clone()
            } else {
                item.content.clone()
            };
            item.embedding = self.provider.embed(&source).await?;
        }
        if item.metadata.hash.is_empty() {
            let source = if item.content.is_empty() {
                &item.text
            } else {
                &item.content
            };
            item.metadata.hash = content_hash(source);
        }
        if item.id.is_empty() {
            item.id = Uuid::new_v4().to_string();
        }
        if item.metadata.occurrences == 0 {
            item.metadata.occurrences = 1;
        }

        let dedup = self.config.dedup_enabled
            && !opts.skip_dedup
            && item.kind != MemoryKind::SemanticCache
            && !item.embedding.is_empty();
        if dedup {
            let filter = SearchFilter {
                tenant_id: item.tenant_id.clone(),
                thread_id: Some(item.thread_id.clone()),
                category: item.category.clone(),
                kind: None,
            };
            let similar = self
                .find_similar(&item.embedding, self.config.dedup_threshold, &filter)
                .await?;
            if let Some(hit) = similar.into_iter().next() {
                let mut existing = hit.item;
                debug!(
                    target: "loom.memory",
                    id = %existing.id,
                    similarity = 1.0 - hit.distance,
                    "merging near-duplicate"
                );
                if !item.text.is_empty() {
                    existing.text.push('\n');
                    existing.text.push_str(&item.text);
                }
                existing.metadata.occurrences += 1;
                existing.metadata.last_updated = Some(Utc::now());
                let id = existing.id.clone();
                self.index.update(existing).await?;
                return Ok(AddOutcome { id, merged: true });
            }
        }

        let id = item.id.clone();
        self.index.insert(item).await?;
        Ok(AddOutcome { id, merged: false })
    }

    /// Fetch an item by id within its `(tenant, thread)` partition.
    pub async fn get(
        &self,
        id: &str,
        tenant_id: &str,
        thread_id: &str,
    ) -> Result<Option<MemoryItem>, MemoryError> {
        Ok(self
            .index
            .get(id)
            .await?
            .filter(|item| item.tenant_id == tenant_id && item.thread_id == thread_id))
    }

    /// Replace an item.
    pub async fn update(&self, item: MemoryItem) -> Result<(), MemoryError> {
        self.index.update(item).await
    }

    /// Delete an item; returns whether it existed.
    pub async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        self.index.delete(id).await
    }

    /// Embed `query` and return the nearest items in the partition, ordered
    /// by ascending distance.
    pub async fn search(
        &self,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<Vec<ScoredItem>, MemoryError> {
        let embedding = self.provider.embed(query).await?;
        let filter = SearchFilter {
            tenant_id: opts.tenant_id.clone(),
            thread_id: opts.thread_id.clone(),
            category: opts.category.clone(),
            kind: opts.kind,
        };
        self.index
            .search(
                &embedding,
                &filter,
                opts.limit.unwrap_or(self.config.default_limit),
            )
            .await
    }

    /// Items within `filter` whose similarity to `embedding` is at least
    /// `threshold`, nearest first.
    pub async fn find_similar(
        &self,
        embedding: &[f32],
        threshold: f32,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredItem>, MemoryError> {
        let max_distance = 1.0 - threshold;
        let hits = self
            .index
            .search(embedding, filter, self.config.default_limit)
            .await?;
        Ok(hits
            .into_iter()
            .filter(|h| h.distance <= max_distance)
            .collect())
    }

    /// Look up a cached response for `query` by embedding similarity.
    ///
    /// A hit requires `distance < 1 - cache_threshold`; a hit older than
    /// `max_age_sec` (when given) is treated as absent.
    pub async fn check_semantic_cache(
        &self,
        query: &str,
        tenant_id: &str,
        max_age_sec: Option<u64>,
    ) -> Result<Option<CacheHit>, MemoryError> {
        let embedding = self.provider.embed(query).await?;
        let filter = SearchFilter {
            tenant_id: tenant_id.to_string(),
            thread_id: None,
            category: None,
            kind: Some(MemoryKind::SemanticCache),
        };
        let hits = self.index.search(&embedding, &filter, 1).await?;
        let Some(hit) = hits.into_iter().next() else {
            return Ok(None);
        };
        if hit.distance >= 1.0 - self.config.cache_threshold {
            return Ok(None);
        }
        let age_sec = Utc::now()
            .signed_duration_since(hit.item.timestamp)
            .num_seconds()
            .max(0) as u64;
        if max_age_sec.is_some_and(|max| age_sec > max) {
            debug!(target: "loom.memory", age_sec, "semantic cache entry too old");
            return Ok(None);
        }
        Ok(Some(CacheHit {
            response: hit.item.content.clone(),
            age_sec,
            similarity: 1.0 - hit.distance,
            metadata: hit.item.metadata,
        }))
    }

    /// Cache `response` for `query`.
    ///
    /// Cache entries never merge: each insert is a fresh item whose
    /// `thread_id` is derived from a stable hash of the query, so entries
    /// for the same query land in the same partition across writers.
    pub async fn add_to_cache(
        &self,
        query: &str,
        response: &str,
        tenant_id: &str,
        ttl_sec: Option<u64>,
    ) -> Result<String, MemoryError> {
        let embedding = self.provider.embed(query).await?;
        let item = MemoryItem {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            thread_id: cache_partition(query),
            turn_index: 0,
            text: query.to_string(),
            content: response.to_string(),
            embedding,
            timestamp: Utc::now(),
            kind: MemoryKind::SemanticCache,
            category: None,
            ttl_sec,
            metadata: MemoryMetadata {
                hash: content_hash(response),
                occurrences: 1,
                last_updated: None,
                extra: Default::default(),
            },
        };
        let id = item.id.clone();
        self.index.insert(item).await?;
        Ok(id)
    }

    /// The most recent non-cache memories in a thread, newest first.
    pub async fn get_recent_memories(
        &self,
        tenant_id: &str,
        thread_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryItem>, MemoryError> {
        let filter = SearchFilter {
            tenant_id: tenant_id.to_string(),
            thread_id: Some(thread_id.to_string()),
            category: None,
            kind: None,
        };
        let mut items: Vec<MemoryItem> = self
            .index
            .list(&filter)
            .await?
            .into_iter()
            .filter(|item| item.kind != MemoryKind::SemanticCache)
            .collect();
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        items.truncate(limit);
        Ok(items)
    }
}

/// SHA-256 of `content`, hex-encoded.
#[must_use]
pub fn content_hash(content: &str) -> String {
    Sha256::digest(content.as_bytes())
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Stable cache partition for a query: a fixed-prefix of the query hash,
/// not a random id, so all writers agree on the partition.
#[must_use]
pub fn cache_partition(query: &str) -> String {
    let hash = content_hash(query);
    format!("cache-{}", &hash[..16.min(hash.len())])
}
