// SPDX-License-Identifier: MIT OR Apache-2.0
//! Vector index port and the in-memory cosine implementation.

use crate::{cosine_distance, MemoryError, MemoryItem, MemoryKind};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Partition filter for vector search and listing.
///
/// `tenant_id` is mandatory: cross-tenant reads are not expressible.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Owning tenant (required).
    pub tenant_id: String,
    /// Restrict to one thread.
    pub thread_id: Option<String>,
    /// Restrict to one category.
    pub category: Option<String>,
    /// Restrict to one kind.
    pub kind: Option<MemoryKind>,
}

impl SearchFilter {
    /// Filter scoped to a tenant alone.
    #[must_use]
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            ..Self::default()
        }
    }

    /// Whether `item` falls inside this partition.
    #[must_use]
    pub fn matches(&self, item: &MemoryItem) -> bool {
        item.tenant_id == self.tenant_id
            && self.thread_id.as_deref().is_none_or(|t| item.thread_id == t)
            && self
                .category
                .as_deref()
                .is_none_or(|c| item.category.as_deref() == Some(c))
            && self.kind.is_none_or(|k| item.kind == k)
    }
}

/// A search hit with its cosine distance from the query.
#[derive(Debug, Clone)]
pub struct ScoredItem {
    /// The matching item.
    pub item: MemoryItem,
    /// Cosine distance (0 = identical direction).
    pub distance: f32,
}

/// Port over a vector store.
///
/// The vector dimension is fixed per container at initialization and every
/// write is validated against it.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// The container's fixed vector dimension.
    fn dimension(&self) -> usize;

    /// Insert a new item.
    async fn insert(&self, item: MemoryItem) -> Result<(), MemoryError>;

    /// Fetch an item by id (expired items resolve to `None`).
    async fn get(&self, id: &str) -> Result<Option<MemoryItem>, MemoryError>;

    /// Replace an existing item.
    async fn update(&self, item: MemoryItem) -> Result<(), MemoryError>;

    /// Delete an item; returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool, MemoryError>;

    /// Nearest items to `embedding` within `filter`, ordered by ascending
    /// distance, at most `limit`.
    async fn search(
        &self,
        embedding: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredItem>, MemoryError>;

    /// Every live item within `filter`, unordered.
    async fn list(&self, filter: &SearchFilter) -> Result<Vec<MemoryItem>, MemoryError>;
}

/// Brute-force in-memory [`VectorIndex`].
#[derive(Debug)]
pub struct InMemoryVectorIndex {
    dimension: usize,
    items: RwLock<HashMap<String, MemoryItem>>,
}

impl InMemoryVectorIndex {
    /// Create an index with a fixed vector dimension.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            items: RwLock::new(HashMap::new()),
        }
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<(), MemoryError> {
        if embedding.len() != self.dimension {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dimension,
                got: embedding.len(),
            });
        }
        Ok(())
    }

    /// Remove every expired item, returning how many were dropped.
    pub async fn prune_expired(&self) -> usize {
        let now = Utc::now();
        let mut items = self.items.write().await;
        let before = items.len();
        items.retain(|_, item| !item.is_expired(now));
        before - items.len()
    }

    /// Number of stored items, expired included.
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    /// Whether the index stores no items.
    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn insert(&self, item: MemoryItem) -> Result<(), MemoryError> {
        self.check_dimension(&item.embedding)?;
        self.items.write().await.insert(item.id.clone(), item);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryItem>, MemoryError> {
        let now = Utc::now();
        Ok(self
            .items
            .read()
            .await
            .get(id)
            .filter(|item| !item.is_expired(now))
            .cloned())
    }

    async fn update(&self, item: MemoryItem) -> Result<(), MemoryError> {
        self.check_dimension(&item.embedding)?;
        self.items.write().await.insert(item.id.clone(), item);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        Ok(self.items.write().await.remove(id).is_some())
    }

    async fn search(
        &self,
        embedding: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredItem>, MemoryError> {
        self.check_dimension(embedding)?;
        let now = Utc::now();
        let items = self.items.read().await;
        let mut hits: Vec<ScoredItem> = items
            .values()
            .filter(|item| filter.matches(item) && !item.is_expired(now))
            .map(|item| ScoredItem {
                distance: cosine_distance(embedding, &item.embedding),
                item: item.clone(),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn list(&self, filter: &SearchFilter) -> Result<Vec<MemoryItem>, MemoryError> {
        let now = Utc::now();
        let items = self.items.read().await;
        Ok(items
            .values()
            .filter(|item| filter.matches(item) && !item.is_expired(now))
            .cloned()
            .collect())
    }
}
