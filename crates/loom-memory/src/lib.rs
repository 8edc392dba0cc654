// SPDX-License-Identifier: MIT OR Apache-2.0
//! loom-memory
//!
//! Vector-indexed semantic memory.
//!
//! Responsibilities:
//! - the embedding and vector-index ports, with in-tree reference
//!   implementations
//! - dedup-on-insert: near-duplicates merge into the existing item instead
//!   of inserting
//! - partitioned vector search, ordered by ascending cosine distance
//! - the semantic cache: lookup by embedding similarity, never by key

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Embedding provider port and deterministic reference embedders.
pub mod embedding;
/// The memory index orchestrating embedding, dedup, search, and caching.
pub mod index;
/// Vector index port and the in-memory cosine implementation.
pub mod vector;

pub use embedding::{EmbeddingProvider, HashingEmbedder, StaticEmbedder};
pub use index::{
    AddOptions, AddOutcome, CacheHit, MemoryConfig, MemoryIndex, SearchOptions,
};
pub use vector::{InMemoryVectorIndex, ScoredItem, SearchFilter, VectorIndex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Memory item lifetimes and roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryKind {
    /// Working memory for the current conversation window.
    #[serde(rename = "short-term")]
    ShortTerm,
    /// Durable memory surviving across threads.
    #[serde(rename = "long-term")]
    LongTerm,
    /// Cached responses keyed by embedding similarity.
    #[serde(rename = "semantic-cache")]
    SemanticCache,
}

/// Structured metadata carried on every memory item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    /// SHA-256 of the item's content.
    pub hash: String,
    /// How many near-duplicate inserts merged into this item.
    pub occurrences: u32,
    /// When the item was last merged into or updated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// Open extension fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One item in the memory index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Unique item identifier.
    pub id: String,
    /// Owning tenant; every query is partitioned by it.
    pub tenant_id: String,
    /// Conversation thread (or derived cache partition).
    pub thread_id: String,
    /// Position within the thread.
    #[serde(default)]
    pub turn_index: u32,
    /// Display text (merged texts accumulate here).
    pub text: String,
    /// Canonical content the embedding and hash are computed from.
    pub content: String,
    /// Embedding vector; dimension is fixed per container.
    pub embedding: Vec<f32>,
    /// When the item was created.
    pub timestamp: DateTime<Utc>,
    /// Lifetime/role of the item.
    pub kind: MemoryKind,
    /// Optional category partition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Time-to-live in seconds; expired items stop resolving.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_sec: Option<u64>,
    /// Structured metadata.
    #[serde(default)]
    pub metadata: MemoryMetadata,
}

impl MemoryItem {
    /// Whether the item's TTL has elapsed at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ttl_sec.is_some_and(|ttl| {
            now.signed_duration_since(self.timestamp)
                .num_seconds()
                .max(0) as u64
                > ttl
        })
    }
}

/// Errors from the memory subsystem.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// A vector's dimension does not match the container's.
    #[error("embedding dimension {got} does not match container dimension {expected}")]
    DimensionMismatch {
        /// Dimension the container was initialised with.
        expected: usize,
        /// Dimension that was provided.
        got: usize,
    },
    /// The embedding provider failed.
    #[error("embedding failed: {reason}")]
    Embedding {
        /// Provider-reported detail.
        reason: String,
    },
    /// The vector backend failed.
    #[error("vector store failed: {0}")]
    Backend(#[source] anyhow::Error),
}

/// Cosine similarity of two vectors, in `[-1, 1]`; zero-norm inputs score 0.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Cosine distance: `1 - similarity`, so identical vectors are at 0.
#[must_use]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}
