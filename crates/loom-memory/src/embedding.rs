// SPDX-License-Identifier: MIT OR Apache-2.0
//! Embedding provider port and deterministic reference embedders.

use crate::MemoryError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

/// Port over an embedding backend.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Fixed output dimension of this provider.
    fn dimension(&self) -> usize;

    /// Embed `text` into a vector of [`dimension`](Self::dimension) floats.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError>;
}

/// Deterministic, hash-seeded embedder.
///
/// Produces stable unit vectors from text with no model behind it: equal
/// inputs embed identically, unrelated inputs land far apart.  Suitable for
/// development and tests, not for semantic similarity.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// Create an embedder producing vectors of the given dimension.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let mut out = Vec::with_capacity(self.dimension);
        let mut block = Sha256::digest(text.as_bytes());
        'fill: loop {
            for chunk in block.chunks_exact(4) {
                let bits = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                // Map to (-1, 1).
                out.push((f64::from(bits) / f64::from(u32::MAX) * 2.0 - 1.0) as f32);
                if out.len() == self.dimension {
                    break 'fill;
                }
            }
            block = Sha256::digest(block);
        }
        let norm = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut out {
                *x /= norm;
            }
        }
        Ok(out)
    }
}

/// Table-driven embedder for tests: known texts map to fixed vectors,
/// unknown texts fall back to [`HashingEmbedder`].
pub struct StaticEmbedder {
    dimension: usize,
    table: Mutex<HashMap<String, Vec<f32>>>,
    fallback: HashingEmbedder,
}

impl StaticEmbedder {
    /// Create an empty table with the given dimension.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            table: Mutex::new(HashMap::new()),
            fallback: HashingEmbedder::new(dimension),
        }
    }

    /// Register the embedding returned for an exact text.
    pub fn insert(&self, text: impl Into<String>, embedding: Vec<f32>) {
        if let Ok(mut table) = self.table.lock() {
            table.insert(text.into(), embedding);
        }
    }
}

#[async_trait]
impl EmbeddingProvider for StaticEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let known = self
            .table
            .lock()
            .ok()
            .and_then(|table| table.get(text).cloned());
        match known {
            Some(v) if v.len() == self.dimension => Ok(v),
            Some(v) => Err(MemoryError::DimensionMismatch {
                expected: self.dimension,
                got: v.len(),
            }),
            None => self.fallback.embed(text).await,
        }
    }
}
