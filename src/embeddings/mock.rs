//! Deterministic mock embedding provider for offline use
//!
//! Produces deterministic vectors without any network calls:
//! - Same text → same embedding (reproducible tests)
//! - Different texts → different embeddings (similarity comparisons work)
//! - Configurable dimensions (8 by default, matching the dev stub contract)

use super::traits::EmbeddingProvider;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Deterministic mock embedding provider.
///
/// The seed for each vector is derived from the input length and content, then
/// spread across the configured number of dimensions by chained hashing, and
/// L2-normalised so cosine similarity behaves.
#[derive(Clone, Debug)]
pub struct MockEmbeddingProvider {
    dimensions: usize,
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new(8)
    }
}

impl MockEmbeddingProvider {
    /// Create a mock provider with the given embedding dimensions.
    ///
    /// The offline default is 8; use 768 to exercise the production shape.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn hash_to_embedding(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        (text.len() as u64).hash(&mut hasher);
        text.hash(&mut hasher);
        let mut hash = hasher.finish();

        let mut embedding = Vec::with_capacity(self.dimensions);
        for _ in 0..self.dimensions {
            // Map u64 to [-1.0, 1.0]
            let value = (hash as f64 / u64::MAX as f64) * 2.0 - 1.0;
            embedding.push(value as f32);

            // Chain hash for next dimension
            let mut h = DefaultHasher::new();
            hash.hash(&mut h);
            hash = h.finish();
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.hash_to_embedding(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.hash_to_embedding(t)).collect())
    }

    fn model_name(&self) -> &str {
        "mock-hash-embedding"
    }
}
