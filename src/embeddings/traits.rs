//! EmbeddingProvider trait definition

use anyhow::Result;
use async_trait::async_trait;

/// Abstract interface for generating vector embeddings from text.
///
/// Implementations must be thread-safe (`Send + Sync`) to be shared across
/// async tasks via `Arc<dyn EmbeddingProvider>`.
///
/// Dimensions are a property of the active provider, discovered at runtime
/// from the first returned vector — not a configuration constant. Callers that
/// persist vectors (the schema embedder, the chunk index) must detect the
/// dimension from actual output and rebuild indexes on change.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate a vector embedding for a single text input.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts in one batch.
    ///
    /// Returns one vector per input, in input order, all with the same
    /// dimension. An empty input yields an empty output.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// The name of the embedding model being used.
    fn model_name(&self) -> &str;
}
