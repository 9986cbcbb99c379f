//! EmbeddingProvider trait definition
//!
//! Async trait + Send + Sync for `Arc<dyn EmbeddingProvider>` usage, the same
//! shape as `ReasoningProvider` and `EngineStore`.

use anyhow::Result;
use async_trait::async_trait;

/// Abstract interface for turning task text into a fixed-length vector.
///
/// Vectors are only used for similarity lookup by the K-NN scorer, so every
/// vector a provider returns must have exactly [`dimensions()`](Self::dimensions)
/// components.
///
/// # Implementations
///
/// - [`HttpEmbeddingProvider`](super::HttpEmbeddingProvider): any
///   OpenAI-compatible `/v1/embeddings` endpoint (Ollama, OpenAI, LiteLLM...)
/// - [`MockEmbeddingProvider`](super::MockEmbeddingProvider): deterministic
///   hash-spread vectors for tests
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate a vector embedding for a single text input.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// The fixed dimensionality of produced vectors.
    fn dimensions(&self) -> usize;

    /// The embedding model name, stored next to each vector so a model
    /// change marks old vectors stale.
    fn model_name(&self) -> &str;
}
