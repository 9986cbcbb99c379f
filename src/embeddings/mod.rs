//! Embedding generation and caching
//!
//! Task embeddings feed the K-NN feedback scorer.
//!
//! Architecture follows the project pattern (trait + impl + mock):
//! - `EmbeddingProvider` trait: async interface for embedding generation
//! - `HttpEmbeddingProvider`: any OpenAI-compatible embeddings API
//! - `MockEmbeddingProvider`: deterministic mock for tests
//! - `EmbeddingStore`: staleness-checked, retrying per-task cache
//! - `cosine_similarity`: the similarity measure used by the K-NN scan

pub mod mock;
pub mod provider;
pub mod similarity;
pub mod store;
pub mod traits;

pub use mock::MockEmbeddingProvider;
pub use provider::HttpEmbeddingProvider;
pub use similarity::cosine_similarity;
pub use store::{content_hash, embedding_input, EmbeddingStore};
pub use traits::EmbeddingProvider;
