//! Mock embedding provider for tests
//!
//! Produces deterministic embeddings from text hashes:
//! - same text, same vector
//! - different texts, different vectors
//! - configurable dimensions and injectable failures (for retry tests)

use super::traits::EmbeddingProvider;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Deterministic mock embedding provider.
///
/// # Example
///
/// ```rust
/// use adaptive_prioritizer::embeddings::{EmbeddingProvider, MockEmbeddingProvider};
///
/// # tokio_test::block_on(async {
/// let provider = MockEmbeddingProvider::new(16).failing_first(1);
/// assert!(provider.embed_text("quarterly report").await.is_err());
///
/// let a = provider.embed_text("quarterly report").await.unwrap();
/// let b = provider.embed_text("quarterly report").await.unwrap();
/// assert_eq!(a.len(), 16);
/// assert_eq!(a, b);
/// # });
/// ```
#[derive(Debug)]
pub struct MockEmbeddingProvider {
    dimensions: usize,
    /// Number of leading calls that fail; `usize::MAX` fails forever
    failures: AtomicUsize,
    pub calls: AtomicUsize,
}

impl MockEmbeddingProvider {
    /// Create a mock provider producing `dimensions`-long vectors.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            failures: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail the first `n` calls, then succeed
    pub fn failing_first(self, n: usize) -> Self {
        self.failures.store(n, Ordering::SeqCst);
        self
    }

    /// Fail every call
    pub fn always_failing(self) -> Self {
        self.failures.store(usize::MAX, Ordering::SeqCst);
        self
    }

    /// Spread a SipHash of `text` over the dimensions, then L2-normalize.
    pub fn hash_to_embedding(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut hash = hasher.finish();

        let mut embedding = Vec::with_capacity(self.dimensions);
        for _ in 0..self.dimensions {
            let value = (hash as f64 / u64::MAX as f64) * 2.0 - 1.0;
            embedding.push(value as f32);

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
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != usize::MAX {
                self.failures.store(remaining - 1, Ordering::SeqCst);
            }
            anyhow::bail!("mock embedding backend unavailable");
        }
        Ok(self.hash_to_embedding(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "mock-hash-embedding"
    }
}
