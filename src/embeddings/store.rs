//! Per-task embedding cache
//!
//! Keeps at most one live embedding per task. An embedding is stale when the
//! hash of the task's content, the model, or the dimensionality no longer
//! matches; stale or missing embeddings are regenerated with a bounded retry
//! and persisted before being returned.

use super::traits::EmbeddingProvider;
use crate::store::models::{Embedding, Task};
use crate::store::EngineStore;
use crate::EngineError;
use anyhow::{Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct EmbeddingStore {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn EngineStore>,
    max_attempts: u32,
    backoff: Duration,
}

/// Text sent to the embedding capability: title, description, a readable
/// source descriptor and any matched priority names, one per line.
pub fn embedding_input(task: &Task) -> String {
    let mut lines: Vec<String> = vec![task.title.clone()];
    if !task.description.trim().is_empty() {
        lines.push(task.description.clone());
    }
    lines.push(task.source_descriptor());
    let matches = task.matches();
    let names = matches.names();
    if !names.is_empty() {
        lines.push(format!("Priorities: {}", names.join(", ")));
    }
    lines.join("\n")
}

/// SHA-256 over the content an embedding must track: title, description and
/// source context.
pub fn content_hash(task: &Task) -> String {
    let mut hasher = Sha256::new();
    hasher.update(task.title.as_bytes());
    hasher.update(b"\n");
    hasher.update(task.description.as_bytes());
    hasher.update(b"\n");
    hasher.update(task.source_descriptor().as_bytes());
    hex::encode(hasher.finalize())
}

impl EmbeddingStore {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn EngineStore>,
        max_attempts: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            provider,
            store,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Whether `embedding` no longer represents `task`
    pub fn is_stale(&self, embedding: &Embedding, task: &Task) -> bool {
        embedding.content_hash != content_hash(task)
            || embedding.model != self.provider.model_name()
            || embedding.vector.len() != self.provider.dimensions()
    }

    /// Return the task's live embedding, generating and persisting a fresh
    /// one when missing or stale.
    ///
    /// Errors after the retry budget is spent; callers fall back to scoring
    /// without K-NN.
    pub async fn ensure_embedding(&self, task: &Task) -> Result<Vec<f32>> {
        if let Some(existing) = self.store.get_embedding(task.id).await? {
            if !self.is_stale(&existing, task) {
                return Ok(existing.vector);
            }
            debug!(task_id = %task.id, "Embedding stale, regenerating");
        }

        let vector = self.generate_with_retry(&embedding_input(task)).await?;

        let embedding = Embedding {
            task_id: task.id,
            vector,
            content_hash: content_hash(task),
            model: self.provider.model_name().to_string(),
            generated_at: Utc::now(),
        };
        self.store
            .upsert_embedding(&embedding)
            .await
            .with_context(|| format!("Failed to persist embedding for task {}", task.id))?;

        Ok(embedding.vector)
    }

    /// Call the provider up to `max_attempts` times with exponential backoff.
    async fn generate_with_retry(&self, text: &str) -> Result<Vec<f32>> {
        let expected = self.provider.dimensions();
        let mut delay = self.backoff;
        let mut last_err = None;

        for attempt in 1..=self.max_attempts {
            match self.provider.embed_text(text).await {
                Ok(vector) if vector.len() == expected => return Ok(vector),
                Ok(vector) => {
                    return Err(EngineError::DimensionMismatch {
                        expected,
                        actual: vector.len(),
                    }
                    .into());
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        "Embedding generation failed: {:#}",
                        e
                    );
                    last_err = Some(e);
                }
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }

        Err(last_err
            .unwrap_or_else(|| anyhow::anyhow!("embedding generation never attempted"))
            .context(format!(
                "Embedding generation failed after {} attempts",
                self.max_attempts
            )))
    }
}
