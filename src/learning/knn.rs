//! K-nearest-neighbor feedback scorer
//!
//! Finds the K tasks most similar to a target (by cosine similarity of their
//! embeddings) among tasks that carry feedback, and turns their votes into a
//! score adjustment in [-2, 2]:
//!
//! ```text
//! weight_i   = max(similarity_i, 0)
//! adjustment = (Σ vote_i * weight_i / Σ weight_i) * 2
//! ```
//!
//! Neighbors with negative similarity get zero weight, so an opposite task can
//! never invert the vote. Only neighbors embedded by the same model, at the
//! same dimensionality, as the target are compared; leftovers from a previous
//! model are skipped until they are re-embedded.

use crate::embeddings::cosine_similarity;
use crate::store::models::LabeledEmbedding;
use crate::store::EngineStore;
use anyhow::Result;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Largest magnitude of an adjustment, in 1-10 score points
pub const MAX_ADJUSTMENT: f64 = 2.0;

pub const DEFAULT_K: usize = 5;

/// One neighbor that took part in an adjustment
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub task_id: Uuid,
    pub similarity: f64,
    pub vote: f64,
}

pub struct NeighborScorer {
    store: Arc<dyn EngineStore>,
    k: usize,
    /// Embedding model the live vectors come from
    model: Option<String>,
}

impl NeighborScorer {
    pub fn new(store: Arc<dyn EngineStore>, k: usize) -> Self {
        Self {
            store,
            k: k.max(1),
            model: None,
        }
    }

    /// Only consult neighbors embedded by `model`
    pub fn for_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Adjustment for `task_id` from its stored embedding.
    ///
    /// `Ok(None)` when the task has no embedding or no neighbor carries
    /// feedback yet (cold start).
    pub async fn adjustment(&self, task_id: Uuid) -> Result<Option<f64>> {
        let Some(target) = self.store.get_embedding(task_id).await? else {
            debug!(task_id = %task_id, "No embedding, K-NN skipped");
            return Ok(None);
        };
        self.scan(task_id, &target.vector, Some(&target.model)).await
    }

    /// Adjustment for an explicit vector, excluding `task_id` from the pool.
    pub async fn adjustment_for_vector(&self, task_id: Uuid, vector: &[f32]) -> Result<Option<f64>> {
        self.scan(task_id, vector, self.model.as_deref()).await
    }

    async fn scan(&self, task_id: Uuid, vector: &[f32], model: Option<&str>) -> Result<Option<f64>> {
        let mut pool = self.store.labeled_embeddings().await?;
        let labeled = pool.len();
        pool.retain(|c| c.vector.len() == vector.len() && model.map_or(true, |m| c.model == m));
        if pool.len() < labeled {
            debug!(
                task_id = %task_id,
                skipped = labeled - pool.len(),
                "Skipping neighbors embedded by another model"
            );
        }

        let neighbors = nearest(vector, &pool, task_id, self.k);
        let adjustment = aggregate(&neighbors);
        if let Some(adj) = adjustment {
            debug!(
                task_id = %task_id,
                neighbors = neighbors.len(),
                adjustment = adj,
                "K-NN adjustment computed"
            );
        }
        Ok(adjustment)
    }
}

/// The `k` labeled embeddings most similar to `target`, most similar first.
///
/// `exclude` is left out of the pool, as is any candidate whose vector length
/// differs from the target's (never truncated).
pub fn nearest(target: &[f32], pool: &[LabeledEmbedding], exclude: Uuid, k: usize) -> Vec<Neighbor> {
    let mut scored: Vec<Neighbor> = pool
        .iter()
        .filter(|c| c.task_id != exclude)
        .filter_map(|candidate| {
            let similarity = cosine_similarity(target, &candidate.vector).ok()?;
            Some(Neighbor {
                task_id: candidate.task_id,
                similarity,
                vote: candidate.vote,
            })
        })
        .collect();
    scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    scored.truncate(k);
    scored
}

/// Similarity-weighted vote scaled to [-2, 2].
///
/// `None` without neighbors, `Some(0.0)` when none has positive similarity.
pub fn aggregate(neighbors: &[Neighbor]) -> Option<f64> {
    if neighbors.is_empty() {
        return None;
    }
    let (weighted_sum, total_weight) = neighbors.iter().fold((0.0, 0.0), |(sum, total), n| {
        let weight = n.similarity.max(0.0);
        (sum + n.vote * weight, total + weight)
    });
    if total_weight <= 0.0 {
        return Some(0.0);
    }
    let adjustment = weighted_sum / total_weight * MAX_ADJUSTMENT;
    Some(adjustment.clamp(-MAX_ADJUSTMENT, MAX_ADJUSTMENT))
}
