//! Phase state machine blending the base score with the K-NN signal
//!
//! The phase is a pure function of the total feedback count `n`:
//!
//! | Phase     | `n`            | Final score                               |
//! |-----------|----------------|-------------------------------------------|
//! | Bootstrap | `n < 20`       | base                                      |
//! | Hybrid    | `20 <= n < 100`| `(1-w)*base + w*knn`, `w = (n-20)/80`     |
//! | Knn       | `n >= 100`     | `knn`                                     |
//!
//! Blending happens on a 1-10 scale (`percentage / 10`); `knn = base +
//! adjustment`, clamped to [1, 10]. Whenever K-NN yields nothing the base
//! score is used unchanged, in both Hybrid and Knn phases.

use super::knn::NeighborScorer;
use crate::store::EngineStore;
use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const SCALE_MIN: f64 = 1.0;
const SCALE_MAX: f64 = 10.0;

/// Feedback counts at which the blending regime changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseThresholds {
    /// First count of the Hybrid phase
    pub hybrid: u64,
    /// First count of the Knn phase
    pub knn: u64,
}

impl Default for PhaseThresholds {
    fn default() -> Self {
        Self {
            hybrid: 20,
            knn: 100,
        }
    }
}

/// Current blending regime. The blend weight only exists in `Hybrid`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    Bootstrap,
    Hybrid { weight: f64 },
    Knn,
}

impl Phase {
    pub fn for_feedback_count(n: u64, thresholds: PhaseThresholds) -> Self {
        if n < thresholds.hybrid {
            Phase::Bootstrap
        } else if n >= thresholds.knn {
            Phase::Knn
        } else {
            let span = thresholds.knn.saturating_sub(thresholds.hybrid).max(1) as f64;
            let weight = (n - thresholds.hybrid) as f64 / span;
            Phase::Hybrid {
                weight: weight.clamp(0.0, 1.0),
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Bootstrap => "bootstrap",
            Phase::Hybrid { .. } => "hybrid",
            Phase::Knn => "knn",
        }
    }

    pub fn consults_knn(&self) -> bool {
        !matches!(self, Phase::Bootstrap)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Hybrid { weight } => write!(f, "hybrid (weight {:.2})", weight),
            other => f.write_str(other.name()),
        }
    }
}

/// Percentage score on the 1-10 blending scale
pub fn to_scale(percentage: u8) -> f64 {
    (f64::from(percentage) / 10.0).clamp(SCALE_MIN, SCALE_MAX)
}

/// 1-10 score back to a 0-100 percentage, rounding half up
pub fn from_scale(score: f64) -> u8 {
    if !score.is_finite() {
        return 0;
    }
    (score * 10.0 + 0.5).floor().clamp(0.0, 100.0) as u8
}

/// Base score moved by a K-NN adjustment, on the 1-10 scale
pub fn knn_score(base: f64, adjustment: f64) -> f64 {
    (base + adjustment).clamp(SCALE_MIN, SCALE_MAX)
}

/// Linear blend before clamping
pub fn blend(base: f64, knn: f64, weight: f64) -> f64 {
    (1.0 - weight) * base + weight * knn
}

/// How a final score was produced
#[derive(Debug, Clone, PartialEq)]
pub struct BlendOutcome {
    pub score: u8,
    pub phase: Phase,
    pub adjustment: Option<f64>,
    /// K-NN was consulted but produced nothing usable
    pub fell_back: bool,
}

pub struct HybridBlender {
    store: Arc<dyn EngineStore>,
    neighbors: NeighborScorer,
    thresholds: PhaseThresholds,
}

impl HybridBlender {
    pub fn new(store: Arc<dyn EngineStore>, neighbors: NeighborScorer, thresholds: PhaseThresholds) -> Self {
        Self {
            store,
            neighbors,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> PhaseThresholds {
        self.thresholds
    }

    /// Phase for the current global feedback volume, with that volume
    pub async fn current_phase(&self) -> Result<(Phase, u64)> {
        let n = self.store.feedback_count().await?;
        Ok((Phase::for_feedback_count(n, self.thresholds), n))
    }

    /// Final percentage for a task given its base score.
    ///
    /// `vector` is the task's embedding, `None` when it could not be produced;
    /// K-NN is then unavailable and the base score stands.
    pub async fn final_score(
        &self,
        task_id: Uuid,
        base: u8,
        phase: Phase,
        vector: Option<&[f32]>,
    ) -> BlendOutcome {
        let unchanged = |fell_back| BlendOutcome {
            score: base,
            phase,
            adjustment: None,
            fell_back,
        };

        if !phase.consults_knn() {
            return unchanged(false);
        }

        let adjustment = match vector {
            Some(v) => match self.neighbors.adjustment_for_vector(task_id, v).await {
                Ok(adj) => adj,
                Err(e) => {
                    warn!(task_id = %task_id, "K-NN lookup failed: {:#}", e);
                    None
                }
            },
            None => None,
        };

        let Some(adj) = adjustment else {
            match phase {
                Phase::Knn => warn!(
                    task_id = %task_id,
                    base_score = base,
                    "K-NN unavailable in knn phase, using base score"
                ),
                _ => debug!(task_id = %task_id, "K-NN unavailable, using base score"),
            }
            return unchanged(true);
        };

        let base10 = to_scale(base);
        let knn10 = knn_score(base10, adj);
        let final10 = match phase {
            Phase::Hybrid { weight } => blend(base10, knn10, weight).clamp(SCALE_MIN, SCALE_MAX),
            _ => knn10,
        };

        BlendOutcome {
            score: from_scale(final10),
            phase,
            adjustment: Some(adj),
            fell_back: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{Embedding, Feedback, Vote};
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn phase(n: u64) -> Phase {
        Phase::for_feedback_count(n, PhaseThresholds::default())
    }

    #[test]
    fn test_phase_boundaries() {
        assert_eq!(phase(0), Phase::Bootstrap);
        assert_eq!(phase(19), Phase::Bootstrap);
        assert_eq!(phase(20), Phase::Hybrid { weight: 0.0 });
        assert!(matches!(phase(99), Phase::Hybrid { .. }));
        assert_eq!(phase(100), Phase::Knn);
        assert_eq!(phase(5000), Phase::Knn);
    }

    #[test]
    fn test_hybrid_weight_midpoint() {
        assert_eq!(phase(60), Phase::Hybrid { weight: 0.5 });
        let Phase::Hybrid { weight } = phase(99) else {
            panic!("expected hybrid");
        };
        assert!((weight - 79.0 / 80.0).abs() < 1e-12);
    }

    #[test]
    fn test_blend_midpoint() {
        assert_eq!(blend(6.0, 8.0, 0.5), 7.0);
    }

    #[test]
    fn test_scale_conversions() {
        assert_eq!(to_scale(0), 1.0);
        assert_eq!(to_scale(62), 6.2);
        assert_eq!(to_scale(100), 10.0);
        assert_eq!(from_scale(6.25), 63);
        assert_eq!(from_scale(10.0), 100);
        assert_eq!(from_scale(f64::NAN), 0);
        assert_eq!(knn_score(9.5, 2.0), 10.0);
        assert_eq!(knn_score(1.5, -2.0), 1.0);
    }

    #[test]
    fn test_display() {
        assert_eq!(phase(60).to_string(), "hybrid (weight 0.50)");
        assert_eq!(phase(0).to_string(), "bootstrap");
    }

    async fn blender_with_liked_neighbor() -> (HybridBlender, Uuid) {
        let liked = Uuid::new_v4();
        let store = MemoryStore::new()
            .with_embedding(Embedding {
                task_id: liked,
                vector: vec![1.0, 0.0],
                content_hash: "h".into(),
                model: "m".into(),
                generated_at: Utc::now(),
            })
            .await
            .with_feedback(Feedback {
                id: Uuid::new_v4(),
                task_id: liked,
                vote: Vote::Up,
                reason: None,
                original_score: 50,
                adjusted_score: 60,
                created_at: Utc::now(),
            })
            .await;
        let store: Arc<dyn EngineStore> = Arc::new(store);
        let blender = HybridBlender::new(
            store.clone(),
            NeighborScorer::new(store, 5),
            PhaseThresholds::default(),
        );
        (blender, Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_bootstrap_ignores_knn() {
        let (blender, task) = blender_with_liked_neighbor().await;
        let out = blender
            .final_score(task, 60, Phase::Bootstrap, Some(&[1.0, 0.0]))
            .await;
        assert_eq!(out.score, 60);
        assert!(!out.fell_back);
        assert!(out.adjustment.is_none());
    }

    #[tokio::test]
    async fn test_hybrid_blends() {
        let (blender, task) = blender_with_liked_neighbor().await;
        // adjustment +2: knn = 8.0, base = 6.0, w = 0.5 -> 7.0
        let out = blender
            .final_score(task, 60, Phase::Hybrid { weight: 0.5 }, Some(&[1.0, 0.0]))
            .await;
        assert_eq!(out.adjustment, Some(2.0));
        assert_eq!(out.score, 70);
    }

    #[tokio::test]
    async fn test_knn_phase_uses_knn_score() {
        let (blender, task) = blender_with_liked_neighbor().await;
        let out = blender
            .final_score(task, 60, Phase::Knn, Some(&[1.0, 0.0]))
            .await;
        assert_eq!(out.score, 80);
    }

    #[tokio::test]
    async fn test_missing_embedding_falls_back() {
        let (blender, task) = blender_with_liked_neighbor().await;
        let out = blender.final_score(task, 42, Phase::Knn, None).await;
        assert_eq!(out.score, 42);
        assert!(out.fell_back);
    }

    #[tokio::test]
    async fn test_other_dimension_falls_back() {
        let (blender, task) = blender_with_liked_neighbor().await;
        let out = blender
            .final_score(task, 42, Phase::Hybrid { weight: 0.9 }, Some(&[1.0, 0.0, 0.0]))
            .await;
        assert_eq!(out.score, 42);
        assert!(out.fell_back);
    }

    #[tokio::test]
    async fn test_current_phase_counts_feedback() {
        let (blender, _) = blender_with_liked_neighbor().await;
        assert_eq!(blender.current_phase().await.unwrap(), (Phase::Bootstrap, 1));
    }
}
