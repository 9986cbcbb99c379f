//! Adaptive scoring from user feedback
//!
//! - `FeedbackLog`: append-only votes on shown scores
//! - `NeighborScorer`: K-NN vote aggregation over embedded, labeled tasks
//! - `HybridBlender`: phase state machine mixing base and K-NN scores

pub mod blender;
pub mod feedback;
pub mod knn;

pub use blender::{blend, BlendOutcome, HybridBlender, Phase, PhaseThresholds};
pub use feedback::FeedbackLog;
pub use knn::{Neighbor, NeighborScorer, DEFAULT_K, MAX_ADJUSTMENT};
