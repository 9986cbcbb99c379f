//! Base scoring: the deterministic formula and the alignment delegate that
//! feeds it.

pub mod alignment;
pub mod deterministic;

pub use alignment::{AlignmentDelegate, AlignmentOutcome};
pub use deterministic::{refresh_urgency, score, urgency_from_due, ScoreInputs};
