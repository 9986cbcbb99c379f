//! Request/response types exchanged with the reasoning capability

use crate::store::models::{Effort, MatchedPriorities, StakeholderClass};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Judgement of how well a task serves the user's strategic priorities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignmentVerdict {
    /// 0-5
    pub score: f64,
    #[serde(default)]
    pub matches: MatchedPriorities,
    #[serde(default)]
    pub rationale: Option<String>,
}

/// Output of summarizing one conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub summary: String,
    #[serde(default)]
    pub relevant_to_user: bool,
}

/// A task proposed by the extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub impact: Option<u8>,
    #[serde(default)]
    pub effort: Option<Effort>,
    #[serde(default)]
    pub stakeholder: Option<StakeholderClass>,
    #[serde(default)]
    pub project: Option<String>,
    /// Who asked for it (sender address, organizer...)
    #[serde(default)]
    pub requester: Option<String>,
}

impl ExtractedTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            due_at: None,
            impact: None,
            effort: None,
            stakeholder: None,
            project: None,
            requester: None,
        }
    }
}

/// Per-million-token prices used for ledger entries and batch estimates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LlmPricing {
    pub input_cost_per_mtok: f64,
    pub output_cost_per_mtok: f64,
}

impl Default for LlmPricing {
    fn default() -> Self {
        Self {
            input_cost_per_mtok: 3.0,
            output_cost_per_mtok: 15.0,
        }
    }
}

impl LlmPricing {
    /// Cost in USD of a call with the given token counts
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        input_tokens as f64 / 1_000_000.0 * self.input_cost_per_mtok
            + output_tokens as f64 / 1_000_000.0 * self.output_cost_per_mtok
    }
}
