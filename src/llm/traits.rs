//! ReasoningProvider trait definition
//!
//! Follows the same pattern as `EmbeddingProvider`: async trait + Send + Sync
//! for `Arc<dyn ReasoningProvider>` usage.

use super::models::{AlignmentVerdict, ExtractedTask, ThreadSummary};
use crate::store::models::{StrategicPriorities, Task, Thread};
use anyhow::Result;
use async_trait::async_trait;

/// Abstract interface for the LLM-backed reasoning capability.
///
/// Implementations signal an exhausted budget with
/// [`LlmError::QuotaExhausted`](super::LlmError::QuotaExhausted) so batch
/// callers can stop early instead of burning through the backlog with errors.
///
/// # Implementations
///
/// - [`HttpReasoningProvider`](super::HttpReasoningProvider): any
///   OpenAI-compatible `/v1/chat/completions` endpoint
/// - [`MockReasoningProvider`](super::MockReasoningProvider): scripted,
///   deterministic responses for tests
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    /// Judge how well `task` serves `priorities` (score 0-5 plus matches).
    async fn evaluate_alignment(
        &self,
        task: &Task,
        priorities: &StrategicPriorities,
    ) -> Result<AlignmentVerdict>;

    /// Summarize a conversation and decide whether it concerns the user.
    async fn summarize_thread(&self, thread: &Thread) -> Result<ThreadSummary>;

    /// Derive actionable tasks from a thread's stored summary.
    async fn extract_tasks(&self, thread: &Thread, summary: &str) -> Result<Vec<ExtractedTask>>;

    /// The model name, for logs and traceability.
    fn model_name(&self) -> &str;
}
