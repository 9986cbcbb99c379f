//! EngineStore trait definition
//!
//! The repository contract the prioritization engine needs from its storage
//! collaborator. Implementations must tolerate concurrent readers and writers;
//! every method commits atomically so a cancelled caller never leaves a
//! half-written record behind.

use super::models::*;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Abstract interface for engine persistence.
///
/// Shared across async tasks via `Arc<dyn EngineStore>`.
#[async_trait]
pub trait EngineStore: Send + Sync {
    // ========================================================================
    // Task operations
    // ========================================================================

    /// Insert a new task
    async fn insert_task(&self, task: &Task) -> Result<()>;

    /// Get a task by ID
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>>;

    /// Find a task by its source identity
    async fn find_task_by_source(&self, source: TaskSource, source_id: &str)
        -> Result<Option<Task>>;

    /// Write only the source-owned fields of a task
    async fn update_task_details(&self, details: &TaskDetails) -> Result<()>;

    /// Write only the scoring fields of a task
    async fn apply_score(&self, update: &ScoreUpdate) -> Result<()>;

    /// Apply a status transition only while the task still has
    /// `change.from`. Returns whether it was applied.
    async fn transition_status(&self, change: &StatusChange) -> Result<bool>;

    /// Write only a task's snooze deadline
    async fn set_snooze(
        &self,
        id: Uuid,
        until: Option<DateTime<Utc>>,
        updated_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Clear a snooze that has run out by `now`. Returns false when the task
    /// no longer carries an expired snooze.
    async fn clear_expired_snooze(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    /// List tasks whose status is in `statuses`, oldest first
    async fn list_tasks_by_status(&self, statuses: &[TaskStatus]) -> Result<Vec<Task>>;

    /// List all tasks linked to a thread
    async fn tasks_for_thread(&self, thread_id: Uuid) -> Result<Vec<Task>>;

    /// Open, non-snoozed tasks sorted by score descending
    async fn ranked_tasks(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>>;

    /// Delete a task and its embedding (feedback is never deleted)
    async fn delete_task(&self, id: Uuid) -> Result<()>;

    /// Delete auto-extracted tasks and their embeddings. Returns the count.
    ///
    /// Completed tasks that carry feedback are kept: they are K-NN training
    /// data, and their title stops re-extraction from reviving them as
    /// pending.
    async fn delete_auto_extracted_tasks(&self) -> Result<usize>;

    // ========================================================================
    // Thread operations
    // ========================================================================

    /// Insert a new thread
    async fn insert_thread(&self, thread: &Thread) -> Result<()>;

    /// Get a thread by ID
    async fn get_thread(&self, id: Uuid) -> Result<Option<Thread>>;

    /// Find a thread by its source identity
    async fn find_thread_by_external(
        &self,
        source: TaskSource,
        external_id: &str,
    ) -> Result<Option<Thread>>;

    /// Write only a thread's derived task count and priority score
    async fn set_thread_aggregate(&self, id: Uuid, task_count: u32, priority_score: u8) -> Result<()>;

    /// Write only a thread's summary fields
    async fn set_thread_summary(
        &self,
        id: Uuid,
        summary: &str,
        relevant_to_user: bool,
        summarized_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Threads without a summary, oldest first (ties broken by ID)
    async fn list_unsummarized_threads(&self, limit: usize) -> Result<Vec<Thread>>;

    /// Threads that already carry a summary, oldest first
    async fn list_summarized_threads(&self) -> Result<Vec<Thread>>;

    // ========================================================================
    // Priority operations
    // ========================================================================

    /// List strategic priorities, optionally filtered by kind
    async fn list_priorities(&self, kind: Option<PriorityKind>) -> Result<Vec<Priority>>;

    /// Insert a strategic priority
    async fn insert_priority(&self, priority: &Priority) -> Result<()>;

    /// Replace a stored priority (explicit edit)
    async fn update_priority(&self, priority: &Priority) -> Result<()>;

    // ========================================================================
    // Embedding operations
    // ========================================================================

    /// Get the live embedding for a task
    async fn get_embedding(&self, task_id: Uuid) -> Result<Option<Embedding>>;

    /// Insert or replace the embedding for a task
    async fn upsert_embedding(&self, embedding: &Embedding) -> Result<()>;

    /// Snapshot of every task that has both an embedding and feedback.
    ///
    /// The snapshot is consistent per row: each entry pairs a vector with the
    /// feedback that existed when the snapshot was taken.
    async fn labeled_embeddings(&self) -> Result<Vec<LabeledEmbedding>>;

    // ========================================================================
    // Feedback operations
    // ========================================================================

    /// Append a feedback record
    async fn append_feedback(&self, feedback: &Feedback) -> Result<()>;

    /// Total number of feedback records
    async fn feedback_count(&self) -> Result<u64>;

    /// Feedback recorded for one task, oldest first
    async fn feedback_for_task(&self, task_id: Uuid) -> Result<Vec<Feedback>>;

    // ========================================================================
    // Usage ledger
    // ========================================================================

    /// Append a usage record
    async fn append_usage(&self, record: &UsageRecord) -> Result<()>;

    /// Aggregate usage recorded at or after `since`
    async fn usage_since(&self, since: DateTime<Utc>) -> Result<UsageTotals>;
}
