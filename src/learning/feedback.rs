//! Append-only feedback log

use crate::store::models::{Feedback, Vote};
use crate::store::EngineStore;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// User votes on previously shown scores.
///
/// Records are never mutated or deleted; the total count drives the blending
/// phase and the labeled subset feeds the K-NN scan.
#[derive(Clone)]
pub struct FeedbackLog {
    store: Arc<dyn EngineStore>,
}

impl FeedbackLog {
    pub fn new(store: Arc<dyn EngineStore>) -> Self {
        Self { store }
    }

    /// Validate and append one vote.
    ///
    /// `vote` must be `1` or `-1`; anything else is `EngineError::InvalidVote`.
    /// The task must exist.
    pub async fn record(
        &self,
        task_id: Uuid,
        vote: i32,
        reason: Option<String>,
        original_score: u8,
        adjusted_score: u8,
    ) -> Result<Feedback> {
        let vote = Vote::try_from(vote)?;
        if self.store.get_task(task_id).await?.is_none() {
            return Err(crate::EngineError::TaskNotFound(task_id).into());
        }

        let feedback = Feedback {
            id: Uuid::new_v4(),
            task_id,
            vote,
            reason: reason.filter(|r| !r.trim().is_empty()),
            original_score: original_score.min(100),
            adjusted_score: adjusted_score.min(100),
            created_at: Utc::now(),
        };
        self.store.append_feedback(&feedback).await?;

        info!(
            task_id = %task_id,
            vote = i8::from(vote),
            original_score,
            adjusted_score,
            "Feedback recorded"
        );
        Ok(feedback)
    }

    /// Total number of feedback records
    pub async fn count(&self) -> Result<u64> {
        self.store.feedback_count().await
    }

    pub async fn for_task(&self, task_id: Uuid) -> Result<Vec<Feedback>> {
        self.store.feedback_for_task(task_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{Task, TaskSource};
    use crate::store::MemoryStore;
    use crate::EngineError;

    async fn log_with_task() -> (FeedbackLog, Uuid) {
        let task = Task::new(TaskSource::Manual, "m", "Plan offsite");
        let id = task.id;
        let store = MemoryStore::new().with_task(task).await;
        (FeedbackLog::new(Arc::new(store)), id)
    }

    #[tokio::test]
    async fn test_record_and_count() {
        let (log, id) = log_with_task().await;
        log.record(id, 1, Some("spot on".into()), 40, 55).await.unwrap();
        log.record(id, -1, Some("  ".into()), 55, 45).await.unwrap();

        assert_eq!(log.count().await.unwrap(), 2);
        let records = log.for_task(id).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].vote, Vote::Up);
        assert_eq!(records[0].reason.as_deref(), Some("spot on"));
        assert!(records[1].reason.is_none());
    }

    #[tokio::test]
    async fn test_invalid_vote_rejected() {
        let (log, id) = log_with_task().await;
        let err = log.record(id, 0, None, 10, 10).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<EngineError>(),
            Some(&EngineError::InvalidVote(0))
        );
        assert_eq!(log.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_task_rejected() {
        let (log, _) = log_with_task().await;
        let missing = Uuid::new_v4();
        let err = log.record(missing, 1, None, 10, 10).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<EngineError>(),
            Some(&EngineError::TaskNotFound(missing))
        );
    }
}
