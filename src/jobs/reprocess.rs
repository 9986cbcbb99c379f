//! Bulk re-extraction from stored summaries
//!
//! Destructive, then rebuild:
//! 1. delete every auto-extracted task (and its embedding), except completed
//!    ones that carry feedback
//! 2. re-run extraction on each relevant thread's stored summary; the
//!    summarizer is not called again
//! 3. run one full prioritization pass
//!
//! Manual and synced tasks are untouched, and feedback rows survive. Running
//! it twice on the same summaries converges to the same task set as long as
//! extraction itself is deterministic.

use super::batch::insert_extracted;
use crate::engine::{PassSummary, PrioritizationWorker};
use crate::llm::ReasoningProvider;
use crate::store::EngineStore;
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ReprocessReport {
    pub deleted: usize,
    pub threads: usize,
    pub tasks_created: usize,
    pub extraction_failures: usize,
    pub pass: Option<PassSummary>,
}

/// Rebuild every auto-extracted task from the stored thread summaries.
///
/// Completion is not carried over: an auto-extracted task completed without
/// any feedback is deleted and, if extraction still proposes it, comes back
/// as pending. Completed tasks with feedback are kept, and their titles keep
/// re-extraction from duplicating them.
pub async fn reprocess_ai_tasks(
    store: &Arc<dyn EngineStore>,
    reasoning: &Arc<dyn ReasoningProvider>,
    worker: &PrioritizationWorker,
    cancel: &CancellationToken,
) -> Result<ReprocessReport> {
    let deleted = store
        .delete_auto_extracted_tasks()
        .await
        .context("Failed to delete auto-extracted tasks")?;
    info!(deleted, "Deleted auto-extracted tasks");

    let threads = store.list_summarized_threads().await?;
    let mut report = ReprocessReport {
        deleted,
        threads: threads.len(),
        tasks_created: 0,
        extraction_failures: 0,
        pass: None,
    };

    for thread in &threads {
        if cancel.is_cancelled() {
            warn!("Reprocessing cancelled before all threads were rebuilt");
            return Ok(report);
        }

        // Counts are rebuilt by the pass below
        let remaining = store.tasks_for_thread(thread.id).await?.len() as u32;
        store.set_thread_aggregate(thread.id, remaining, 0).await?;

        let Some(summary) = thread.summary.as_deref() else {
            continue;
        };
        if !thread.relevant_to_user {
            continue;
        }

        match reasoning.extract_tasks(thread, summary).await {
            Ok(extracted) => {
                let inserted = insert_extracted(store.as_ref(), thread, &extracted).await?;
                report.tasks_created += inserted.len();
                store
                    .set_thread_aggregate(thread.id, remaining + inserted.len() as u32, 0)
                    .await?;
            }
            Err(e) => {
                warn!(thread_id = %thread.id, "Re-extraction failed: {:#}", e);
                report.extraction_failures += 1;
            }
        }
    }

    let pass = worker.request_pass().await?.wait().await?;
    info!(
        deleted = report.deleted,
        threads = report.threads,
        tasks_created = report.tasks_created,
        scored = pass.scored,
        "Reprocessing finished"
    );
    report.pass = Some(pass);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Prioritizer, PrioritizerSettings};
    use crate::events::EventBus;
    use crate::llm::MockReasoningProvider;
    use crate::store::models::{Feedback, Task, TaskSource, TaskStatus, Thread, Vote};
    use chrono::Utc;
    use uuid::Uuid;
    use crate::store::MemoryStore;

    fn summarized(todos: &str) -> Thread {
        let mut thread = Thread::new(TaskSource::Email, "m-1", "Launch", "See summary");
        thread.summary = Some(format!("Launch prep\n{}", todos));
        thread.relevant_to_user = true;
        thread
    }

    async fn setup(store: MemoryStore) -> (Arc<dyn EngineStore>, Arc<dyn ReasoningProvider>, PrioritizationWorker, CancellationToken) {
        let store: Arc<dyn EngineStore> = Arc::new(store);
        let reasoning: Arc<dyn ReasoningProvider> = Arc::new(MockReasoningProvider::new());
        let prioritizer = Arc::new(Prioritizer::new(
            store.clone(),
            reasoning.clone(),
            None,
            Arc::new(EventBus::default()),
            PrioritizerSettings::default(),
        ));
        let cancel = CancellationToken::new();
        let (worker, _join) = PrioritizationWorker::spawn(prioritizer, cancel.clone());
        (store, reasoning, worker, cancel)
    }

    #[tokio::test]
    async fn test_reprocess_is_idempotent() {
        let thread = summarized("TODO: book venue\nTODO: send invites");
        let stale = {
            let mut t = Task::new(TaskSource::Email, "m-1", "old parser output");
            t.thread_id = Some(thread.id);
            t.auto_extracted = true;
            t
        };
        let manual = Task::new(TaskSource::Manual, "me", "water plants");
        let store = MemoryStore::new()
            .with_thread(thread.clone())
            .await
            .with_task(stale.clone())
            .await
            .with_task(manual.clone())
            .await;
        let (store, reasoning, worker, cancel) = setup(store).await;

        let first = reprocess_ai_tasks(&store, &reasoning, &worker, &cancel).await.unwrap();
        assert_eq!(first.deleted, 1);
        assert_eq!(first.tasks_created, 2);
        assert!(store.get_task(stale.id).await.unwrap().is_none());
        assert!(store.get_task(manual.id).await.unwrap().is_some());

        let after_first = store.list_tasks_by_status(&TaskStatus::OPEN).await.unwrap().len();

        let second = reprocess_ai_tasks(&store, &reasoning, &worker, &cancel).await.unwrap();
        assert_eq!(second.deleted, 2);
        assert_eq!(second.tasks_created, 2);
        let after_second = store.list_tasks_by_status(&TaskStatus::OPEN).await.unwrap().len();
        assert_eq!(after_first, after_second);
        assert_eq!(after_second, 3);

        let stored = store.get_thread(thread.id).await.unwrap().unwrap();
        assert_eq!(stored.task_count, 2);
        assert!(stored.priority_score > 0);
        assert_eq!(second.pass.unwrap().scored, 3);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_irrelevant_threads_are_not_extracted() {
        let mut thread = summarized("TODO: unsubscribe");
        thread.relevant_to_user = false;
        let store = MemoryStore::new().with_thread(thread).await;
        let (store, reasoning, worker, cancel) = setup(store).await;

        let report = reprocess_ai_tasks(&store, &reasoning, &worker, &cancel).await.unwrap();
        assert_eq!(report.threads, 1);
        assert_eq!(report.tasks_created, 0);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_edited_summary_drives_extraction() {
        let thread = summarized("TODO: book venue");
        let store = MemoryStore::new().with_thread(thread.clone()).await;
        let (store, reasoning, worker, cancel) = setup(store).await;
        reprocess_ai_tasks(&store, &reasoning, &worker, &cancel).await.unwrap();

        store
            .set_thread_summary(thread.id, "Venue is booked\nTODO: send invites", true, Utc::now())
            .await
            .unwrap();
        let report = reprocess_ai_tasks(&store, &reasoning, &worker, &cancel).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.tasks_created, 1);

        let titles: Vec<String> = store
            .tasks_for_thread(thread.id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["send invites"]);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_completed_task_with_feedback_survives() {
        let thread = summarized("TODO: book venue\nTODO: send invites");
        let mut done = Task::new(TaskSource::Email, "m-1", "book venue");
        done.thread_id = Some(thread.id);
        done.auto_extracted = true;
        done.status = TaskStatus::Completed;
        let store = MemoryStore::new()
            .with_thread(thread.clone())
            .await
            .with_task(done.clone())
            .await
            .with_feedback(Feedback {
                id: Uuid::new_v4(),
                task_id: done.id,
                vote: Vote::Up,
                reason: None,
                original_score: 40,
                adjusted_score: 60,
                created_at: Utc::now(),
            })
            .await;
        let (store, reasoning, worker, cancel) = setup(store).await;

        let report = reprocess_ai_tasks(&store, &reasoning, &worker, &cancel).await.unwrap();
        assert_eq!(report.deleted, 0);
        assert_eq!(report.tasks_created, 1);

        let kept = store.get_task(done.id).await.unwrap().unwrap();
        assert_eq!(kept.status, TaskStatus::Completed);
        let open = store.list_tasks_by_status(&TaskStatus::OPEN).await.unwrap();
        let titles: Vec<&str> = open.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["send invites"]);
        assert_eq!(store.get_thread(thread.id).await.unwrap().unwrap().task_count, 2);
        cancel.cancel();
    }
}
