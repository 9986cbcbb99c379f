//! The periodic jobs the daemon registers

use super::batch::BatchProcessor;
use super::scheduler::{Job, JobContext};
use crate::engine::PrioritizationWorker;
use crate::sources::{DataSource, SyncReport};
use crate::store::models::TaskStatus;
use crate::store::{EngineStore, MemoryStore};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const SYNC_JOB: &str = "sync";
pub const SUMMARIZE_JOB: &str = "summarize";
pub const PRIORITIZE_JOB: &str = "prioritize";
pub const CLEANUP_JOB: &str = "cleanup";
pub const SNAPSHOT_JOB: &str = "snapshot";

// ============================================================================
// Sync
// ============================================================================

/// Pulls every registered data source concurrently. One failing source does
/// not stop the others; the job only fails when all of them do.
pub struct SyncJob {
    sources: Vec<Arc<dyn DataSource>>,
}

impl SyncJob {
    pub fn new(sources: Vec<Arc<dyn DataSource>>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl Job for SyncJob {
    fn name(&self) -> &str {
        SYNC_JOB
    }

    async fn run(&self, ctx: JobContext) -> Result<()> {
        if self.sources.is_empty() {
            debug!("No data sources registered");
            return Ok(());
        }

        let results = join_all(
            self.sources
                .iter()
                .map(|source| source.sync(ctx.cancel.clone())),
        )
        .await;

        let mut total = SyncReport::default();
        let mut failures = 0usize;
        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(report) => {
                    debug!(
                        source = source.name(),
                        threads_added = report.threads_added,
                        tasks_added = report.tasks_added,
                        "Source synced"
                    );
                    total.merge(report);
                }
                Err(e) => {
                    warn!(source = source.name(), "Source sync failed: {:#}", e);
                    failures += 1;
                }
            }
        }

        info!(
            sources = self.sources.len(),
            failures,
            threads_added = total.threads_added,
            tasks_added = total.tasks_added,
            tasks_updated = total.tasks_updated,
            "Sync finished"
        );
        if failures == self.sources.len() {
            anyhow::bail!("all {} data sources failed to sync", failures);
        }
        Ok(())
    }
}

// ============================================================================
// Summarize + extract
// ============================================================================

pub struct SummarizeJob {
    processor: BatchProcessor,
}

impl SummarizeJob {
    pub fn new(processor: BatchProcessor) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl Job for SummarizeJob {
    fn name(&self) -> &str {
        SUMMARIZE_JOB
    }

    async fn run(&self, ctx: JobContext) -> Result<()> {
        // Quota exhaustion is an expected stop, not a job failure
        self.processor.run(&ctx.cancel).await.map(|_| ())
    }
}

// ============================================================================
// Prioritize
// ============================================================================

/// Queues a full pass on the worker and waits for it.
pub struct PrioritizeJob {
    worker: PrioritizationWorker,
}

impl PrioritizeJob {
    pub fn new(worker: PrioritizationWorker) -> Self {
        Self { worker }
    }
}

#[async_trait]
impl Job for PrioritizeJob {
    fn name(&self) -> &str {
        PRIORITIZE_JOB
    }

    async fn run(&self, ctx: JobContext) -> Result<()> {
        let handle = self.worker.request_pass().await?;
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                debug!("Shutdown while waiting for prioritization pass");
                Ok(())
            }
            summary = handle.wait() => summary.map(|_| ()),
        }
    }
}

// ============================================================================
// Cleanup
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    pub snoozes_cleared: usize,
    pub tasks_deleted: usize,
    /// Old completed tasks kept because they carry feedback
    pub kept_for_feedback: usize,
}

pub struct CleanupJob {
    store: Arc<dyn EngineStore>,
    retention_days: i64,
}

impl CleanupJob {
    pub fn new(store: Arc<dyn EngineStore>, retention_days: i64) -> Self {
        Self {
            store,
            retention_days,
        }
    }

    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();

        for task in self.store.list_tasks_by_status(&TaskStatus::OPEN).await? {
            if task.snoozed_until.is_some_and(|until| until <= now)
                && self.store.clear_expired_snooze(task.id, now).await?
            {
                report.snoozes_cleared += 1;
            }
        }

        let cutoff = now - Duration::days(self.retention_days);
        for task in self.store.list_tasks_by_status(&[TaskStatus::Completed]).await? {
            let expired = task.completed_at.is_some_and(|at| at < cutoff);
            if !expired {
                continue;
            }
            if !self.store.feedback_for_task(task.id).await?.is_empty() {
                report.kept_for_feedback += 1;
                continue;
            }
            self.store.delete_task(task.id).await?;
            report.tasks_deleted += 1;
        }

        Ok(report)
    }
}

#[async_trait]
impl Job for CleanupJob {
    fn name(&self) -> &str {
        CLEANUP_JOB
    }

    async fn run(&self, _ctx: JobContext) -> Result<()> {
        let report = self.cleanup(Utc::now()).await?;
        info!(
            snoozes_cleared = report.snoozes_cleared,
            tasks_deleted = report.tasks_deleted,
            kept_for_feedback = report.kept_for_feedback,
            retention_days = self.retention_days,
            "Cleanup finished"
        );
        Ok(())
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Saves the in-memory store to its JSON snapshot.
pub struct SnapshotJob {
    store: Arc<MemoryStore>,
    path: PathBuf,
}

impl SnapshotJob {
    pub fn new(store: Arc<MemoryStore>, path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            path: path.into(),
        }
    }
}

#[async_trait]
impl Job for SnapshotJob {
    fn name(&self) -> &str {
        SNAPSHOT_JOB
    }

    async fn run(&self, _ctx: JobContext) -> Result<()> {
        self.store.persist(&self.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::RecordingSource;
    use crate::store::models::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    /// What another writer does to `victim` right after cleanup reads the
    /// open tasks
    enum Interference {
        Complete,
        Resnooze(DateTime<Utc>),
    }

    /// Delegates to a `MemoryStore`, changing one task between cleanup's read
    /// and its write.
    struct InterleavingStore {
        inner: MemoryStore,
        victim: Uuid,
        interference: Interference,
        fired: AtomicBool,
    }

    impl InterleavingStore {
        fn new(inner: MemoryStore, victim: Uuid, interference: Interference) -> Self {
            Self {
                inner,
                victim,
                interference,
                fired: AtomicBool::new(false),
            }
        }

        async fn interfere(&self) -> Result<()> {
            if self.fired.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            let now = Utc::now();
            match self.interference {
                Interference::Complete => {
                    let Some(task) = self.inner.get_task(self.victim).await? else {
                        return Ok(());
                    };
                    self.inner
                        .transition_status(&StatusChange::complete(&task, now))
                        .await?;
                }
                Interference::Resnooze(until) => {
                    self.inner.set_snooze(self.victim, Some(until), now).await?;
                }
            }
            Ok(())
        }
    }

    #[async_trait]
    impl EngineStore for InterleavingStore {
        async fn insert_task(&self, task: &Task) -> Result<()> {
            self.inner.insert_task(task).await
        }
        async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
            self.inner.get_task(id).await
        }
        async fn find_task_by_source(&self, source: TaskSource, source_id: &str) -> Result<Option<Task>> {
            self.inner.find_task_by_source(source, source_id).await
        }
        async fn update_task_details(&self, details: &TaskDetails) -> Result<()> {
            self.inner.update_task_details(details).await
        }
        async fn apply_score(&self, update: &ScoreUpdate) -> Result<()> {
            self.inner.apply_score(update).await
        }
        async fn transition_status(&self, change: &StatusChange) -> Result<bool> {
            self.inner.transition_status(change).await
        }
        async fn set_snooze(&self, id: Uuid, until: Option<DateTime<Utc>>, at: DateTime<Utc>) -> Result<()> {
            self.inner.set_snooze(id, until, at).await
        }
        async fn clear_expired_snooze(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
            self.inner.clear_expired_snooze(id, now).await
        }
        async fn list_tasks_by_status(&self, statuses: &[TaskStatus]) -> Result<Vec<Task>> {
            let tasks = self.inner.list_tasks_by_status(statuses).await?;
            if statuses == TaskStatus::OPEN {
                self.interfere().await?;
            }
            Ok(tasks)
        }
        async fn tasks_for_thread(&self, thread_id: Uuid) -> Result<Vec<Task>> {
            self.inner.tasks_for_thread(thread_id).await
        }
        async fn ranked_tasks(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>> {
            self.inner.ranked_tasks(now, limit).await
        }
        async fn delete_task(&self, id: Uuid) -> Result<()> {
            self.inner.delete_task(id).await
        }
        async fn delete_auto_extracted_tasks(&self) -> Result<usize> {
            self.inner.delete_auto_extracted_tasks().await
        }
        async fn insert_thread(&self, thread: &Thread) -> Result<()> {
            self.inner.insert_thread(thread).await
        }
        async fn get_thread(&self, id: Uuid) -> Result<Option<Thread>> {
            self.inner.get_thread(id).await
        }
        async fn find_thread_by_external(&self, source: TaskSource, external_id: &str) -> Result<Option<Thread>> {
            self.inner.find_thread_by_external(source, external_id).await
        }
        async fn set_thread_aggregate(&self, id: Uuid, task_count: u32, priority_score: u8) -> Result<()> {
            self.inner.set_thread_aggregate(id, task_count, priority_score).await
        }
        async fn set_thread_summary(
            &self,
            id: Uuid,
            summary: &str,
            relevant_to_user: bool,
            summarized_at: DateTime<Utc>,
        ) -> Result<()> {
            self.inner
                .set_thread_summary(id, summary, relevant_to_user, summarized_at)
                .await
        }
        async fn list_unsummarized_threads(&self, limit: usize) -> Result<Vec<Thread>> {
            self.inner.list_unsummarized_threads(limit).await
        }
        async fn list_summarized_threads(&self) -> Result<Vec<Thread>> {
            self.inner.list_summarized_threads().await
        }
        async fn list_priorities(&self, kind: Option<PriorityKind>) -> Result<Vec<Priority>> {
            self.inner.list_priorities(kind).await
        }
        async fn insert_priority(&self, priority: &Priority) -> Result<()> {
            self.inner.insert_priority(priority).await
        }
        async fn update_priority(&self, priority: &Priority) -> Result<()> {
            self.inner.update_priority(priority).await
        }
        async fn get_embedding(&self, task_id: Uuid) -> Result<Option<Embedding>> {
            self.inner.get_embedding(task_id).await
        }
        async fn upsert_embedding(&self, embedding: &Embedding) -> Result<()> {
            self.inner.upsert_embedding(embedding).await
        }
        async fn labeled_embeddings(&self) -> Result<Vec<LabeledEmbedding>> {
            self.inner.labeled_embeddings().await
        }
        async fn append_feedback(&self, feedback: &Feedback) -> Result<()> {
            self.inner.append_feedback(feedback).await
        }
        async fn feedback_count(&self) -> Result<u64> {
            self.inner.feedback_count().await
        }
        async fn feedback_for_task(&self, task_id: Uuid) -> Result<Vec<Feedback>> {
            self.inner.feedback_for_task(task_id).await
        }
        async fn append_usage(&self, record: &UsageRecord) -> Result<()> {
            self.inner.append_usage(record).await
        }
        async fn usage_since(&self, since: DateTime<Utc>) -> Result<UsageTotals> {
            self.inner.usage_since(since).await
        }
    }

    fn ctx() -> JobContext {
        JobContext {
            job: "test".into(),
            cancel: CancellationToken::new(),
        }
    }

    fn completed(days_ago: i64) -> Task {
        let mut task = Task::new(TaskSource::Manual, "me", format!("done {}", days_ago));
        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now() - Duration::days(days_ago));
        task
    }

    #[tokio::test]
    async fn test_sync_continues_past_failing_source() {
        let bad = Arc::new(RecordingSource::new("drive", TaskSource::Drive).failing_sync());
        let good = Arc::new(RecordingSource::new("mail", TaskSource::Email));
        let job = SyncJob::new(vec![bad.clone() as Arc<dyn DataSource>, good.clone()]);

        job.run(ctx()).await.unwrap();
        assert_eq!(bad.syncs.load(Ordering::SeqCst), 1);
        assert_eq!(good.syncs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sync_fails_when_every_source_fails() {
        let bad = Arc::new(RecordingSource::new("drive", TaskSource::Drive).failing_sync());
        let job = SyncJob::new(vec![bad as Arc<dyn DataSource>]);
        assert!(job.run(ctx()).await.is_err());
    }

    #[tokio::test]
    async fn test_cleanup() {
        let now = Utc::now();
        let old = completed(45);
        let recent = completed(3);
        let old_with_feedback = completed(60);
        let mut snoozed = Task::new(TaskSource::Manual, "me", "snoozed");
        snoozed.snoozed_until = Some(now - Duration::hours(1));
        let mut still_snoozed = Task::new(TaskSource::Manual, "me", "later");
        still_snoozed.snoozed_until = Some(now + Duration::hours(1));

        let store = Arc::new(
            MemoryStore::new()
                .with_task(old.clone())
                .await
                .with_task(recent.clone())
                .await
                .with_task(old_with_feedback.clone())
                .await
                .with_task(snoozed.clone())
                .await
                .with_task(still_snoozed.clone())
                .await
                .with_feedback(Feedback {
                    id: Uuid::new_v4(),
                    task_id: old_with_feedback.id,
                    vote: Vote::Up,
                    reason: None,
                    original_score: 40,
                    adjusted_score: 60,
                    created_at: now,
                })
                .await,
        );

        let report = CleanupJob::new(store.clone(), 30).cleanup(now).await.unwrap();
        assert_eq!(
            report,
            CleanupReport {
                snoozes_cleared: 1,
                tasks_deleted: 1,
                kept_for_feedback: 1,
            }
        );
        assert!(store.get_task(old.id).await.unwrap().is_none());
        assert!(store.get_task(recent.id).await.unwrap().is_some());
        assert!(store.get_task(old_with_feedback.id).await.unwrap().is_some());
        assert!(store.get_task(snoozed.id).await.unwrap().unwrap().snoozed_until.is_none());
        assert!(store.get_task(still_snoozed.id).await.unwrap().unwrap().snoozed_until.is_some());
    }

    fn expired_snooze() -> Task {
        let mut task = Task::new(TaskSource::Manual, "me", "snoozed");
        task.snoozed_until = Some(Utc::now() - Duration::hours(1));
        task
    }

    #[tokio::test]
    async fn test_cleanup_keeps_completion_made_after_its_read() {
        let task = expired_snooze();
        let id = task.id;
        let store = Arc::new(InterleavingStore::new(
            MemoryStore::new().with_task(task).await,
            id,
            Interference::Complete,
        ));

        let report = CleanupJob::new(store.clone(), 30).cleanup(Utc::now()).await.unwrap();
        assert_eq!(report.snoozes_cleared, 1);
        let stored = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert!(stored.completed_at.is_some());
        assert!(stored.snoozed_until.is_none());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_snooze_extended_after_its_read() {
        let task = expired_snooze();
        let id = task.id;
        let until = Utc::now() + Duration::days(2);
        let store = Arc::new(InterleavingStore::new(
            MemoryStore::new().with_task(task).await,
            id,
            Interference::Resnooze(until),
        ));

        let report = CleanupJob::new(store.clone(), 30).cleanup(Utc::now()).await.unwrap();
        assert_eq!(report.snoozes_cleared, 0);
        let stored = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(stored.snoozed_until, Some(until));
    }

    #[tokio::test]
    async fn test_snapshot_job_writes_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let task = Task::new(TaskSource::Manual, "me", "Keep me");
        let store = Arc::new(MemoryStore::new().with_task(task.clone()).await);

        SnapshotJob::new(store, &path).run(ctx()).await.unwrap();

        let reloaded = MemoryStore::load(&path).await.unwrap();
        assert!(reloaded.get_task(task.id).await.unwrap().is_some());
    }
}
