//! In-memory implementation of EngineStore.
//!
//! Backs the engine with `tokio::sync::RwLock<HashMap<K, V>>` collections.
//! Used as the default runtime backend and as the seeded store in tests.
//! Readers clone out of a read guard, so they see a consistent snapshot and
//! never hold a lock across an await point in caller code.
//!
//! Lock order (whenever more than one lock is held): tasks, threads,
//! embeddings, feedback, priorities, usage.

use super::models::*;
use super::traits::EngineStore;
use crate::EngineError;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory engine store.
#[derive(Default)]
pub struct MemoryStore {
    pub tasks: RwLock<HashMap<Uuid, Task>>,
    pub threads: RwLock<HashMap<Uuid, Thread>>,
    pub priorities: RwLock<HashMap<Uuid, Priority>>,
    pub embeddings: RwLock<HashMap<Uuid, Embedding>>,
    pub feedback: RwLock<Vec<Feedback>>,
    pub usage: RwLock<Vec<UsageRecord>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Builder / seeding methods
    // ========================================================================

    /// Seed a task into the store.
    pub async fn with_task(self, task: Task) -> Self {
        self.tasks.write().await.insert(task.id, task);
        self
    }

    /// Seed a thread into the store.
    pub async fn with_thread(self, thread: Thread) -> Self {
        self.threads.write().await.insert(thread.id, thread);
        self
    }

    /// Seed a strategic priority into the store.
    pub async fn with_priority(self, priority: Priority) -> Self {
        self.priorities.write().await.insert(priority.id, priority);
        self
    }

    /// Seed an embedding into the store.
    pub async fn with_embedding(self, embedding: Embedding) -> Self {
        self.embeddings
            .write()
            .await
            .insert(embedding.task_id, embedding);
        self
    }

    /// Seed a feedback record into the store.
    pub async fn with_feedback(self, feedback: Feedback) -> Self {
        self.feedback.write().await.push(feedback);
        self
    }
}

fn oldest_first<T, F>(items: &mut [T], key: F)
where
    F: Fn(&T) -> (DateTime<Utc>, Uuid),
{
    items.sort_by_key(|item| key(item));
}

#[async_trait]
impl EngineStore for MemoryStore {
    // ========================================================================
    // Tasks
    // ========================================================================

    async fn insert_task(&self, task: &Task) -> Result<()> {
        self.tasks.write().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn find_task_by_source(
        &self,
        source: TaskSource,
        source_id: &str,
    ) -> Result<Option<Task>> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .find(|t| t.source == source && t.source_id == source_id)
            .cloned())
    }

    async fn update_task_details(&self, details: &TaskDetails) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&details.task_id)
            .ok_or(EngineError::TaskNotFound(details.task_id))?;
        task.title = details.title.clone();
        task.description = details.description.clone();
        task.due_at = details.due_at;
        task.project = details.project.clone();
        task.impact = details.impact;
        task.effort = details.effort;
        task.stakeholder = details.stakeholder;
        task.updated_at = details.updated_at;
        Ok(())
    }

    async fn apply_score(&self, update: &ScoreUpdate) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&update.task_id)
            .ok_or(EngineError::TaskNotFound(update.task_id))?;
        task.score = update.score.min(100);
        task.urgency = update.urgency;
        task.matched_priorities = update.matched_priorities.clone();
        task.updated_at = update.updated_at;
        Ok(())
    }

    async fn transition_status(&self, change: &StatusChange) -> Result<bool> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&change.task_id)
            .ok_or(EngineError::TaskNotFound(change.task_id))?;
        if task.status != change.from {
            return Ok(false);
        }
        change.apply(task);
        Ok(true)
    }

    async fn set_snooze(
        &self,
        id: Uuid,
        until: Option<DateTime<Utc>>,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(EngineError::TaskNotFound(id))?;
        task.snoozed_until = until;
        task.updated_at = updated_at;
        Ok(())
    }

    async fn clear_expired_snooze(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(&id) else {
            return Ok(false);
        };
        if !task.snoozed_until.is_some_and(|until| until <= now) {
            return Ok(false);
        }
        task.snoozed_until = None;
        task.updated_at = now;
        Ok(true)
    }

    async fn list_tasks_by_status(&self, statuses: &[TaskStatus]) -> Result<Vec<Task>> {
        let mut out: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| statuses.contains(&t.status))
            .cloned()
            .collect();
        oldest_first(&mut out, |t| (t.created_at, t.id));
        Ok(out)
    }

    async fn tasks_for_thread(&self, thread_id: Uuid) -> Result<Vec<Task>> {
        let mut out: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.thread_id == Some(thread_id))
            .cloned()
            .collect();
        oldest_first(&mut out, |t| (t.created_at, t.id));
        Ok(out)
    }

    async fn ranked_tasks(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>> {
        let mut out: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.status.is_open() && !t.is_snoozed(now))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.due_at.cmp(&b.due_at))
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        out.truncate(limit);
        Ok(out)
    }

    async fn delete_task(&self, id: Uuid) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let mut embeddings = self.embeddings.write().await;
        tasks.remove(&id);
        embeddings.remove(&id);
        Ok(())
    }

    async fn delete_auto_extracted_tasks(&self) -> Result<usize> {
        let mut tasks = self.tasks.write().await;
        let mut embeddings = self.embeddings.write().await;
        let feedback = self.feedback.read().await;
        let labeled: HashSet<Uuid> = feedback.iter().map(|f| f.task_id).collect();
        let doomed: Vec<Uuid> = tasks
            .values()
            .filter(|t| t.auto_extracted)
            .filter(|t| !(t.status == TaskStatus::Completed && labeled.contains(&t.id)))
            .map(|t| t.id)
            .collect();
        for id in &doomed {
            tasks.remove(id);
            embeddings.remove(id);
        }
        Ok(doomed.len())
    }

    // ========================================================================
    // Threads
    // ========================================================================

    async fn insert_thread(&self, thread: &Thread) -> Result<()> {
        self.threads.write().await.insert(thread.id, thread.clone());
        Ok(())
    }

    async fn get_thread(&self, id: Uuid) -> Result<Option<Thread>> {
        Ok(self.threads.read().await.get(&id).cloned())
    }

    async fn find_thread_by_external(
        &self,
        source: TaskSource,
        external_id: &str,
    ) -> Result<Option<Thread>> {
        Ok(self
            .threads
            .read()
            .await
            .values()
            .find(|t| t.source == source && t.external_id == external_id)
            .cloned())
    }

    async fn set_thread_aggregate(&self, id: Uuid, task_count: u32, priority_score: u8) -> Result<()> {
        let mut threads = self.threads.write().await;
        let thread = threads.get_mut(&id).ok_or(EngineError::ThreadNotFound(id))?;
        thread.task_count = task_count;
        thread.priority_score = priority_score.min(100);
        Ok(())
    }

    async fn set_thread_summary(
        &self,
        id: Uuid,
        summary: &str,
        relevant_to_user: bool,
        summarized_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut threads = self.threads.write().await;
        let thread = threads.get_mut(&id).ok_or(EngineError::ThreadNotFound(id))?;
        thread.summary = Some(summary.to_string());
        thread.relevant_to_user = relevant_to_user;
        thread.summarized_at = Some(summarized_at);
        Ok(())
    }

    async fn list_unsummarized_threads(&self, limit: usize) -> Result<Vec<Thread>> {
        let mut out: Vec<Thread> = self
            .threads
            .read()
            .await
            .values()
            .filter(|t| t.summary.is_none())
            .cloned()
            .collect();
        oldest_first(&mut out, |t| (t.created_at, t.id));
        out.truncate(limit);
        Ok(out)
    }

    async fn list_summarized_threads(&self) -> Result<Vec<Thread>> {
        let mut out: Vec<Thread> = self
            .threads
            .read()
            .await
            .values()
            .filter(|t| t.summary.is_some())
            .cloned()
            .collect();
        oldest_first(&mut out, |t| (t.created_at, t.id));
        Ok(out)
    }

    // ========================================================================
    // Priorities
    // ========================================================================

    async fn list_priorities(&self, kind: Option<PriorityKind>) -> Result<Vec<Priority>> {
        let mut out: Vec<Priority> = self
            .priorities
            .read()
            .await
            .values()
            .filter(|p| kind.map_or(true, |k| p.kind == k))
            .cloned()
            .collect();
        oldest_first(&mut out, |p| (p.created_at, p.id));
        Ok(out)
    }

    async fn insert_priority(&self, priority: &Priority) -> Result<()> {
        self.priorities
            .write()
            .await
            .insert(priority.id, priority.clone());
        Ok(())
    }

    async fn update_priority(&self, priority: &Priority) -> Result<()> {
        let mut priorities = self.priorities.write().await;
        match priorities.get_mut(&priority.id) {
            Some(existing) => {
                *existing = priority.clone();
                Ok(())
            }
            None => anyhow::bail!("Priority {} not found", priority.id),
        }
    }

    // ========================================================================
    // Embeddings
    // ========================================================================

    async fn get_embedding(&self, task_id: Uuid) -> Result<Option<Embedding>> {
        Ok(self.embeddings.read().await.get(&task_id).cloned())
    }

    async fn upsert_embedding(&self, embedding: &Embedding) -> Result<()> {
        self.embeddings
            .write()
            .await
            .insert(embedding.task_id, embedding.clone());
        Ok(())
    }

    async fn labeled_embeddings(&self) -> Result<Vec<LabeledEmbedding>> {
        let embeddings = self.embeddings.read().await;
        let feedback = self.feedback.read().await;

        let mut votes: HashMap<Uuid, (f64, usize)> = HashMap::new();
        for f in feedback.iter() {
            let entry = votes.entry(f.task_id).or_insert((0.0, 0));
            entry.0 += f.vote.value();
            entry.1 += 1;
        }

        let mut out: Vec<LabeledEmbedding> = embeddings
            .values()
            .filter_map(|e| {
                votes.get(&e.task_id).map(|(sum, n)| LabeledEmbedding {
                    task_id: e.task_id,
                    vector: e.vector.clone(),
                    model: e.model.clone(),
                    vote: sum / *n as f64,
                    feedback_count: *n,
                })
            })
            .collect();
        out.sort_by_key(|l| l.task_id);
        Ok(out)
    }

    // ========================================================================
    // Feedback
    // ========================================================================

    async fn append_feedback(&self, feedback: &Feedback) -> Result<()> {
        self.feedback.write().await.push(feedback.clone());
        Ok(())
    }

    async fn feedback_count(&self) -> Result<u64> {
        Ok(self.feedback.read().await.len() as u64)
    }

    async fn feedback_for_task(&self, task_id: Uuid) -> Result<Vec<Feedback>> {
        Ok(self
            .feedback
            .read()
            .await
            .iter()
            .filter(|f| f.task_id == task_id)
            .cloned()
            .collect())
    }

    // ========================================================================
    // Usage ledger
    // ========================================================================

    async fn append_usage(&self, record: &UsageRecord) -> Result<()> {
        self.usage.write().await.push(record.clone());
        Ok(())
    }

    async fn usage_since(&self, since: DateTime<Utc>) -> Result<UsageTotals> {
        let usage = self.usage.read().await;
        Ok(usage
            .iter()
            .filter(|r| r.recorded_at >= since)
            .fold(UsageTotals::default(), |mut acc, r| {
                acc.calls += 1;
                acc.input_tokens += r.input_tokens;
                acc.output_tokens += r.output_tokens;
                acc.cost_usd += r.cost_usd;
                acc
            }))
    }
}
