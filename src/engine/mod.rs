//! Prioritization engine
//!
//! - `Prioritizer`: the scoring pipeline (single task or full pass)
//! - `PrioritizationWorker`: queue + dedicated task running full passes
//! - `TaskLifecycle`: complete / uncomplete / snooze, each followed by a pass
//! - `Engine`: the operations exposed to API/TUI/CLI collaborators

pub mod lifecycle;
pub mod prioritizer;
pub mod worker;

pub use lifecycle::TaskLifecycle;
pub use prioritizer::{PassSummary, Prioritizer, PrioritizerSettings};
pub use worker::{PassHandle, PrioritizationWorker};

use crate::embeddings::EmbeddingProvider;
use crate::events::EventEmitter;
use crate::learning::Phase;
use crate::llm::ReasoningProvider;
use crate::sources::DataSource;
use crate::store::models::{Feedback, Task};
use crate::store::EngineStore;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Everything a collaborator needs to drive prioritization
#[derive(Clone)]
pub struct Engine {
    prioritizer: Arc<Prioritizer>,
    worker: PrioritizationWorker,
    lifecycle: Arc<TaskLifecycle>,
}

impl Engine {
    /// Wire the engine and spawn its worker. The worker stops when `cancel`
    /// fires; await the returned handle to observe that.
    pub fn start(
        store: Arc<dyn EngineStore>,
        reasoning: Arc<dyn ReasoningProvider>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        sources: Vec<Arc<dyn DataSource>>,
        events: Arc<dyn EventEmitter>,
        settings: PrioritizerSettings,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let prioritizer = Arc::new(Prioritizer::new(
            store.clone(),
            reasoning,
            embedder,
            events.clone(),
            settings,
        ));
        let (worker, join) = PrioritizationWorker::spawn(prioritizer.clone(), cancel);
        let lifecycle = Arc::new(TaskLifecycle::new(store, sources, worker.clone(), events));
        (
            Self {
                prioritizer,
                worker,
                lifecycle,
            },
            join,
        )
    }

    pub fn prioritizer(&self) -> &Arc<Prioritizer> {
        &self.prioritizer
    }

    pub fn worker(&self) -> &PrioritizationWorker {
        &self.worker
    }

    /// Run one full pass on the worker and wait for it
    pub async fn prioritize_all(&self) -> Result<PassSummary> {
        self.worker.request_pass().await?.wait().await
    }

    /// Queue one full pass without waiting
    pub async fn request_pass(&self) -> Result<PassHandle> {
        self.worker.request_pass().await
    }

    pub async fn prioritize_one(&self, task_id: Uuid) -> Result<Task> {
        self.prioritizer.prioritize_one(task_id).await
    }

    pub async fn complete_task(&self, task_id: Uuid) -> Result<PassHandle> {
        self.lifecycle.complete_task(task_id).await
    }

    pub async fn uncomplete_task(&self, task_id: Uuid) -> Result<PassHandle> {
        self.lifecycle.uncomplete_task(task_id).await
    }

    pub async fn snooze_task(&self, task_id: Uuid, until: DateTime<Utc>) -> Result<PassHandle> {
        self.lifecycle.snooze_task(task_id, until).await
    }

    pub async fn record_feedback(
        &self,
        task_id: Uuid,
        vote: i32,
        reason: Option<String>,
        original_score: u8,
        adjusted_score: u8,
    ) -> Result<Feedback> {
        self.prioritizer
            .record_feedback(task_id, vote, reason, original_score, adjusted_score)
            .await
    }

    pub async fn current_phase(&self) -> Result<(Phase, u64)> {
        self.prioritizer.current_phase().await
    }

    pub fn passes_completed(&self) -> u64 {
        self.worker.passes_completed()
    }
}
