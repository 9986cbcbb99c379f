//! Task scoring pipeline
//!
//! For each task:
//! 1. refresh urgency from the due date
//! 2. judge strategic alignment (fail-soft)
//! 3. compute the deterministic base score
//! 4. ensure the task's embedding (best-effort)
//! 5. blend with the K-NN signal according to the current phase
//! 6. persist the score and refresh the thread aggregate
//!
//! Each task is committed on its own, so a cancelled pass only truncates
//! progress.

use crate::embeddings::{EmbeddingProvider, EmbeddingStore};
use crate::events::{EventEmitter, EventKind};
use crate::learning::{FeedbackLog, HybridBlender, NeighborScorer, Phase, PhaseThresholds};
use crate::llm::ReasoningProvider;
use crate::scoring::{self, AlignmentDelegate, ScoreInputs};
use crate::store::models::{Feedback, ScoreUpdate, StrategicPriorities, Task, TaskStatus};
use crate::store::EngineStore;
use crate::{Config, EngineError};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tunables of the scoring pipeline
#[derive(Debug, Clone)]
pub struct PrioritizerSettings {
    /// Used when the priorities repository is empty
    pub default_priorities: StrategicPriorities,
    pub knn_k: usize,
    pub thresholds: PhaseThresholds,
    pub embed_max_attempts: u32,
    pub embed_backoff: Duration,
}

impl Default for PrioritizerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PrioritizerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_priorities: config.priorities.clone(),
            knn_k: config.scoring.knn_k,
            thresholds: PhaseThresholds {
                hybrid: config.scoring.hybrid_threshold,
                knn: config.scoring.knn_threshold,
            },
            embed_max_attempts: config.embedding.max_attempts,
            embed_backoff: config.embedding.retry_backoff(),
        }
    }
}

/// Outcome of one full prioritization pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassSummary {
    /// 1-based sequence number of the pass
    pub pass: u64,
    pub phase: Phase,
    pub feedback_count: u64,
    pub scored: usize,
    pub failed: usize,
    /// Stopped early because of cancellation
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

pub struct Prioritizer {
    store: Arc<dyn EngineStore>,
    alignment: AlignmentDelegate,
    embeddings: Option<EmbeddingStore>,
    blender: HybridBlender,
    feedback: FeedbackLog,
    events: Arc<dyn EventEmitter>,
    passes: AtomicU64,
}

impl Prioritizer {
    /// `embedder` is optional: without it K-NN never has vectors and every
    /// phase degrades to the base score.
    pub fn new(
        store: Arc<dyn EngineStore>,
        reasoning: Arc<dyn ReasoningProvider>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        events: Arc<dyn EventEmitter>,
        settings: PrioritizerSettings,
    ) -> Self {
        let alignment =
            AlignmentDelegate::new(reasoning, store.clone(), settings.default_priorities.clone());
        let mut neighbors = NeighborScorer::new(store.clone(), settings.knn_k);
        if let Some(provider) = &embedder {
            neighbors = neighbors.for_model(provider.model_name());
        }
        let embeddings = embedder.map(|provider| {
            EmbeddingStore::new(
                provider,
                store.clone(),
                settings.embed_max_attempts,
                settings.embed_backoff,
            )
        });
        let blender = HybridBlender::new(
            store.clone(),
            neighbors,
            settings.thresholds,
        );

        Self {
            feedback: FeedbackLog::new(store.clone()),
            store,
            alignment,
            embeddings,
            blender,
            events,
            passes: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<dyn EngineStore> {
        &self.store
    }

    /// Number of full passes finished so far
    pub fn passes_completed(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Current blending phase and the feedback volume it was derived from
    pub async fn current_phase(&self) -> Result<(Phase, u64)> {
        self.blender.current_phase().await
    }

    /// Score a single task right away (e.g. just after extraction).
    ///
    /// Returns the task as persisted.
    pub async fn prioritize_one(&self, task_id: Uuid) -> Result<Task> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or(EngineError::TaskNotFound(task_id))?;
        let (phase, _) = self.current_phase().await?;
        let priorities = self.alignment.resolve_priorities().await;
        self.score_task(task, phase, &priorities).await
    }

    /// Rescore every open task.
    ///
    /// Phase and priorities are resolved once per pass. One task failing is
    /// logged and counted; it never aborts the pass.
    pub async fn prioritize_all(&self, cancel: &CancellationToken) -> Result<PassSummary> {
        let started = Instant::now();
        let (phase, feedback_count) = self.current_phase().await?;
        let priorities = self.alignment.resolve_priorities().await;
        let tasks = self
            .store
            .list_tasks_by_status(&TaskStatus::OPEN)
            .await
            .context("Failed to list open tasks")?;

        info!(
            tasks = tasks.len(),
            phase = %phase,
            feedback_count,
            "Prioritization pass started"
        );

        let (mut scored, mut failed, mut cancelled) = (0usize, 0usize, false);
        for task in tasks {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let task_id = task.id;
            match self.score_task(task, phase, &priorities).await {
                Ok(_) => scored += 1,
                Err(e) => {
                    failed += 1;
                    warn!(task_id = %task_id, "Failed to score task: {:#}", e);
                }
            }
        }

        let pass = self.passes.fetch_add(1, Ordering::SeqCst) + 1;
        let summary = PassSummary {
            pass,
            phase,
            feedback_count,
            scored,
            failed,
            cancelled,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            pass,
            scored,
            failed,
            cancelled,
            elapsed_ms = summary.elapsed_ms,
            "Prioritization pass finished"
        );
        self.events.emit_kind(EventKind::PassCompleted {
            pass,
            scored,
            failed,
            elapsed_ms: summary.elapsed_ms,
        });
        Ok(summary)
    }

    /// Validate and append a feedback vote (`1` or `-1`).
    pub async fn record_feedback(
        &self,
        task_id: Uuid,
        vote: i32,
        reason: Option<String>,
        original_score: u8,
        adjusted_score: u8,
    ) -> Result<Feedback> {
        self.feedback
            .record(task_id, vote, reason, original_score, adjusted_score)
            .await
    }

    async fn score_task(
        &self,
        mut task: Task,
        phase: Phase,
        priorities: &StrategicPriorities,
    ) -> Result<Task> {
        let now = Utc::now();
        scoring::refresh_urgency(&mut task, now);

        let alignment = self.alignment.evaluate(&task, priorities).await;
        task.set_matches(&alignment.matches);
        let base = scoring::score(&ScoreInputs::from_task(&task, alignment.score));

        let vector = match &self.embeddings {
            Some(embeddings) => match embeddings.ensure_embedding(&task).await {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(task_id = %task.id, "Embedding unavailable, scoring without K-NN: {:#}", e);
                    None
                }
            },
            None => None,
        };

        let outcome = self
            .blender
            .final_score(task.id, base, phase, vector.as_deref())
            .await;

        let previous_score = task.score;
        task.score = outcome.score;
        task.updated_at = now;
        self.store
            .apply_score(&ScoreUpdate::from_task(&task))
            .await
            .with_context(|| format!("Failed to persist score for task {}", task.id))?;

        debug!(
            task_id = %task.id,
            base_score = base,
            score = task.score,
            alignment = alignment.score,
            adjustment = outcome.adjustment,
            phase = phase.name(),
            "Task scored"
        );

        if let Some(thread_id) = task.thread_id {
            if let Err(e) = self.refresh_thread_aggregate(thread_id).await {
                warn!(thread_id = %thread_id, "Failed to refresh thread aggregate: {:#}", e);
            }
        }

        self.events.emit_kind(EventKind::TaskScored {
            task_id: task.id,
            score: task.score,
            previous_score,
            phase: phase.name().to_string(),
        });
        Ok(task)
    }

    /// Thread score = max over its open tasks; task count = all linked tasks
    pub(crate) async fn refresh_thread_aggregate(&self, thread_id: Uuid) -> Result<()> {
        let tasks = self.store.tasks_for_thread(thread_id).await?;
        let priority_score = tasks
            .iter()
            .filter(|t| t.status.is_open())
            .map(|t| t.score)
            .max()
            .unwrap_or(0);
        match self
            .store
            .set_thread_aggregate(thread_id, tasks.len() as u32, priority_score)
            .await
        {
            Err(e) if matches!(e.downcast_ref::<EngineError>(), Some(EngineError::ThreadNotFound(_))) => {
                debug!(thread_id = %thread_id, "Thread gone, aggregate skipped");
                Ok(())
            }
            other => other,
        }
    }
}
