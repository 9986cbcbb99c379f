//! Job orchestration
//!
//! - `scheduler`: the `JobOrchestrator` (named triggers, overlap prevention,
//!   panic isolation, graceful shutdown)
//! - `batch`: sequential summarize + extract over the conversation backlog
//! - `reprocess`: rebuild auto-extracted tasks from stored summaries
//! - `builtin`: the sync / summarize / prioritize / cleanup / snapshot jobs

pub mod batch;
pub mod builtin;
pub mod reprocess;
pub mod scheduler;

pub use batch::{estimate_batch_cost, BatchProcessor, BatchReport, CostEstimate};
pub use builtin::{
    CleanupJob, CleanupReport, PrioritizeJob, SnapshotJob, SummarizeJob, SyncJob, CLEANUP_JOB,
    PRIORITIZE_JOB, SNAPSHOT_JOB, SUMMARIZE_JOB, SYNC_JOB,
};
pub use reprocess::{reprocess_ai_tasks, ReprocessReport};
pub use scheduler::{
    delay_until, Job, JobContext, JobHandle, JobOrchestrator, JobOutcome, JobState, JobStatus,
    Schedule,
};

use crate::engine::Engine;
use crate::events::EventEmitter;
use crate::llm::ReasoningProvider;
use crate::sources::DataSource;
use crate::store::{EngineStore, MemoryStore};
use crate::Config;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Register the four standard jobs on the schedules from `config`, plus
/// periodic snapshots of `snapshot` when given.
///
/// The orchestrator is returned unstarted.
#[allow(clippy::too_many_arguments)]
pub fn standard_orchestrator(
    config: &Config,
    engine: &Engine,
    store: Arc<dyn EngineStore>,
    snapshot: Option<Arc<MemoryStore>>,
    reasoning: Arc<dyn ReasoningProvider>,
    sources: Vec<Arc<dyn DataSource>>,
    events: Arc<dyn EventEmitter>,
    cancel: CancellationToken,
) -> Result<JobOrchestrator> {
    let scheduler = &config.scheduler;

    let processor = BatchProcessor::new(
        store.clone(),
        reasoning,
        engine.prioritizer().clone(),
        events.clone(),
    )
    .with_pricing(config.llm.pricing())
    .with_batch_limit(config.llm.batch_limit)
    .with_expected_output_tokens(config.llm.expected_output_tokens);

    let mut builder = JobOrchestrator::builder(cancel, events)
        .shutdown_grace(Duration::from_secs(scheduler.shutdown_grace_secs))
        .job(
            Arc::new(SyncJob::new(sources)),
            Schedule::Every(Duration::from_secs(scheduler.sync_interval_secs)),
        )
        .job(
            Arc::new(SummarizeJob::new(processor)),
            Schedule::Every(Duration::from_secs(scheduler.summarize_interval_secs)),
        )
        .job(
            Arc::new(PrioritizeJob::new(engine.worker().clone())),
            Schedule::Every(Duration::from_secs(scheduler.prioritize_interval_secs)),
        )
        .job(
            Arc::new(CleanupJob::new(store, config.cleanup.completed_retention_days)),
            Schedule::DailyAt(scheduler.cleanup_time()?),
        );

    let interval = config.storage.snapshot_interval_secs;
    if let Some(memory) = snapshot.filter(|_| interval > 0) {
        builder = builder.job(
            Arc::new(SnapshotJob::new(memory, config.storage.path())),
            Schedule::Every(Duration::from_secs(interval)),
        );
    }
    builder.build()
}
