//! Batch AI processing of the conversation backlog
//!
//! Un-summarized threads are processed oldest first, one at a time:
//! summarize, extract tasks when the thread concerns the user, insert and
//! score them. The reasoning capability is rate and cost limited, so there is
//! no parallelism here.
//!
//! A quota-exhausted error ends the batch at once; everything committed so
//! far stays. Any other per-thread failure is logged and the batch moves on.

use crate::engine::Prioritizer;
use crate::events::{EventEmitter, EventKind};
use crate::llm::{is_quota_exhausted, ExtractedTask, LlmPricing, ReasoningProvider};
use crate::store::models::{Task, Thread};
use crate::store::EngineStore;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Prompt tokens added to every call on top of the thread text
pub const PROMPT_OVERHEAD_TOKENS: u64 = 350;

/// Calls made per thread (summarize + extract)
const CALLS_PER_THREAD: u64 = 2;

/// Up-front token and cost estimate of a batch
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostEstimate {
    pub threads: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// Rough estimate at four characters per token.
pub fn estimate_batch_cost(
    threads: &[Thread],
    pricing: &LlmPricing,
    expected_output_tokens: u64,
) -> CostEstimate {
    let mut input_tokens = 0u64;
    for thread in threads {
        let chars = (thread.subject.chars().count() + thread.content.chars().count()) as u64;
        let text_tokens = chars.div_ceil(4);
        input_tokens += CALLS_PER_THREAD * (text_tokens + PROMPT_OVERHEAD_TOKENS);
    }
    let output_tokens = threads.len() as u64 * CALLS_PER_THREAD * expected_output_tokens;
    CostEstimate {
        threads: threads.len(),
        input_tokens,
        output_tokens,
        cost_usd: pricing.cost(input_tokens, output_tokens),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub failed: usize,
    pub quota_exhausted: bool,
    pub cancelled: bool,
    /// Threads of this batch not attempted
    pub remaining: usize,
    pub tasks_extracted: usize,
}

/// Turn an extracted task into a task linked to its thread.
pub fn materialize(thread: &Thread, extracted: &ExtractedTask) -> Task {
    let source_id = extracted
        .requester
        .clone()
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| thread.external_id.clone());

    let mut task = Task::new(thread.source, source_id, extracted.title.trim());
    task.thread_id = Some(thread.id);
    task.description = extracted.description.clone();
    task.due_at = extracted.due_at;
    task.project = extracted.project.clone().filter(|p| !p.is_empty());
    task.impact = extracted.impact.map(|i| i.min(5)).unwrap_or(0);
    task.effort = extracted.effort.unwrap_or_default();
    task.stakeholder = extracted.stakeholder.unwrap_or_default();
    task.auto_extracted = true;
    task.metadata = Some(
        serde_json::json!({
            "thread_subject": thread.subject,
            "thread_external_id": thread.external_id,
        })
        .to_string(),
    );
    task
}

/// Insert the extracted tasks of `thread`, skipping titles the thread
/// already has. Returns the inserted tasks.
pub async fn insert_extracted(
    store: &dyn EngineStore,
    thread: &Thread,
    extracted: &[ExtractedTask],
) -> Result<Vec<Task>> {
    let mut seen: HashSet<String> = store
        .tasks_for_thread(thread.id)
        .await?
        .into_iter()
        .map(|t| t.title.to_lowercase())
        .collect();

    let mut inserted = Vec::new();
    for item in extracted {
        let title = item.title.trim();
        if title.is_empty() || !seen.insert(title.to_lowercase()) {
            continue;
        }
        let task = materialize(thread, item);
        store.insert_task(&task).await?;
        inserted.push(task);
    }
    Ok(inserted)
}

pub struct BatchProcessor {
    store: Arc<dyn EngineStore>,
    reasoning: Arc<dyn ReasoningProvider>,
    prioritizer: Arc<Prioritizer>,
    events: Arc<dyn EventEmitter>,
    pricing: LlmPricing,
    batch_limit: usize,
    expected_output_tokens: u64,
}

impl BatchProcessor {
    pub fn new(
        store: Arc<dyn EngineStore>,
        reasoning: Arc<dyn ReasoningProvider>,
        prioritizer: Arc<Prioritizer>,
        events: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            store,
            reasoning,
            prioritizer,
            events,
            pricing: LlmPricing::default(),
            batch_limit: 50,
            expected_output_tokens: 400,
        }
    }

    pub fn with_pricing(mut self, pricing: LlmPricing) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    pub fn with_expected_output_tokens(mut self, tokens: u64) -> Self {
        self.expected_output_tokens = tokens;
        self
    }

    /// Process up to `batch_limit` un-summarized threads.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<BatchReport> {
        let threads = self
            .store
            .list_unsummarized_threads(self.batch_limit)
            .await
            .context("Failed to list un-summarized threads")?;

        if threads.is_empty() {
            debug!("No un-summarized threads");
            return Ok(BatchReport::default());
        }

        let estimate = estimate_batch_cost(&threads, &self.pricing, self.expected_output_tokens);
        info!(
            threads = estimate.threads,
            input_tokens = estimate.input_tokens,
            output_tokens = estimate.output_tokens,
            cost_usd = %format!("{:.4}", estimate.cost_usd),
            model = self.reasoning.model_name(),
            "Batch estimate"
        );

        let started_at = Utc::now();
        let started = Instant::now();
        let mut report = BatchReport::default();

        for thread in &threads {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match self.process_thread(thread).await {
                Ok(extracted) => {
                    report.processed += 1;
                    report.tasks_extracted += extracted;
                }
                Err(e) if is_quota_exhausted(&e) => {
                    warn!(
                        thread_id = %thread.id,
                        processed = report.processed,
                        "Reasoning quota exhausted, stopping batch: {:#}",
                        e
                    );
                    report.quota_exhausted = true;
                    break;
                }
                Err(e) => {
                    error!(thread_id = %thread.id, "Failed to process thread: {:#}", e);
                    report.failed += 1;
                }
            }
        }
        report.remaining = threads.len() - report.processed - report.failed;

        match self.store.usage_since(started_at).await {
            Ok(actual) => info!(
                calls = actual.calls,
                input_tokens = actual.input_tokens,
                output_tokens = actual.output_tokens,
                cost_usd = %format!("{:.4}", actual.cost_usd),
                "Batch usage"
            ),
            Err(e) => warn!("Failed to read usage ledger: {:#}", e),
        }

        info!(
            processed = report.processed,
            failed = report.failed,
            remaining = report.remaining,
            tasks_extracted = report.tasks_extracted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch finished"
        );
        self.events.emit_kind(EventKind::BatchFinished {
            processed: report.processed,
            failed: report.failed,
            quota_exhausted: report.quota_exhausted,
            remaining: report.remaining,
        });
        Ok(report)
    }

    /// Summarize one thread and extract its tasks. Returns the number of new
    /// tasks.
    async fn process_thread(&self, thread: &Thread) -> Result<usize> {
        let summary = self
            .reasoning
            .summarize_thread(thread)
            .await
            .with_context(|| format!("Failed to summarize thread {}", thread.id))?;

        let extracted = if summary.relevant_to_user {
            self.reasoning
                .extract_tasks(thread, &summary.summary)
                .await
                .with_context(|| format!("Failed to extract tasks from thread {}", thread.id))?
        } else {
            debug!(thread_id = %thread.id, "Thread not relevant to user, no extraction");
            Vec::new()
        };

        let inserted = insert_extracted(self.store.as_ref(), thread, &extracted).await?;
        self.store
            .set_thread_summary(thread.id, &summary.summary, summary.relevant_to_user, Utc::now())
            .await?;

        for task in &inserted {
            if let Err(e) = self.prioritizer.prioritize_one(task.id).await {
                warn!(task_id = %task.id, "Failed to score extracted task: {:#}", e);
            }
        }

        debug!(thread_id = %thread.id, tasks = inserted.len(), "Thread processed");
        Ok(inserted.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PrioritizerSettings;
    use crate::events::EventBus;
    use crate::llm::{InjectedFailure, MockReasoningProvider};
    use crate::store::models::{Effort, TaskSource, TaskStatus};
    use crate::store::MemoryStore;
    use chrono::Duration;
    use std::sync::atomic::Ordering;

    async fn store_with_threads(n: usize) -> (Arc<MemoryStore>, Vec<Thread>) {
        let base = Utc::now() - Duration::hours(n as i64 + 1);
        let mut store = MemoryStore::new();
        let mut threads = Vec::new();
        for i in 0..n {
            let mut thread = Thread::new(
                TaskSource::Email,
                format!("msg-{}", i),
                format!("Thread {}", i),
                format!("Hello\nTODO: follow up {}", i),
            );
            thread.created_at = base + Duration::minutes(i as i64);
            store = store.with_thread(thread.clone()).await;
            threads.push(thread);
        }
        (Arc::new(store), threads)
    }

    fn processor(store: Arc<MemoryStore>, reasoning: Arc<MockReasoningProvider>) -> BatchProcessor {
        let bus: Arc<EventBus> = Arc::new(EventBus::default());
        let prioritizer = Arc::new(Prioritizer::new(
            store.clone(),
            reasoning.clone(),
            None,
            bus.clone(),
            PrioritizerSettings::default(),
        ));
        BatchProcessor::new(store, reasoning, prioritizer, bus)
    }

    #[test]
    fn test_estimate_batch_cost() {
        let thread = Thread::new(TaskSource::Email, "m", "abcd", "efghijkl");
        let estimate = estimate_batch_cost(&[thread.clone(), thread], &LlmPricing::default(), 400);
        // 12 chars -> 3 tokens, + 350 overhead, 2 calls, 2 threads
        assert_eq!(estimate.input_tokens, 2 * 2 * 353);
        assert_eq!(estimate.output_tokens, 2 * 2 * 400);
        let expected = LlmPricing::default().cost(1412, 1600);
        assert!((estimate.cost_usd - expected).abs() < 1e-12);

        let empty = estimate_batch_cost(&[], &LlmPricing::default(), 400);
        assert_eq!(empty.input_tokens, 0);
        assert_eq!(empty.cost_usd, 0.0);
    }

    #[test]
    fn test_materialize() {
        let thread = Thread::new(TaskSource::Email, "msg-1", "Budget", "...");
        let mut extracted = ExtractedTask::titled("  Approve budget ");
        extracted.requester = Some("cfo@corp.com".into());
        extracted.impact = Some(9);
        extracted.effort = Some(Effort::Small);

        let task = materialize(&thread, &extracted);
        assert_eq!(task.title, "Approve budget");
        assert_eq!(task.source_id, "cfo@corp.com");
        assert_eq!(task.thread_id, Some(thread.id));
        assert_eq!(task.impact, 5);
        assert_eq!(task.effort, Effort::Small);
        assert!(task.auto_extracted);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.metadata_value().unwrap()["thread_subject"], "Budget");

        let task = materialize(&thread, &ExtractedTask::titled("x"));
        assert_eq!(task.source_id, "msg-1");
    }

    #[tokio::test]
    async fn test_batch_extracts_and_scores() {
        let (store, threads) = store_with_threads(3).await;
        let reasoning = Arc::new(MockReasoningProvider::new());
        let report = processor(store.clone(), reasoning).run(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.processed, 3);
        assert_eq!(report.tasks_extracted, 3);
        assert_eq!(report.remaining, 0);

        for thread in &threads {
            let stored = store.get_thread(thread.id).await.unwrap().unwrap();
            assert!(stored.summary.is_some());
            assert!(stored.relevant_to_user);
            assert_eq!(stored.task_count, 1);
            let tasks = store.tasks_for_thread(thread.id).await.unwrap();
            assert_eq!(tasks.len(), 1);
            assert!(tasks[0].score > 0);
            assert_eq!(stored.priority_score, tasks[0].score);
        }
        assert!(store.list_unsummarized_threads(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quota_stops_batch() {
        let (store, threads) = store_with_threads(10).await;
        let reasoning =
            Arc::new(MockReasoningProvider::new().fail_summarize_at(4, InjectedFailure::Quota));
        let report = processor(store.clone(), reasoning.clone())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert!(report.quota_exhausted);
        assert_eq!(report.processed, 3);
        assert_eq!(report.remaining, 7);
        assert_eq!(reasoning.summarize_calls.load(Ordering::SeqCst), 4);

        // The first three (oldest) threads are done, the rest untouched
        for (i, thread) in threads.iter().enumerate() {
            let stored = store.get_thread(thread.id).await.unwrap().unwrap();
            assert_eq!(stored.summary.is_some(), i < 3, "thread {}", i);
        }
    }

    #[tokio::test]
    async fn test_generic_failure_continues() {
        let (store, _) = store_with_threads(4).await;
        let reasoning = Arc::new(
            MockReasoningProvider::new().fail_summarize_at(2, InjectedFailure::Generic("bad json".into())),
        );
        let report = processor(store.clone(), reasoning.clone())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert!(!report.quota_exhausted);
        assert_eq!(report.processed, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.remaining, 0);
        assert_eq!(reasoning.summarize_calls.load(Ordering::SeqCst), 4);
        assert_eq!(store.list_unsummarized_threads(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_irrelevant_thread_yields_no_tasks() {
        let thread = Thread::new(TaskSource::Email, "m", "Newsletter", "   ");
        let store = Arc::new(MemoryStore::new().with_thread(thread.clone()).await);
        let reasoning = Arc::new(MockReasoningProvider::new());
        let report = processor(store.clone(), reasoning.clone())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.tasks_extracted, 0);
        assert_eq!(reasoning.extract_calls.load(Ordering::SeqCst), 0);
        let stored = store.get_thread(thread.id).await.unwrap().unwrap();
        assert!(stored.summary.is_some());
        assert!(!stored.relevant_to_user);
    }

    #[tokio::test]
    async fn test_cancelled_batch_does_nothing() {
        let (store, _) = store_with_threads(2).await;
        let reasoning = Arc::new(MockReasoningProvider::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = processor(store, reasoning.clone()).run(&cancel).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.processed, 0);
        assert_eq!(report.remaining, 2);
        assert_eq!(reasoning.summarize_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_insert_extracted_dedupes_titles() {
        let thread = Thread::new(TaskSource::Email, "m", "s", "c");
        let store = MemoryStore::new().with_thread(thread.clone()).await;
        let items = vec![
            ExtractedTask::titled("Call Bob"),
            ExtractedTask::titled("call bob"),
            ExtractedTask::titled(""),
        ];
        assert_eq!(insert_extracted(&store, &thread, &items).await.unwrap().len(), 1);
        assert!(insert_extracted(&store, &thread, &items).await.unwrap().is_empty());
    }
}
