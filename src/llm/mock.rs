//! Mock reasoning provider for tests
//!
//! Scripted, deterministic responses:
//! - alignment returns a fixed verdict (or a soft failure)
//! - summarization echoes the thread subject plus the content's `TODO:`
//!   lines, and can fail on chosen calls
//! - extraction turns every `TODO:` line of the summary it is given into a
//!   task

use super::error::LlmError;
use super::models::{AlignmentVerdict, ExtractedTask, ThreadSummary};
use super::traits::ReasoningProvider;
use crate::store::models::{StrategicPriorities, Task, Thread};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Failure to inject on a given summarize call
#[derive(Debug, Clone)]
pub enum InjectedFailure {
    Quota,
    Generic(String),
}

/// Deterministic reasoning provider for tests.
pub struct MockReasoningProvider {
    verdict: Mutex<Option<AlignmentVerdict>>,
    /// 1-based summarize call index -> failure
    summarize_failures: Mutex<HashMap<usize, InjectedFailure>>,
    pub alignment_calls: AtomicUsize,
    pub summarize_calls: AtomicUsize,
    pub extract_calls: AtomicUsize,
}

impl Default for MockReasoningProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockReasoningProvider {
    /// A provider whose alignment verdict is a score of 0 with no matches.
    pub fn new() -> Self {
        Self {
            verdict: Mutex::new(Some(AlignmentVerdict::default())),
            summarize_failures: Mutex::new(HashMap::new()),
            alignment_calls: AtomicUsize::new(0),
            summarize_calls: AtomicUsize::new(0),
            extract_calls: AtomicUsize::new(0),
        }
    }

    /// Return `verdict` from every alignment call
    pub fn with_verdict(self, verdict: AlignmentVerdict) -> Self {
        *self.verdict.lock().unwrap_or_else(|p| p.into_inner()) = Some(verdict);
        self
    }

    /// Make every alignment call fail
    pub fn failing_alignment(self) -> Self {
        *self.verdict.lock().unwrap_or_else(|p| p.into_inner()) = None;
        self
    }

    /// Fail the `call`-th summarize call (1-based)
    pub fn fail_summarize_at(self, call: usize, failure: InjectedFailure) -> Self {
        self.summarize_failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(call, failure);
        self
    }

    /// Deterministic extraction used by the mock: one task per `TODO:` line
    pub fn todo_lines(content: &str) -> Vec<ExtractedTask> {
        content
            .lines()
            .filter_map(|line| line.trim().strip_prefix("TODO:"))
            .map(|title| ExtractedTask::titled(title.trim()))
            .filter(|t| !t.title.is_empty())
            .collect()
    }
}

#[async_trait]
impl ReasoningProvider for MockReasoningProvider {
    async fn evaluate_alignment(
        &self,
        _task: &Task,
        _priorities: &StrategicPriorities,
    ) -> Result<AlignmentVerdict> {
        self.alignment_calls.fetch_add(1, Ordering::SeqCst);
        let verdict = self
            .verdict
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        verdict.ok_or_else(|| LlmError::Api {
            status: 500,
            message: "mock alignment failure".into(),
        }
        .into())
    }

    async fn summarize_thread(&self, thread: &Thread) -> Result<ThreadSummary> {
        let call = self.summarize_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let failure = self
            .summarize_failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&call)
            .cloned();
        match failure {
            Some(InjectedFailure::Quota) => {
                Err(LlmError::QuotaExhausted("mock daily budget reached".into()).into())
            }
            Some(InjectedFailure::Generic(msg)) => Err(anyhow::anyhow!(msg)),
            None => {
                let mut lines = vec![format!("Summary of {}", thread.subject)];
                lines.extend(
                    Self::todo_lines(&thread.content)
                        .into_iter()
                        .map(|t| format!("TODO: {}", t.title)),
                );
                Ok(ThreadSummary {
                    summary: lines.join("\n"),
                    relevant_to_user: !thread.content.trim().is_empty(),
                })
            }
        }
    }

    async fn extract_tasks(&self, _thread: &Thread, summary: &str) -> Result<Vec<ExtractedTask>> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::todo_lines(summary))
    }

    fn model_name(&self) -> &str {
        "mock-reasoning"
    }
}
