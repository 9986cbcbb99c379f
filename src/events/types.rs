//! Engine event types

use crate::store::models::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A task received a new score
    TaskScored {
        task_id: Uuid,
        score: u8,
        previous_score: u8,
        phase: String,
    },
    TaskStatusChanged {
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },
    /// A full prioritization pass finished
    PassCompleted {
        pass: u64,
        scored: usize,
        failed: usize,
        elapsed_ms: u64,
    },
    JobFinished {
        job: String,
        success: bool,
        elapsed_ms: u64,
    },
    /// A summarize+extract batch finished (possibly cut short by quota)
    BatchFinished {
        processed: usize,
        failed: usize,
        quota_exhausted: bool,
        remaining: usize,
    },
}

/// An event emitted by the engine for UI/API collaborators
///
/// Must be Clone for `tokio::sync::broadcast`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

impl EngineEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Short label for logging
    pub fn label(&self) -> &'static str {
        match self.kind {
            EventKind::TaskScored { .. } => "task_scored",
            EventKind::TaskStatusChanged { .. } => "task_status_changed",
            EventKind::PassCompleted { .. } => "pass_completed",
            EventKind::JobFinished { .. } => "job_finished",
            EventKind::BatchFinished { .. } => "batch_finished",
        }
    }
}

/// Sink for engine events.
///
/// Emitting is fire-and-forget: it never blocks and never fails.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: EngineEvent);

    fn emit_kind(&self, kind: EventKind) {
        self.emit(EngineEvent::new(kind));
    }
}
