//! Task status transitions
//!
//! Complete, uncomplete and snooze each:
//! 1. persist the change locally
//! 2. mirror completion changes to the originating source (best-effort)
//! 3. queue exactly one full prioritization pass
//!
//! A failed mirror is a warning and never blocks the local transition.

use super::worker::{PassHandle, PrioritizationWorker};
use crate::events::{EventEmitter, EventKind};
use crate::sources::DataSource;
use crate::store::models::{StatusChange, Task, TaskStatus};
use crate::store::EngineStore;
use crate::EngineError;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct TaskLifecycle {
    store: Arc<dyn EngineStore>,
    sources: Vec<Arc<dyn DataSource>>,
    worker: PrioritizationWorker,
    events: Arc<dyn EventEmitter>,
}

impl TaskLifecycle {
    pub fn new(
        store: Arc<dyn EngineStore>,
        sources: Vec<Arc<dyn DataSource>>,
        worker: PrioritizationWorker,
        events: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            store,
            sources,
            worker,
            events,
        }
    }

    /// Mark a task completed, remembering the status it leaves.
    pub async fn complete_task(&self, task_id: Uuid) -> Result<PassHandle> {
        let task = self.load(task_id).await?;

        if task.status == TaskStatus::Completed {
            debug!(task_id = %task_id, "Task already completed");
        } else {
            self.transition(task, StatusChange::complete).await?;
        }

        self.worker.request_pass().await
    }

    /// Reopen a completed task, restoring its prior status (pending when
    /// unknown).
    pub async fn uncomplete_task(&self, task_id: Uuid) -> Result<PassHandle> {
        let task = self.load(task_id).await?;

        if task.status != TaskStatus::Completed {
            debug!(task_id = %task_id, status = ?task.status, "Task is not completed");
        } else {
            self.transition(task, StatusChange::reopen).await?;
        }

        self.worker.request_pass().await
    }

    /// Hide a task from ranked listings until `until`.
    pub async fn snooze_task(&self, task_id: Uuid, until: DateTime<Utc>) -> Result<PassHandle> {
        self.load(task_id).await?;
        self.store.set_snooze(task_id, Some(until), Utc::now()).await?;
        info!(task_id = %task_id, until = %until, "Task snoozed");

        self.worker.request_pass().await
    }

    /// Write the transition only if nobody changed the status since `task`
    /// was read, then announce and mirror it.
    async fn transition(
        &self,
        mut task: Task,
        change: impl FnOnce(&Task, DateTime<Utc>) -> StatusChange,
    ) -> Result<()> {
        let change = change(&task, Utc::now());
        if !self.store.transition_status(&change).await? {
            debug!(
                task_id = %task.id,
                from = ?change.from,
                "Status changed concurrently, transition skipped"
            );
            return Ok(());
        }
        change.apply(&mut task);
        self.status_changed(&task, change.from);
        self.mirror(&task, change.to == TaskStatus::Completed).await;
        Ok(())
    }

    async fn load(&self, task_id: Uuid) -> Result<Task> {
        Ok(self
            .store
            .get_task(task_id)
            .await?
            .ok_or(EngineError::TaskNotFound(task_id))?)
    }

    fn status_changed(&self, task: &Task, from: TaskStatus) {
        info!(task_id = %task.id, from = ?from, to = ?task.status, "Task status changed");
        self.events.emit_kind(EventKind::TaskStatusChanged {
            task_id: task.id,
            from,
            to: task.status,
        });
    }

    async fn mirror(&self, task: &Task, completed: bool) {
        if !task.source.is_external() {
            return;
        }
        let Some(source) = self.sources.iter().find(|s| s.source() == task.source) else {
            debug!(task_id = %task.id, source = task.source.label(), "No data source to mirror to");
            return;
        };
        if let Err(e) = source.mirror_status(task, completed).await {
            warn!(
                task_id = %task.id,
                source = source.name(),
                "Failed to mirror status change: {:#}",
                e
            );
        }
    }
}
