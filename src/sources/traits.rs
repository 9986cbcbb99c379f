//! Data source trait
//!
//! A data source is an external system tasks and conversations come from
//! (mail, calendar, drive, chat, task lists). Fetching and parsing live behind
//! this seam; the engine only needs to trigger a sync and to mirror status
//! changes back.

use crate::store::models::{Task, TaskSource};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Outcome of one sync run of a single source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub threads_added: usize,
    pub tasks_added: usize,
    pub tasks_updated: usize,
}

impl SyncReport {
    pub fn merge(&mut self, other: SyncReport) {
        self.threads_added += other.threads_added;
        self.tasks_added += other.tasks_added;
        self.tasks_updated += other.tasks_updated;
    }
}

#[async_trait]
pub trait DataSource: Send + Sync {
    /// Display name, used in logs
    fn name(&self) -> &str;

    /// Which tasks this source owns
    fn source(&self) -> TaskSource;

    /// Pull new conversations and tasks into the store.
    ///
    /// Implementations check `cancel` between units of work and commit each
    /// unit before starting the next.
    async fn sync(&self, cancel: CancellationToken) -> Result<SyncReport>;

    /// Reflect a local completion (`completed == true`) or reopening in the
    /// originating system.
    async fn mirror_status(&self, task: &Task, completed: bool) -> Result<()>;
}
