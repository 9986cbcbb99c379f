//! Recording data source for tests

use super::traits::{DataSource, SyncReport};
use crate::store::models::{Task, TaskSource, Thread};
use crate::store::EngineStore;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Data source that records every call.
///
/// Optionally seeds threads into a store on its first sync and can be told
/// to fail syncs or mirrors.
pub struct RecordingSource {
    name: String,
    source: TaskSource,
    seed: Mutex<Option<(Arc<dyn EngineStore>, Vec<Thread>)>>,
    fail_sync: bool,
    fail_mirror: bool,
    sync_delay: Duration,
    pub syncs: AtomicUsize,
    mirrored: Mutex<Vec<(Uuid, bool)>>,
}

impl RecordingSource {
    pub fn new(name: impl Into<String>, source: TaskSource) -> Self {
        Self {
            name: name.into(),
            source,
            seed: Mutex::new(None),
            fail_sync: false,
            fail_mirror: false,
            sync_delay: Duration::ZERO,
            syncs: AtomicUsize::new(0),
            mirrored: Mutex::new(Vec::new()),
        }
    }

    /// Insert `threads` into `store` on the first sync
    pub fn with_threads(self, store: Arc<dyn EngineStore>, threads: Vec<Thread>) -> Self {
        *self.seed.lock().unwrap_or_else(|p| p.into_inner()) = Some((store, threads));
        self
    }

    pub fn failing_sync(mut self) -> Self {
        self.fail_sync = true;
        self
    }

    pub fn failing_mirror(mut self) -> Self {
        self.fail_mirror = true;
        self
    }

    /// Make every sync take `delay` (or until cancelled)
    pub fn with_sync_delay(mut self, delay: Duration) -> Self {
        self.sync_delay = delay;
        self
    }

    /// `(task_id, completed)` for every mirror call, in order
    pub fn mirrored(&self) -> Vec<(Uuid, bool)> {
        self.mirrored
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl DataSource for RecordingSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> TaskSource {
        self.source
    }

    async fn sync(&self, cancel: CancellationToken) -> Result<SyncReport> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        if !self.sync_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(SyncReport::default()),
                _ = tokio::time::sleep(self.sync_delay) => {}
            }
        }
        if self.fail_sync {
            anyhow::bail!("{} unreachable", self.name);
        }

        let seed = self.seed.lock().unwrap_or_else(|p| p.into_inner()).take();
        let mut report = SyncReport::default();
        if let Some((store, threads)) = seed {
            for thread in threads {
                if cancel.is_cancelled() {
                    break;
                }
                store.insert_thread(&thread).await?;
                report.threads_added += 1;
            }
        }
        Ok(report)
    }

    async fn mirror_status(&self, task: &Task, completed: bool) -> Result<()> {
        self.mirrored
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((task.id, completed));
        if self.fail_mirror {
            anyhow::bail!("{} rejected status update", self.name);
        }
        Ok(())
    }
}
