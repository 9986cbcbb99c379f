//! JSON snapshots of a `MemoryStore`
//!
//! Lets the CLI and the daemon keep their state between runs without a
//! database. A snapshot is written to `<path>.tmp` first and renamed over the
//! previous one, so a crash mid-write leaves the last good snapshot intact.

use super::memory::MemoryStore;
use super::models::*;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything a `MemoryStore` holds, as written to disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub threads: Vec<Thread>,
    #[serde(default)]
    pub priorities: Vec<Priority>,
    #[serde(default)]
    pub embeddings: Vec<Embedding>,
    #[serde(default)]
    pub feedback: Vec<Feedback>,
    #[serde(default)]
    pub usage: Vec<UsageRecord>,
}

impl StoreSnapshot {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.threads.is_empty() && self.priorities.is_empty()
    }
}

impl MemoryStore {
    /// Copy the current contents out. Takes every lock in the store's lock
    /// order, so the copy is consistent across collections.
    pub async fn snapshot(&self) -> StoreSnapshot {
        let tasks = self.tasks.read().await;
        let threads = self.threads.read().await;
        let embeddings = self.embeddings.read().await;
        let feedback = self.feedback.read().await;
        let priorities = self.priorities.read().await;
        let usage = self.usage.read().await;

        StoreSnapshot {
            version: SNAPSHOT_VERSION,
            tasks: tasks.values().cloned().collect(),
            threads: threads.values().cloned().collect(),
            priorities: priorities.values().cloned().collect(),
            embeddings: embeddings.values().cloned().collect(),
            feedback: feedback.clone(),
            usage: usage.clone(),
        }
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            tasks: RwLock::new(snapshot.tasks.into_iter().map(|t| (t.id, t)).collect()),
            threads: RwLock::new(snapshot.threads.into_iter().map(|t| (t.id, t)).collect()),
            priorities: RwLock::new(snapshot.priorities.into_iter().map(|p| (p.id, p)).collect()),
            embeddings: RwLock::new(
                snapshot
                    .embeddings
                    .into_iter()
                    .map(|e| (e.task_id, e))
                    .collect::<HashMap<_, _>>(),
            ),
            feedback: RwLock::new(snapshot.feedback),
            usage: RwLock::new(snapshot.usage),
        }
    }

    /// Load the snapshot at `path`; a missing file is an empty store.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No state snapshot yet, starting empty");
                return Ok(Self::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        let snapshot: StoreSnapshot = serde_json::from_slice(&raw)
            .with_context(|| format!("Failed to parse state snapshot {}", path.display()))?;
        if snapshot.version > SNAPSHOT_VERSION {
            anyhow::bail!(
                "State snapshot {} has version {}, newest supported is {}",
                path.display(),
                snapshot.version,
                SNAPSHOT_VERSION
            );
        }

        info!(
            path = %path.display(),
            tasks = snapshot.tasks.len(),
            threads = snapshot.threads.len(),
            feedback = snapshot.feedback.len(),
            "State snapshot loaded"
        );
        Ok(Self::from_snapshot(snapshot))
    }

    /// Write the current contents to `path` atomically.
    pub async fn persist(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot().await;
        let data = serde_json::to_vec_pretty(&snapshot).context("Failed to serialize state")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, &data)
            .await
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        tokio::fs::rename(&temp_path, path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        debug!(
            path = %path.display(),
            tasks = snapshot.tasks.len(),
            bytes = data.len(),
            "State snapshot written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EngineStore;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::load(&dir.path().join("state.json")).await.unwrap();
        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let mut task = Task::new(TaskSource::Email, "m-1", "Renew lease");
        task.score = 64;
        let thread = Thread::new(TaskSource::Email, "m-1", "Lease", "TODO: renew");
        let priority = Priority::new(PriorityKind::Okr, "Cut office costs");
        let feedback = Feedback {
            id: Uuid::new_v4(),
            task_id: task.id,
            vote: Vote::Down,
            reason: Some("not mine".into()),
            original_score: 64,
            adjusted_score: 40,
            created_at: Utc::now(),
        };

        let store = MemoryStore::new()
            .with_task(task.clone())
            .await
            .with_thread(thread.clone())
            .await
            .with_priority(priority.clone())
            .await
            .with_feedback(feedback)
            .await;
        store.persist(&path).await.unwrap();
        assert!(!path.with_extension("tmp").exists());

        let reloaded = MemoryStore::load(&path).await.unwrap();
        assert_eq!(reloaded.get_task(task.id).await.unwrap().unwrap().score, 64);
        assert!(reloaded.get_thread(thread.id).await.unwrap().is_some());
        assert_eq!(reloaded.list_priorities(None).await.unwrap()[0].text, "Cut office costs");
        let votes = reloaded.feedback_for_task(task.id).await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].vote, Vote::Down);
    }

    #[tokio::test]
    async fn test_newer_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"version": 99}"#).unwrap();

        let err = MemoryStore::load(&path).await.err().unwrap();
        assert!(format!("{:#}", err).contains("version 99"));
    }
}
