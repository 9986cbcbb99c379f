//! Drop-folder data source
//!
//! Connectors that run out of process (mail exporters, calendar dumps,
//! scripts) write JSON batches into an inbox directory. Each sync ingests
//! every `*.json` file in name order and moves it to `done/`. A file that
//! fails stays in place and is retried on the next sync; items it already
//! committed are deduplicated by their source identity.
//!
//! ```json
//! {
//!   "threads": [{ "external_id": "msg-41", "subject": "Q3 plan", "content": "..." }],
//!   "tasks": [{ "id": "todo-7", "title": "Send Q3 plan", "thread": "msg-41", "impact": 4 }]
//! }
//! ```
//!
//! Completions and reopenings are mirrored as JSON lines appended to
//! `status.jsonl` in the inbox directory.

use super::traits::{DataSource, SyncReport};
use crate::store::models::{Effort, StakeholderClass, Task, TaskDetails, TaskSource, Thread};
use crate::store::EngineStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const DONE_DIR: &str = "done";
const STATUS_LOG: &str = "status.jsonl";

#[derive(Debug, Default, Deserialize)]
struct InboxBatch {
    #[serde(default)]
    threads: Vec<InboxThread>,
    #[serde(default)]
    tasks: Vec<InboxTask>,
}

#[derive(Debug, Deserialize)]
struct InboxThread {
    external_id: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    received_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct InboxTask {
    /// Identity of the task in the originating system
    id: String,
    title: String,
    #[serde(default)]
    description: String,
    /// `external_id` of the thread the task belongs to
    #[serde(default)]
    thread: Option<String>,
    #[serde(default)]
    due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    impact: u8,
    #[serde(default)]
    effort: Effort,
    #[serde(default)]
    stakeholder: StakeholderClass,
}

impl InboxTask {
    fn details(&self, task_id: Uuid, now: DateTime<Utc>) -> TaskDetails {
        TaskDetails {
            task_id,
            title: self.title.trim().to_string(),
            description: self.description.clone(),
            due_at: self.due_at,
            project: self.project.clone(),
            impact: self.impact.min(5),
            effort: self.effort,
            stakeholder: self.stakeholder,
            updated_at: now,
        }
    }
}

#[derive(Serialize)]
struct StatusLine<'a> {
    source_id: &'a str,
    task_id: Uuid,
    title: &'a str,
    completed: bool,
    at: DateTime<Utc>,
}

pub struct InboxSource {
    name: String,
    source: TaskSource,
    dir: PathBuf,
    store: Arc<dyn EngineStore>,
}

impl InboxSource {
    pub fn new(
        name: impl Into<String>,
        source: TaskSource,
        dir: impl Into<PathBuf>,
        store: Arc<dyn EngineStore>,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            dir: dir.into(),
            store,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `*.json` files waiting in the inbox, in name order
    async fn pending_files(&self) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create inbox {}", self.dir.display()))?;

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to read inbox {}", self.dir.display()))?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            let json = path.extension().is_some_and(|ext| ext == "json");
            if json && !hidden && entry.file_type().await?.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    async fn ingest_file(&self, path: &Path) -> Result<SyncReport> {
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let batch: InboxBatch = serde_json::from_slice(&raw)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        let now = Utc::now();
        let mut report = SyncReport::default();

        for item in &batch.threads {
            let known = self
                .store
                .find_thread_by_external(self.source, &item.external_id)
                .await?;
            if known.is_some() {
                continue;
            }
            let mut thread =
                Thread::new(self.source, &item.external_id, &item.subject, &item.content);
            thread.created_at = item.received_at.unwrap_or(now);
            self.store.insert_thread(&thread).await?;
            report.threads_added += 1;
        }

        for item in &batch.tasks {
            if item.title.trim().is_empty() {
                warn!(source = %self.name, id = %item.id, "Skipping inbox task without a title");
                continue;
            }
            match self.store.find_task_by_source(self.source, &item.id).await? {
                Some(existing) => {
                    let details = item.details(existing.id, now);
                    if !details.matches(&existing) {
                        self.store.update_task_details(&details).await?;
                        report.tasks_updated += 1;
                    }
                }
                None => {
                    let task = self.materialize(item, now).await?;
                    self.store.insert_task(&task).await?;
                    report.tasks_added += 1;
                }
            }
        }

        Ok(report)
    }

    async fn materialize(&self, item: &InboxTask, now: DateTime<Utc>) -> Result<Task> {
        let mut task = Task::new(self.source, &item.id, item.title.trim());
        let details = item.details(task.id, now);
        task.description = details.description;
        task.due_at = details.due_at;
        task.project = details.project;
        task.impact = details.impact;
        task.effort = details.effort;
        task.stakeholder = details.stakeholder;
        if let Some(external_id) = &item.thread {
            task.thread_id = self
                .store
                .find_thread_by_external(self.source, external_id)
                .await?
                .map(|t| t.id);
        }
        Ok(task)
    }

    async fn archive(&self, path: &Path) -> Result<()> {
        let done = self.dir.join(DONE_DIR);
        tokio::fs::create_dir_all(&done)
            .await
            .with_context(|| format!("Failed to create {}", done.display()))?;
        let Some(file_name) = path.file_name() else {
            return Ok(());
        };
        tokio::fs::rename(path, done.join(file_name))
            .await
            .with_context(|| format!("Failed to move {} to {}", path.display(), done.display()))
    }
}

#[async_trait]
impl DataSource for InboxSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> TaskSource {
        self.source
    }

    async fn sync(&self, cancel: CancellationToken) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        for path in self.pending_files().await? {
            if cancel.is_cancelled() {
                debug!(source = %self.name, "Inbox sync cancelled");
                break;
            }
            match self.ingest_file(&path).await {
                Ok(file_report) => {
                    info!(
                        source = %self.name,
                        file = %path.display(),
                        threads_added = file_report.threads_added,
                        tasks_added = file_report.tasks_added,
                        tasks_updated = file_report.tasks_updated,
                        "Inbox file ingested"
                    );
                    report.merge(file_report);
                    self.archive(&path).await?;
                }
                Err(e) => warn!(source = %self.name, "Inbox file left for retry: {:#}", e),
            }
        }
        Ok(report)
    }

    async fn mirror_status(&self, task: &Task, completed: bool) -> Result<()> {
        let line = StatusLine {
            source_id: &task.source_id,
            task_id: task.id,
            title: &task.title,
            completed,
            at: Utc::now(),
        };
        let mut json = serde_json::to_vec(&line)?;
        json.push(b'\n');

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(STATUS_LOG);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(&json).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn write(dir: &Path, name: &str, json: &str) {
        std::fs::write(dir.join(name), json).unwrap();
    }

    fn inbox(dir: &Path) -> (Arc<MemoryStore>, InboxSource) {
        let store = Arc::new(MemoryStore::new());
        let source = InboxSource::new("drop", TaskSource::TaskList, dir, store.clone());
        (store, source)
    }

    #[tokio::test]
    async fn test_sync_ingests_and_archives() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "001.json",
            r#"{
                "threads": [{"external_id": "msg-1", "subject": "Q3 plan", "content": "TODO: draft"}],
                "tasks": [{"id": "t-1", "title": "Send Q3 plan", "thread": "msg-1", "impact": 4}]
            }"#,
        );
        let (store, source) = inbox(dir.path());

        let report = source.sync(CancellationToken::new()).await.unwrap();
        assert_eq!(
            report,
            SyncReport {
                threads_added: 1,
                tasks_added: 1,
                tasks_updated: 0
            }
        );
        assert!(dir.path().join("done").join("001.json").exists());
        assert!(!dir.path().join("001.json").exists());

        let task = store
            .find_task_by_source(TaskSource::TaskList, "t-1")
            .await
            .unwrap()
            .unwrap();
        let thread = store
            .find_thread_by_external(TaskSource::TaskList, "msg-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.thread_id, Some(thread.id));
        assert_eq!(task.impact, 4);
    }

    #[tokio::test]
    async fn test_resync_updates_details_but_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let (store, source) = inbox(dir.path());
        write(dir.path(), "001.json", r#"{"tasks": [{"id": "t-1", "title": "Draft memo"}]}"#);
        source.sync(CancellationToken::new()).await.unwrap();

        let task = store
            .find_task_by_source(TaskSource::TaskList, "t-1")
            .await
            .unwrap()
            .unwrap();
        store
            .set_snooze(task.id, Some(Utc::now() + chrono::Duration::days(1)), Utc::now())
            .await
            .unwrap();

        write(
            dir.path(),
            "002.json",
            r#"{"tasks": [{"id": "t-1", "title": "Draft memo v2", "impact": 5},
                          {"id": "t-1", "title": "Draft memo v2", "impact": 5}]}"#,
        );
        let report = source.sync(CancellationToken::new()).await.unwrap();
        assert_eq!(report.tasks_added, 0);
        assert_eq!(report.tasks_updated, 1);

        let stored = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Draft memo v2");
        assert_eq!(stored.impact, 5);
        assert!(stored.snoozed_until.is_some());
        assert_eq!(store.list_tasks_by_status(&[stored.status]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_file_is_left_for_retry() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "001.json", "{ not json");
        write(dir.path(), "002.json", r#"{"threads": [{"external_id": "m"}]}"#);
        write(dir.path(), "notes.txt", "ignored");
        let (_store, source) = inbox(dir.path());

        let report = source.sync(CancellationToken::new()).await.unwrap();
        assert_eq!(report.threads_added, 1);
        assert!(dir.path().join("001.json").exists());
        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join("done").join("002.json").exists());
    }

    #[tokio::test]
    async fn test_mirror_appends_status_lines() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, source) = inbox(dir.path());
        let task = Task::new(TaskSource::TaskList, "t-9", "File taxes");

        source.mirror_status(&task, true).await.unwrap();
        source.mirror_status(&task, false).await.unwrap();

        let log = std::fs::read_to_string(dir.path().join(STATUS_LOG)).unwrap();
        let lines: Vec<serde_json::Value> = log
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["source_id"], "t-9");
        assert_eq!(lines[0]["completed"], true);
        assert_eq!(lines[1]["completed"], false);
    }
}
