//! Job orchestrator
//!
//! Runs named jobs on independent schedules. Every execution is wrapped with:
//! - overlap prevention: a tick that finds the previous run of the same job
//!   still active is skipped, never queued
//! - panic isolation: the job body runs in its own task; a panic is logged and
//!   counted as a failure, the process and the other jobs carry on
//! - start/stop/duration logging and a `JobFinished` event
//!
//! Trigger loops only sleep and dispatch; job bodies always run on spawned
//! tasks, so a slow job never delays another job's trigger.
//!
//! Shutdown cancels the shared token (trigger loops stop, running jobs observe
//! cancellation), then waits for tracked tasks up to a grace period.

use crate::events::{EventEmitter, EventKind};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// What a running job gets to see
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job: String,
    /// Cancelled on orchestrator shutdown
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: JobContext) -> Result<()>;
}

/// When a job fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed period, first tick one period after start
    Every(Duration),
    /// Once a day at a local wall-clock time
    DailyAt(NaiveTime),
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Every(period) => write!(f, "every {}s", period.as_secs()),
            Schedule::DailyAt(at) => write!(f, "daily at {}", at.format("%H:%M")),
        }
    }
}

/// Time from `now` until the next occurrence of `at` (tomorrow when `at`
/// has already passed today).
pub fn delay_until(at: NaiveTime, now: NaiveDateTime) -> Duration {
    let mut target = now.date().and_time(at);
    if target <= now {
        target += chrono::Duration::days(1);
    }
    (target - now).to_std().unwrap_or(Duration::ZERO)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    Failed,
    Panicked,
    /// Previous run still active
    Skipped,
}

/// Snapshot of one job for introspection
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub schedule: String,
    pub state: JobState,
    pub runs: u64,
    pub skips: u64,
    pub failures: u64,
    pub last_outcome: Option<JobOutcome>,
    pub last_started: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct JobStats {
    runs: u64,
    skips: u64,
    failures: u64,
    last_outcome: Option<JobOutcome>,
    last_started: Option<DateTime<Utc>>,
    last_duration_ms: Option<u64>,
    last_error: Option<String>,
}

struct JobEntry {
    job: Arc<dyn Job>,
    schedule: Schedule,
    running: AtomicBool,
    stats: Mutex<JobStats>,
}

impl JobEntry {
    fn stats(&self) -> std::sync::MutexGuard<'_, JobStats> {
        self.stats.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Handle on one dispatched run
#[derive(Debug)]
pub struct JobHandle {
    join: JoinHandle<JobOutcome>,
}

impl JobHandle {
    pub async fn wait(self) -> JobOutcome {
        // The runner itself never panics; the job body runs in a nested task.
        self.join.await.unwrap_or(JobOutcome::Panicked)
    }
}

struct Inner {
    jobs: BTreeMap<String, Arc<JobEntry>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    events: Arc<dyn EventEmitter>,
    grace: Duration,
}

pub struct JobOrchestratorBuilder {
    jobs: Vec<(Arc<dyn Job>, Schedule)>,
    cancel: CancellationToken,
    events: Arc<dyn EventEmitter>,
    grace: Duration,
}

impl JobOrchestratorBuilder {
    pub fn job(mut self, job: Arc<dyn Job>, schedule: Schedule) -> Self {
        self.jobs.push((job, schedule));
        self
    }

    /// How long shutdown waits for running jobs
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Errors on duplicate job names or zero periods.
    pub fn build(self) -> Result<JobOrchestrator> {
        let mut jobs = BTreeMap::new();
        for (job, schedule) in self.jobs {
            if let Schedule::Every(period) = schedule {
                if period.is_zero() {
                    anyhow::bail!("job '{}' has a zero period", job.name());
                }
            }
            let name = job.name().to_string();
            let entry = Arc::new(JobEntry {
                job,
                schedule,
                running: AtomicBool::new(false),
                stats: Mutex::new(JobStats::default()),
            });
            if jobs.insert(name.clone(), entry).is_some() {
                anyhow::bail!("job '{}' registered twice", name);
            }
        }
        Ok(JobOrchestrator {
            inner: Arc::new(Inner {
                jobs,
                cancel: self.cancel,
                tracker: TaskTracker::new(),
                events: self.events,
                grace: self.grace,
            }),
        })
    }
}

/// Owns the job table; constructed once at startup and passed to whoever
/// needs to inspect or trigger jobs.
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

impl JobOrchestrator {
    pub fn builder(cancel: CancellationToken, events: Arc<dyn EventEmitter>) -> JobOrchestratorBuilder {
        JobOrchestratorBuilder {
            jobs: Vec::new(),
            cancel,
            events,
            grace: Duration::from_secs(30),
        }
    }

    /// Start one trigger loop per job.
    pub fn start(&self) {
        for entry in self.inner.jobs.values() {
            let inner = self.inner.clone();
            let entry = entry.clone();
            info!(job = entry.job.name(), schedule = %entry.schedule, "Job scheduled");
            self.inner.tracker.spawn(trigger_loop(inner, entry));
        }
    }

    /// Run `name` once after `delay` (used for the warm-up sync at startup).
    pub fn run_after(&self, name: &str, delay: Duration) -> Result<()> {
        let entry = self.entry(name)?;
        let inner = self.inner.clone();
        self.inner.tracker.spawn(async move {
            tokio::select! {
                _ = inner.cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    info!(job = entry.job.name(), "Running startup job");
                    dispatch(&inner, &entry);
                }
            }
        });
        Ok(())
    }

    /// Trigger a job now under the same overlap and panic rules.
    ///
    /// `None` when the job was skipped because a run is still active.
    pub fn run_now(&self, name: &str) -> Result<Option<JobHandle>> {
        let entry = self.entry(name)?;
        Ok(dispatch(&self.inner, &entry))
    }

    pub fn statuses(&self) -> Vec<JobStatus> {
        self.inner
            .jobs
            .iter()
            .map(|(name, entry)| {
                let stats = entry.stats();
                JobStatus {
                    name: name.clone(),
                    schedule: entry.schedule.to_string(),
                    state: if entry.running.load(Ordering::SeqCst) {
                        JobState::Running
                    } else {
                        JobState::Idle
                    },
                    runs: stats.runs,
                    skips: stats.skips,
                    failures: stats.failures,
                    last_outcome: stats.last_outcome,
                    last_started: stats.last_started,
                    last_duration_ms: stats.last_duration_ms,
                    last_error: stats.last_error.clone(),
                }
            })
            .collect()
    }

    pub fn status(&self, name: &str) -> Option<JobStatus> {
        self.statuses().into_iter().find(|s| s.name == name)
    }

    pub fn job_names(&self) -> Vec<String> {
        self.inner.jobs.keys().cloned().collect()
    }

    /// Stop triggering, signal running jobs, and wait for them.
    ///
    /// Returns `false` when the grace period ran out first.
    pub async fn shutdown(&self) -> bool {
        info!("Job orchestrator shutting down");
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        match tokio::time::timeout(self.inner.grace, self.inner.tracker.wait()).await {
            Ok(()) => {
                info!("All jobs stopped");
                true
            }
            Err(_) => {
                warn!(
                    grace_secs = self.inner.grace.as_secs(),
                    still_running = self.inner.tracker.len(),
                    "Shutdown grace period elapsed with jobs still running"
                );
                false
            }
        }
    }

    fn entry(&self, name: &str) -> Result<Arc<JobEntry>> {
        self.inner
            .jobs
            .get(name)
            .cloned()
            .with_context(|| format!("unknown job '{}'", name))
    }
}

async fn trigger_loop(inner: Arc<Inner>, entry: Arc<JobEntry>) {
    match entry.schedule {
        Schedule::Every(period) => {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        dispatch(&inner, &entry);
                    }
                }
            }
        }
        Schedule::DailyAt(at) => loop {
            let delay = delay_until(at, Local::now().naive_local());
            debug!(job = entry.job.name(), delay_secs = delay.as_secs(), "Next daily run");
            tokio::select! {
                _ = inner.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {
                    dispatch(&inner, &entry);
                }
            }
        },
    }
    debug!(job = entry.job.name(), "Trigger loop stopped");
}

/// Start one run of `entry` unless one is already active.
fn dispatch(inner: &Arc<Inner>, entry: &Arc<JobEntry>) -> Option<JobHandle> {
    let name = entry.job.name().to_string();

    if entry
        .running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        let mut stats = entry.stats();
        stats.skips += 1;
        stats.last_outcome = Some(JobOutcome::Skipped);
        info!(job = %name, "Previous run still active, skipping");
        return None;
    }

    if inner.cancel.is_cancelled() {
        entry.running.store(false, Ordering::SeqCst);
        return None;
    }

    let inner = inner.clone();
    let entry = entry.clone();
    let tracker = inner.tracker.clone();
    let join = tracker.spawn(async move {
        let started_at = Utc::now();
        let started = Instant::now();
        entry.stats().last_started = Some(started_at);
        info!(job = %name, "Job started");

        let ctx = JobContext {
            job: name.clone(),
            cancel: inner.cancel.child_token(),
        };
        let job = entry.job.clone();
        let body = tokio::spawn(async move { job.run(ctx).await });

        let (outcome, error_text) = match body.await {
            Ok(Ok(())) => (JobOutcome::Succeeded, None),
            Ok(Err(e)) => {
                error!(job = %name, "Job failed: {:#}", e);
                (JobOutcome::Failed, Some(format!("{:#}", e)))
            }
            Err(join_err) if join_err.is_panic() => {
                error!(job = %name, "Job panicked: {}", join_err);
                (JobOutcome::Panicked, Some(format!("panicked: {}", join_err)))
            }
            Err(join_err) => {
                warn!(job = %name, "Job aborted: {}", join_err);
                (JobOutcome::Failed, Some(join_err.to_string()))
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        {
            let mut stats = entry.stats();
            stats.runs += 1;
            if outcome != JobOutcome::Succeeded {
                stats.failures += 1;
            }
            stats.last_outcome = Some(outcome);
            stats.last_duration_ms = Some(elapsed_ms);
            stats.last_error = error_text;
        }
        entry.running.store(false, Ordering::SeqCst);

        info!(job = %name, outcome = ?outcome, elapsed_ms, "Job finished");
        inner.events.emit_kind(EventKind::JobFinished {
            job: name,
            success: outcome == JobOutcome::Succeeded,
            elapsed_ms,
        });
        outcome
    });

    Some(JobHandle { join })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct CountingJob {
        name: &'static str,
        runs: AtomicUsize,
    }

    impl CountingJob {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                runs: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &str {
            self.name
        }
        async fn run(&self, _ctx: JobContext) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Blocks until released (or cancelled)
    struct GatedJob {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl Job for GatedJob {
        fn name(&self) -> &str {
            "gated"
        }
        async fn run(&self, ctx: JobContext) -> Result<()> {
            tokio::select! {
                _ = self.gate.notified() => Ok(()),
                _ = ctx.cancel.cancelled() => Ok(()),
            }
        }
    }

    struct PanickingJob;

    #[async_trait]
    impl Job for PanickingJob {
        fn name(&self) -> &str {
            "panicky"
        }
        async fn run(&self, _ctx: JobContext) -> Result<()> {
            panic!("boom");
        }
    }

    struct FailingJob;

    #[async_trait]
    impl Job for FailingJob {
        fn name(&self) -> &str {
            "failing"
        }
        async fn run(&self, _ctx: JobContext) -> Result<()> {
            anyhow::bail!("source offline")
        }
    }

    fn builder() -> JobOrchestratorBuilder {
        JobOrchestrator::builder(CancellationToken::new(), Arc::new(EventBus::default()))
    }

    #[test]
    fn test_delay_until() {
        let at = NaiveTime::from_hms_opt(3, 30, 0).unwrap();
        let now = chrono::NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(1, 0, 0)
            .unwrap();
        assert_eq!(delay_until(at, now), Duration::from_secs(150 * 60));

        let later = now.date().and_hms_opt(3, 30, 0).unwrap();
        assert_eq!(delay_until(at, later), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_schedule_display() {
        assert_eq!(Schedule::Every(Duration::from_secs(900)).to_string(), "every 900s");
        let at = NaiveTime::from_hms_opt(3, 30, 0).unwrap();
        assert_eq!(Schedule::DailyAt(at).to_string(), "daily at 03:30");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = builder()
            .job(CountingJob::new("sync"), Schedule::Every(Duration::from_secs(1)))
            .job(CountingJob::new("sync"), Schedule::Every(Duration::from_secs(2)))
            .build();
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_ticks() {
        let job = CountingJob::new("sync");
        let orchestrator = builder()
            .job(job.clone(), Schedule::Every(Duration::from_secs(60)))
            .build()
            .unwrap();
        orchestrator.start();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(155)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 3);
        assert_eq!(orchestrator.status("sync").unwrap().runs, 3);

        assert!(orchestrator.shutdown().await);
    }

    #[tokio::test]
    async fn test_overlapping_run_is_skipped() {
        let gate = Arc::new(Notify::new());
        let orchestrator = builder()
            .job(
                Arc::new(GatedJob { gate: gate.clone() }),
                Schedule::Every(Duration::from_secs(3600)),
            )
            .build()
            .unwrap();

        let first = orchestrator.run_now("gated").unwrap().expect("first run dispatched");
        assert!(orchestrator.run_now("gated").unwrap().is_none());

        let status = orchestrator.status("gated").unwrap();
        assert_eq!(status.state, JobState::Running);
        assert_eq!(status.skips, 1);

        gate.notify_one();
        assert_eq!(first.wait().await, JobOutcome::Succeeded);

        let status = orchestrator.status("gated").unwrap();
        assert_eq!(status.state, JobState::Idle);
        assert_eq!(status.runs, 1);

        // Free again
        let again = orchestrator.run_now("gated").unwrap().expect("dispatched");
        gate.notify_one();
        assert_eq!(again.wait().await, JobOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let counter = CountingJob::new("counter");
        let orchestrator = builder()
            .job(Arc::new(PanickingJob), Schedule::Every(Duration::from_secs(60)))
            .job(counter.clone(), Schedule::Every(Duration::from_secs(60)))
            .build()
            .unwrap();

        let outcome = orchestrator.run_now("panicky").unwrap().unwrap().wait().await;
        assert_eq!(outcome, JobOutcome::Panicked);

        let status = orchestrator.status("panicky").unwrap();
        assert_eq!(status.failures, 1);
        assert_eq!(status.state, JobState::Idle);
        assert!(status.last_error.unwrap().contains("panicked"));

        // The panicking job can run again, and other jobs are unaffected
        assert!(orchestrator.run_now("panicky").unwrap().is_some());
        let outcome = orchestrator.run_now("counter").unwrap().unwrap().wait().await;
        assert_eq!(outcome, JobOutcome::Succeeded);
        assert_eq!(counter.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_recorded() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let orchestrator = JobOrchestrator::builder(CancellationToken::new(), Arc::new(bus))
            .job(Arc::new(FailingJob), Schedule::Every(Duration::from_secs(60)))
            .build()
            .unwrap();

        let outcome = orchestrator.run_now("failing").unwrap().unwrap().wait().await;
        assert_eq!(outcome, JobOutcome::Failed);
        let status = orchestrator.status("failing").unwrap();
        assert_eq!(status.last_error.as_deref(), Some("source offline"));

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event.kind,
            EventKind::JobFinished { success: false, .. }
        ));
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let orchestrator = builder().build().unwrap();
        assert!(orchestrator.run_now("nope").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_run_and_shutdown() {
        let job = CountingJob::new("sync");
        let orchestrator = builder()
            .job(job.clone(), Schedule::Every(Duration::from_secs(900)))
            .build()
            .unwrap();
        orchestrator.start();
        orchestrator.run_after("sync", Duration::from_secs(5)).unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);

        assert!(orchestrator.shutdown().await);
        // No more ticks after shutdown
        tokio::time::sleep(Duration::from_secs(2000)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_running_job() {
        let gate = Arc::new(Notify::new());
        let orchestrator = builder()
            .job(
                Arc::new(GatedJob { gate }),
                Schedule::Every(Duration::from_secs(3600)),
            )
            .build()
            .unwrap();
        let handle = orchestrator.run_now("gated").unwrap().unwrap();

        // The gated job observes cancellation and returns
        assert!(orchestrator.shutdown().await);
        assert_eq!(handle.wait().await, JobOutcome::Succeeded);
        assert!(orchestrator.run_now("gated").unwrap().is_none());
    }
}
