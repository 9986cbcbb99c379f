//! Adaptive Prioritizer - daemon and maintenance commands
//!
//! State lives in the JSON snapshot named by `storage.path`: every command
//! loads it on start and saves it before exiting.

use adaptive_prioritizer::embeddings::{EmbeddingProvider, HttpEmbeddingProvider};
use adaptive_prioritizer::engine::{Engine, PrioritizerSettings};
use adaptive_prioritizer::events::EventBus;
use adaptive_prioritizer::jobs::{self, Job, JobContext, SyncJob, SYNC_JOB};
use adaptive_prioritizer::llm::{HttpReasoningProvider, ReasoningProvider};
use adaptive_prioritizer::sources::{DataSource, InboxSource};
use adaptive_prioritizer::store::models::{Priority, PriorityKind};
use adaptive_prioritizer::store::{EngineStore, MemoryStore};
use adaptive_prioritizer::Config;
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "prioritizer")]
#[command(about = "Adaptive task prioritization engine")]
struct Cli {
    /// YAML config file (defaults to ./prioritizer.yaml)
    #[arg(short, long, global = true, env = "PRIORITIZER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until Ctrl-C
    Run,

    /// Pull every configured data source once
    Sync,

    /// Print the highest-ranked open tasks
    Top {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Print the current blending phase and feedback count
    Phase,

    /// Run one full prioritization pass and exit
    Prioritize,

    /// Delete auto-extracted tasks and rebuild them from stored summaries
    Reprocess,

    /// Mark a task completed
    Complete { id: Uuid },

    /// Reopen a completed task
    Reopen { id: Uuid },

    /// Hide a task from the ranking for a number of hours
    Snooze {
        id: Uuid,
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },

    /// Thumbs up (1) or down (-1) on a task's current score
    Vote {
        id: Uuid,
        #[arg(allow_hyphen_values = true)]
        vote: i32,
        #[arg(long)]
        reason: Option<String>,
        /// Score the task should have had (defaults to its current score)
        #[arg(long)]
        adjusted: Option<u8>,
    },

    /// Manage strategic priorities
    #[command(subcommand)]
    Priority(PriorityCommand),
}

#[derive(Subcommand)]
enum PriorityCommand {
    /// List priorities, optionally of one kind
    List {
        #[arg(long)]
        kind: Option<PriorityKind>,
    },

    /// Add a priority (okr, focus-area, stakeholder or project)
    Add {
        kind: PriorityKind,
        text: String,
        #[arg(long)]
        notes: Option<String>,
    },

    /// Change a priority's text or notes
    Edit {
        id: Uuid,
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,adaptive_prioritizer=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_yaml_and_env(cli.config.as_deref())?;

    let state_path = config.storage.path();
    let memory = Arc::new(MemoryStore::load(&state_path).await?);
    let store: Arc<dyn EngineStore> = memory.clone();
    let events = Arc::new(EventBus::default());
    let embedder = HttpEmbeddingProvider::from_config(&config.embedding)?
        .map(|p| Arc::new(p) as Arc<dyn EmbeddingProvider>);
    if embedder.is_none() {
        tracing::warn!("Embedding capability disabled, K-NN scoring will always fall back");
    }
    let reasoning = reasoning_provider(&config, store.clone())?;
    let sources = data_sources(&config, store.clone());

    let cancel = CancellationToken::new();
    let (engine, worker_join) = Engine::start(
        store.clone(),
        reasoning.clone(),
        embedder,
        sources.clone(),
        events.clone(),
        PrioritizerSettings::from_config(&config),
        cancel.clone(),
    );

    let result = match cli.command {
        Commands::Run => {
            let daemon = Daemon {
                config: &config,
                engine: &engine,
                memory: memory.clone(),
                reasoning,
                sources,
                events,
            };
            daemon.run(cancel.clone()).await
        }
        Commands::Sync => {
            let ctx = JobContext {
                job: SYNC_JOB.into(),
                cancel: cancel.clone(),
            };
            SyncJob::new(sources).run(ctx).await
        }
        Commands::Top { limit } => print_top(store.as_ref(), limit).await,
        Commands::Phase => {
            let (phase, feedback_count) = engine.current_phase().await?;
            println!("{} ({} feedback records)", phase, feedback_count);
            Ok(())
        }
        Commands::Prioritize => {
            let summary = engine.prioritize_all().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Commands::Reprocess => {
            let report =
                jobs::reprocess_ai_tasks(&store, &reasoning, engine.worker(), &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Complete { id } => engine.complete_task(id).await?.wait().await.map(|_| ()),
        Commands::Reopen { id } => engine.uncomplete_task(id).await?.wait().await.map(|_| ()),
        Commands::Snooze { id, hours } => {
            let until = Utc::now() + ChronoDuration::hours(hours.max(1));
            engine.snooze_task(id, until).await?.wait().await?;
            println!("Snoozed {} until {}", id, until.to_rfc3339());
            Ok(())
        }
        Commands::Vote {
            id,
            vote,
            reason,
            adjusted,
        } => {
            let task = store
                .get_task(id)
                .await?
                .with_context(|| format!("Task {} not found", id))?;
            let feedback = engine
                .record_feedback(id, vote, reason, task.score, adjusted.unwrap_or(task.score))
                .await?;
            println!("{}", serde_json::to_string_pretty(&feedback)?);
            Ok(())
        }
        Commands::Priority(command) => manage_priorities(store.as_ref(), command).await,
    };

    cancel.cancel();
    if let Err(e) = worker_join.await {
        tracing::warn!("Prioritization worker ended abnormally: {}", e);
    }
    memory
        .persist(&state_path)
        .await
        .with_context(|| format!("Failed to save state to {}", state_path.display()))?;
    result
}

fn reasoning_provider(
    config: &Config,
    store: Arc<dyn EngineStore>,
) -> Result<Arc<dyn ReasoningProvider>> {
    let provider = HttpReasoningProvider::from_config(&config.llm)?
        .context("the reasoning capability is required: set llm.url or LLM_URL")?;
    tracing::info!(model = provider.model_name(), "Reasoning capability configured");
    Ok(Arc::new(provider.with_ledger(store)))
}

fn data_sources(config: &Config, store: Arc<dyn EngineStore>) -> Vec<Arc<dyn DataSource>> {
    let mut sources: Vec<Arc<dyn DataSource>> = Vec::new();
    if let Some(dir) = config.inbox.dir() {
        tracing::info!(dir = %dir.display(), source = ?config.inbox.source, "Inbox source configured");
        sources.push(Arc::new(InboxSource::new(
            config.inbox.name.clone(),
            config.inbox.source,
            dir,
            store,
        )));
    }
    if sources.is_empty() {
        tracing::warn!("No data sources configured, set inbox.dir or INBOX_DIR to ingest work");
    }
    sources
}

async fn print_top(store: &dyn EngineStore, limit: usize) -> Result<()> {
    let tasks = store.ranked_tasks(Utc::now(), limit).await?;
    if tasks.is_empty() {
        println!("No open tasks");
    }
    for (rank, task) in tasks.iter().enumerate() {
        let due = task
            .due_at
            .map(|d| format!("  due {}", d.format("%Y-%m-%d %H:%M")))
            .unwrap_or_default();
        println!(
            "{:>3}. [{:>3}] {}  ({}, {}){}",
            rank + 1,
            task.score,
            task.title,
            task.source.label(),
            task.id,
            due
        );
    }
    Ok(())
}

async fn manage_priorities(store: &dyn EngineStore, command: PriorityCommand) -> Result<()> {
    match command {
        PriorityCommand::List { kind } => {
            for p in store.list_priorities(kind).await? {
                let notes = p.notes.as_deref().map(|n| format!("  ({})", n)).unwrap_or_default();
                println!("{}  {:?}  {}{}", p.id, p.kind, p.text, notes);
            }
        }
        PriorityCommand::Add { kind, text, notes } => {
            let mut priority = Priority::new(kind, text.trim());
            priority.notes = notes;
            store.insert_priority(&priority).await?;
            println!("Added {}", priority.id);
        }
        PriorityCommand::Edit { id, text, notes } => {
            let mut priority = store
                .list_priorities(None)
                .await?
                .into_iter()
                .find(|p| p.id == id)
                .with_context(|| format!("Priority {} not found", id))?;
            if let Some(text) = text {
                priority.text = text.trim().to_string();
            }
            if notes.is_some() {
                priority.notes = notes;
            }
            store.update_priority(&priority).await?;
            println!("Updated {}", priority.id);
        }
    }
    Ok(())
}

struct Daemon<'a> {
    config: &'a Config,
    engine: &'a Engine,
    memory: Arc<MemoryStore>,
    reasoning: Arc<dyn ReasoningProvider>,
    sources: Vec<Arc<dyn DataSource>>,
    events: Arc<EventBus>,
}

impl Daemon<'_> {
    async fn run(self, cancel: CancellationToken) -> Result<()> {
        let orchestrator = jobs::standard_orchestrator(
            self.config,
            self.engine,
            self.memory.clone(),
            Some(self.memory),
            self.reasoning,
            self.sources,
            self.events,
            cancel,
        )?;
        orchestrator.start();
        orchestrator.run_after(
            SYNC_JOB,
            Duration::from_secs(self.config.scheduler.startup_sync_delay_secs),
        )?;
        tracing::info!(jobs = ?orchestrator.job_names(), "Prioritizer running, Ctrl-C to stop");

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        tracing::info!("Shutdown requested");

        if !orchestrator.shutdown().await {
            tracing::warn!("Exiting with jobs still running");
        }
        Ok(())
    }
}
