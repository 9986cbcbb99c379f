//! Adaptive Prioritizer
//!
//! Ranks a user's pending work by a score that blends:
//! - a deterministic rubric (impact, urgency, effort, stakeholder)
//! - an LLM-judged strategic alignment signal
//! - a K-nearest-neighbor signal learned from thumbs-up/down feedback
//!
//! and keeps the ranking fresh with a background job orchestrator.

pub mod embeddings;
pub mod engine;
pub mod events;
pub mod jobs;
pub mod learning;
pub mod llm;
pub mod scoring;
pub mod sources;
pub mod store;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub use store::models::StrategicPriorities;
use crate::store::models::TaskSource;

/// Engine errors callers may need to tell apart.
///
/// Travels inside `anyhow::Error`; recover with `downcast_ref::<EngineError>()`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    #[error("thread {0} not found")]
    ThreadNotFound(Uuid),

    #[error("invalid vote {0}: expected 1 or -1")]
    InvalidVote(i32),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub scheduler: SchedulerConfig,
    pub scoring: ScoringConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    /// Static defaults used when the priorities repository is empty
    pub priorities: StrategicPriorities,
    pub cleanup: CleanupConfig,
    pub storage: StorageConfig,
    pub inbox: InboxConfig,
}

/// Job schedule section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub sync_interval_secs: u64,
    pub summarize_interval_secs: u64,
    pub prioritize_interval_secs: u64,
    /// Daily wall-clock time of the cleanup job, `HH:MM` local time
    pub cleanup_at: String,
    pub startup_sync_delay_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 900,
            summarize_interval_secs: 1800,
            prioritize_interval_secs: 3600,
            cleanup_at: "03:30".into(),
            startup_sync_delay_secs: 5,
            shutdown_grace_secs: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn cleanup_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(self.cleanup_at.trim(), "%H:%M")
            .with_context(|| format!("Invalid scheduler.cleanup_at '{}', expected HH:MM", self.cleanup_at))
    }
}

/// K-NN and phase thresholds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub knn_k: usize,
    pub hybrid_threshold: u64,
    pub knn_threshold: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            knn_k: 5,
            hybrid_threshold: 20,
            knn_threshold: 100,
        }
    }
}

/// Embedding capability section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible `/v1/embeddings` URL; empty or "disabled" turns K-NN off
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub dimensions: usize,
    pub max_attempts: u32,
    /// First retry delay; doubles on each further attempt
    pub retry_backoff_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434/v1/embeddings".into(),
            model: "nomic-embed-text".into(),
            api_key: None,
            dimensions: 768,
            max_attempts: 3,
            retry_backoff_ms: 500,
        }
    }
}

impl EmbeddingConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Reasoning capability section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible `/v1/chat/completions` URL
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub input_cost_per_mtok: f64,
    pub output_cost_per_mtok: f64,
    /// Max threads per summarize+extract batch
    pub batch_limit: usize,
    /// Output tokens assumed per call when estimating a batch
    pub expected_output_tokens: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434/v1/chat/completions".into(),
            model: "llama3.1".into(),
            api_key: None,
            input_cost_per_mtok: 3.0,
            output_cost_per_mtok: 15.0,
            batch_limit: 50,
            expected_output_tokens: 400,
        }
    }
}

impl LlmConfig {
    pub fn pricing(&self) -> llm::LlmPricing {
        llm::LlmPricing {
            input_cost_per_mtok: self.input_cost_per_mtok,
            output_cost_per_mtok: self.output_cost_per_mtok,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub completed_retention_days: i64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            completed_retention_days: 30,
        }
    }
}

/// Local state section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON snapshot the store is loaded from and saved to
    pub path: String,
    /// How often the daemon saves a snapshot; 0 saves only on shutdown
    pub snapshot_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "prioritizer-state.json".into(),
            snapshot_interval_secs: 300,
        }
    }
}

impl StorageConfig {
    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }
}

/// Drop-folder source section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InboxConfig {
    /// Directory watched for JSON batches; empty disables the source
    pub dir: String,
    pub name: String,
    /// Source the ingested tasks are attributed to
    pub source: TaskSource,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            dir: String::new(),
            name: "inbox".into(),
            source: TaskSource::TaskList,
        }
    }
}

impl InboxConfig {
    pub fn dir(&self) -> Option<PathBuf> {
        let dir = self.dir.trim();
        (!dir.is_empty()).then(|| PathBuf::from(dir))
    }
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub scoring: ScoringConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub priorities: StrategicPriorities,
    pub cleanup: CleanupConfig,
    pub storage: StorageConfig,
    pub inbox: InboxConfig,
}

const DEFAULT_CONFIG_FILE: &str = "prioritizer.yaml";

impl Config {
    /// Equivalent to `from_yaml_and_env(None)`.
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "prioritizer.yaml" in CWD. A missing or
    /// unparsable file falls back to defaults.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        let yaml = Self::load_yaml(yaml_path);

        let mut embedding = yaml.embedding;
        embedding.url = std::env::var("EMBEDDING_URL").unwrap_or(embedding.url);
        embedding.model = std::env::var("EMBEDDING_MODEL").unwrap_or(embedding.model);
        if let Ok(key) = std::env::var("EMBEDDING_API_KEY") {
            embedding.api_key = Some(key);
        }
        embedding.dimensions = env_parse("EMBEDDING_DIMENSIONS", embedding.dimensions);

        let mut llm = yaml.llm;
        llm.url = std::env::var("LLM_URL").unwrap_or(llm.url);
        llm.model = std::env::var("LLM_MODEL").unwrap_or(llm.model);
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            llm.api_key = Some(key);
        }

        let mut scoring = yaml.scoring;
        scoring.knn_k = env_parse("KNN_K", scoring.knn_k);

        let mut scheduler = yaml.scheduler;
        scheduler.sync_interval_secs = env_parse("SYNC_INTERVAL_SECS", scheduler.sync_interval_secs);
        scheduler.prioritize_interval_secs =
            env_parse("PRIORITIZE_INTERVAL_SECS", scheduler.prioritize_interval_secs);

        let mut storage = yaml.storage;
        storage.path = std::env::var("PRIORITIZER_STATE").unwrap_or(storage.path);

        let mut inbox = yaml.inbox;
        inbox.dir = std::env::var("INBOX_DIR").unwrap_or(inbox.dir);

        let config = Self {
            scheduler,
            scoring,
            embedding,
            llm,
            priorities: yaml.priorities,
            cleanup: yaml.cleanup,
            storage,
            inbox,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        self.scheduler.cleanup_time()?;
        if self.scoring.hybrid_threshold >= self.scoring.knn_threshold {
            anyhow::bail!(
                "scoring.hybrid_threshold ({}) must be below scoring.knn_threshold ({})",
                self.scoring.hybrid_threshold,
                self.scoring.knn_threshold
            );
        }
        if self.embedding.dimensions == 0 {
            anyhow::bail!("embedding.dimensions must be positive");
        }
        if self.storage.path.trim().is_empty() {
            anyhow::bail!("storage.path must not be empty");
        }
        Ok(())
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }
}

/// Parse `var` when set; keep `current` when unset or unparsable.
fn env_parse<T: FromStr>(var: &str, current: T) -> T {
    match std::env::var(var) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!("Ignoring unparsable {}={:?}", var, raw);
                current
            }
        },
        Err(_) => current,
    }
}

// ============================================================================
// Tests
// ============================================================================
