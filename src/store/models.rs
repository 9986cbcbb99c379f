//! Engine data model: tasks, threads, strategic priorities, embeddings,
//! feedback and the usage ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Task
// ============================================================================

/// External system a task or thread originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    Email,
    Calendar,
    Drive,
    Messaging,
    TaskList,
    Manual,
}

impl TaskSource {
    /// Human-readable label used in embedding inputs and logs
    pub fn label(&self) -> &'static str {
        match self {
            TaskSource::Email => "email",
            TaskSource::Calendar => "calendar event",
            TaskSource::Drive => "document",
            TaskSource::Messaging => "chat message",
            TaskSource::TaskList => "task list",
            TaskSource::Manual => "manual entry",
        }
    }

    /// Whether completion state should be mirrored back to the source system
    pub fn is_external(&self) -> bool {
        !matches!(self, TaskSource::Manual)
    }
}

/// Status of a task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    /// Statuses that are rescored by a full prioritization pass
    pub const OPEN: [TaskStatus; 2] = [TaskStatus::Pending, TaskStatus::InProgress];

    pub fn is_open(&self) -> bool {
        !matches!(self, TaskStatus::Completed)
    }
}

/// Estimated effort, a closed set with fixed scoring factors
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Effort {
    Small,
    #[default]
    Medium,
    Large,
}

impl Effort {
    pub fn factor(&self) -> f64 {
        match self {
            Effort::Small => 0.5,
            Effort::Medium => 1.0,
            Effort::Large => 1.5,
        }
    }
}

/// Who is waiting on the task, a closed set with fixed scoring weights
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StakeholderClass {
    #[default]
    None,
    Internal,
    External,
    Executive,
}

impl StakeholderClass {
    pub fn weight(&self) -> f64 {
        match self {
            StakeholderClass::None => 0.0,
            StakeholderClass::Internal => 1.0,
            StakeholderClass::External => 1.5,
            StakeholderClass::Executive => 2.0,
        }
    }
}

/// Strategic priorities a task was judged to serve
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedPriorities {
    #[serde(default)]
    pub okrs: Vec<String>,
    #[serde(default)]
    pub focus_areas: Vec<String>,
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub key_stakeholder: bool,
}

impl MatchedPriorities {
    pub fn is_empty(&self) -> bool {
        self.okrs.is_empty()
            && self.focus_areas.is_empty()
            && self.projects.is_empty()
            && !self.key_stakeholder
    }

    /// All matched priority names, in okr / focus area / project order
    pub fn names(&self) -> Vec<&str> {
        self.okrs
            .iter()
            .chain(self.focus_areas.iter())
            .chain(self.projects.iter())
            .map(String::as_str)
            .collect()
    }
}

/// A unit of pending work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub source: TaskSource,
    /// Source-local identifier (message id, sender address, event id...)
    pub source_id: String,
    /// Conversation this task was extracted from, if any
    #[serde(default)]
    pub thread_id: Option<Uuid>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub project: Option<String>,
    /// 1-5, 0 means unset
    #[serde(default)]
    pub impact: u8,
    /// 1-5, 0 means unset; derived from `due_at` whenever present
    #[serde(default)]
    pub urgency: u8,
    #[serde(default)]
    pub effort: Effort,
    #[serde(default)]
    pub stakeholder: StakeholderClass,
    pub status: TaskStatus,
    /// Priority score, 0-100
    #[serde(default)]
    pub score: u8,
    /// Raw JSON of [`MatchedPriorities`], as persisted
    #[serde(default)]
    pub matched_priorities: Option<String>,
    /// Raw JSON metadata from the source system
    #[serde(default)]
    pub metadata: Option<String>,
    /// Created by AI extraction (and therefore rebuildable by reprocessing)
    #[serde(default)]
    pub auto_extracted: bool,
    #[serde(default)]
    pub snoozed_until: Option<DateTime<Utc>>,
    /// Status to restore when a completed task is reopened
    #[serde(default)]
    pub reopen_status: Option<TaskStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending task with unset scoring inputs
    pub fn new(source: TaskSource, source_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source,
            source_id: source_id.into(),
            thread_id: None,
            title: title.into(),
            description: String::new(),
            due_at: None,
            project: None,
            impact: 0,
            urgency: 0,
            effort: Effort::default(),
            stakeholder: StakeholderClass::default(),
            status: TaskStatus::Pending,
            score: 0,
            matched_priorities: None,
            metadata: None,
            auto_extracted: false,
            snoozed_until: None,
            reopen_status: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Decode the stored matched priorities.
    ///
    /// Malformed JSON is treated as "no matches" and logged; it never fails
    /// the caller.
    pub fn matches(&self) -> MatchedPriorities {
        let Some(raw) = self.matched_priorities.as_deref() else {
            return MatchedPriorities::default();
        };
        if raw.trim().is_empty() {
            return MatchedPriorities::default();
        }
        match serde_json::from_str(raw) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(task_id = %self.id, "Malformed matched_priorities JSON: {}", e);
                MatchedPriorities::default()
            }
        }
    }

    /// Store matched priorities as JSON
    pub fn set_matches(&mut self, matches: &MatchedPriorities) {
        self.matched_priorities = serde_json::to_string(matches).ok();
    }

    /// Decode the stored metadata object, treating malformed JSON as absent
    pub fn metadata_value(&self) -> Option<serde_json::Value> {
        let raw = self.metadata.as_deref()?;
        match serde_json::from_str(raw) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(task_id = %self.id, "Malformed task metadata JSON: {}", e);
                None
            }
        }
    }

    pub fn is_snoozed(&self, now: DateTime<Utc>) -> bool {
        self.snoozed_until.is_some_and(|until| until > now)
    }

    /// Short description of where the task came from, e.g.
    /// `"email from ceo@example.com (project: Atlas)"`
    pub fn source_descriptor(&self) -> String {
        let mut out = format!("{} from {}", self.source.label(), self.source_id);
        if let Some(project) = self.project.as_deref().filter(|p| !p.is_empty()) {
            out.push_str(&format!(" (project: {})", project));
        }
        out
    }
}

/// The fields a scoring pass owns, written without touching status or
/// snooze state changed concurrently by the user
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreUpdate {
    pub task_id: Uuid,
    pub score: u8,
    pub urgency: u8,
    pub matched_priorities: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ScoreUpdate {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            score: task.score,
            urgency: task.urgency,
            matched_priorities: task.matched_priorities.clone(),
            updated_at: task.updated_at,
        }
    }
}

/// The fields a data source owns, refreshed on re-sync without touching
/// status, snooze or scoring state
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDetails {
    pub task_id: Uuid,
    pub title: String,
    pub description: String,
    pub due_at: Option<DateTime<Utc>>,
    pub project: Option<String>,
    pub impact: u8,
    pub effort: Effort,
    pub stakeholder: StakeholderClass,
    pub updated_at: DateTime<Utc>,
}

impl TaskDetails {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            title: task.title.clone(),
            description: task.description.clone(),
            due_at: task.due_at,
            project: task.project.clone(),
            impact: task.impact,
            effort: task.effort,
            stakeholder: task.stakeholder,
            updated_at: task.updated_at,
        }
    }

    /// Whether `task` already carries these details
    pub fn matches(&self, task: &Task) -> bool {
        task.title == self.title
            && task.description == self.description
            && task.due_at == self.due_at
            && task.project == self.project
            && task.impact == self.impact
            && task.effort == self.effort
            && task.stakeholder == self.stakeholder
    }
}

/// A status transition, applied only while the task still has status `from`
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub task_id: Uuid,
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub reopen_status: Option<TaskStatus>,
    pub updated_at: DateTime<Utc>,
}

impl StatusChange {
    /// Complete `task`, remembering the status it leaves
    pub fn complete(task: &Task, now: DateTime<Utc>) -> Self {
        Self {
            task_id: task.id,
            from: task.status,
            to: TaskStatus::Completed,
            completed_at: Some(now),
            reopen_status: Some(task.status),
            updated_at: now,
        }
    }

    /// Reopen a completed `task` with its prior status (pending when unknown)
    pub fn reopen(task: &Task, now: DateTime<Utc>) -> Self {
        let restored = task
            .reopen_status
            .filter(|s| s.is_open())
            .unwrap_or(TaskStatus::Pending);
        Self {
            task_id: task.id,
            from: task.status,
            to: restored,
            completed_at: None,
            reopen_status: None,
            updated_at: now,
        }
    }

    /// Write the transition's fields onto `task`
    pub fn apply(&self, task: &mut Task) {
        task.status = self.to;
        task.completed_at = self.completed_at;
        task.reopen_status = self.reopen_status;
        task.updated_at = self.updated_at;
    }
}

// ============================================================================
// Thread
// ============================================================================

/// A source conversation (email thread, chat channel excerpt, event)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: Uuid,
    pub source: TaskSource,
    pub external_id: String,
    pub subject: String,
    pub content: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub relevant_to_user: bool,
    #[serde(default)]
    pub task_count: u32,
    /// Max score over the thread's open tasks
    #[serde(default)]
    pub priority_score: u8,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub summarized_at: Option<DateTime<Utc>>,
}

impl Thread {
    pub fn new(
        source: TaskSource,
        external_id: impl Into<String>,
        subject: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            external_id: external_id.into(),
            subject: subject.into(),
            content: content.into(),
            summary: None,
            relevant_to_user: false,
            task_count: 0,
            priority_score: 0,
            created_at: Utc::now(),
            summarized_at: None,
        }
    }
}

// ============================================================================
// Strategic priorities
// ============================================================================

/// Kind of strategic anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityKind {
    Okr,
    FocusArea,
    Stakeholder,
    Project,
}

impl std::str::FromStr for PriorityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "okr" => Ok(PriorityKind::Okr),
            "focus_area" | "focus" => Ok(PriorityKind::FocusArea),
            "stakeholder" => Ok(PriorityKind::Stakeholder),
            "project" => Ok(PriorityKind::Project),
            other => Err(format!(
                "unknown priority kind '{}': expected okr, focus-area, stakeholder or project",
                other
            )),
        }
    }
}

/// A strategic anchor the user cares about
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Priority {
    pub id: Uuid,
    pub kind: PriorityKind,
    pub text: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Priority {
    pub fn new(kind: PriorityKind, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            text: text.into(),
            notes: None,
            created_at: Utc::now(),
        }
    }
}

/// Resolved strategic priorities, grouped by kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategicPriorities {
    #[serde(default)]
    pub okrs: Vec<String>,
    #[serde(default)]
    pub focus_areas: Vec<String>,
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub key_stakeholders: Vec<String>,
}

impl StrategicPriorities {
    pub fn is_empty(&self) -> bool {
        self.okrs.is_empty()
            && self.focus_areas.is_empty()
            && self.projects.is_empty()
            && self.key_stakeholders.is_empty()
    }

    /// Group stored priority records by kind
    pub fn from_records(records: &[Priority]) -> Self {
        let mut out = Self::default();
        for p in records {
            let bucket = match p.kind {
                PriorityKind::Okr => &mut out.okrs,
                PriorityKind::FocusArea => &mut out.focus_areas,
                PriorityKind::Project => &mut out.projects,
                PriorityKind::Stakeholder => &mut out.key_stakeholders,
            };
            bucket.push(p.text.clone());
        }
        out
    }
}

// ============================================================================
// Embeddings
// ============================================================================

/// The live embedding of a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub task_id: Uuid,
    pub vector: Vec<f32>,
    /// SHA-256 of the task content the vector was generated from
    pub content_hash: String,
    pub model: String,
    pub generated_at: DateTime<Utc>,
}

/// An embedded task that carries feedback, as seen by the K-NN scan
#[derive(Debug, Clone)]
pub struct LabeledEmbedding {
    pub task_id: Uuid,
    pub vector: Vec<f32>,
    /// Model that produced `vector`
    pub model: String,
    /// Mean vote over the task's feedback records, in [-1, 1]
    pub vote: f64,
    pub feedback_count: usize,
}

// ============================================================================
// Feedback
// ============================================================================

/// Thumbs-up / thumbs-down on a shown score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum Vote {
    Up,
    Down,
}

impl Vote {
    pub fn value(&self) -> f64 {
        match self {
            Vote::Up => 1.0,
            Vote::Down => -1.0,
        }
    }
}

impl From<Vote> for i8 {
    fn from(v: Vote) -> Self {
        match v {
            Vote::Up => 1,
            Vote::Down => -1,
        }
    }
}

impl TryFrom<i8> for Vote {
    type Error = crate::EngineError;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Vote::Up),
            -1 => Ok(Vote::Down),
            other => Err(crate::EngineError::InvalidVote(i32::from(other))),
        }
    }
}

impl TryFrom<i32> for Vote {
    type Error = crate::EngineError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Vote::Up),
            -1 => Ok(Vote::Down),
            other => Err(crate::EngineError::InvalidVote(other)),
        }
    }
}

/// An immutable user vote on a previously computed score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: Uuid,
    pub task_id: Uuid,
    pub vote: Vote,
    #[serde(default)]
    pub reason: Option<String>,
    pub original_score: u8,
    pub adjusted_score: u8,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Usage ledger
// ============================================================================

/// One billed call to the reasoning capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub operation: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub recorded_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(operation: impl Into<String>, input_tokens: u64, output_tokens: u64, cost_usd: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation: operation.into(),
            input_tokens,
            output_tokens,
            cost_usd,
            recorded_at: Utc::now(),
        }
    }
}

/// Aggregate over a window of the usage ledger
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}
