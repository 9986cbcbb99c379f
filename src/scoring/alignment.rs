//! Strategic alignment delegate
//!
//! Wraps the reasoning capability's alignment judgement with:
//! - a two-tier priority lookup (stored priorities, else configured defaults)
//! - fail-soft degradation (score 0, no matches) when the capability errors
//! - a local, case-insensitive key-stakeholder check against the task's
//!   source identifier, OR-ed into the verdict

use crate::llm::ReasoningProvider;
use crate::store::models::{MatchedPriorities, StrategicPriorities, Task};
use crate::store::EngineStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of an alignment evaluation. Never an error: failures degrade.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignmentOutcome {
    /// 0-5
    pub score: f64,
    pub matches: MatchedPriorities,
    /// Set when the capability failed and the outcome is the fallback
    pub error: Option<String>,
}

pub struct AlignmentDelegate {
    reasoning: Arc<dyn ReasoningProvider>,
    store: Arc<dyn EngineStore>,
    defaults: StrategicPriorities,
}

impl AlignmentDelegate {
    /// `defaults` are the statically configured priorities used when the
    /// repository holds none; their key stakeholders always take part in the
    /// local stakeholder check.
    pub fn new(
        reasoning: Arc<dyn ReasoningProvider>,
        store: Arc<dyn EngineStore>,
        defaults: StrategicPriorities,
    ) -> Self {
        Self {
            reasoning,
            store,
            defaults,
        }
    }

    /// Priorities from the repository, or the configured defaults when the
    /// repository is empty or unreadable.
    pub async fn resolve_priorities(&self) -> StrategicPriorities {
        match self.store.list_priorities(None).await {
            Ok(records) if !records.is_empty() => StrategicPriorities::from_records(&records),
            Ok(_) => {
                debug!("No stored priorities, using configured defaults");
                self.defaults.clone()
            }
            Err(e) => {
                warn!("Failed to load priorities, using configured defaults: {}", e);
                self.defaults.clone()
            }
        }
    }

    /// Judge `task` against `priorities`.
    pub async fn evaluate(&self, task: &Task, priorities: &StrategicPriorities) -> AlignmentOutcome {
        let mut outcome = match self.reasoning.evaluate_alignment(task, priorities).await {
            Ok(verdict) => AlignmentOutcome {
                score: if verdict.score.is_finite() {
                    verdict.score.clamp(0.0, 5.0)
                } else {
                    0.0
                },
                matches: verdict.matches,
                error: None,
            },
            Err(e) => {
                warn!(task_id = %task.id, "Alignment evaluation failed, scoring with 0: {:#}", e);
                AlignmentOutcome {
                    score: 0.0,
                    matches: MatchedPriorities::default(),
                    error: Some(format!("{:#}", e)),
                }
            }
        };

        if !outcome.matches.key_stakeholder {
            let names = priorities
                .key_stakeholders
                .iter()
                .chain(self.defaults.key_stakeholders.iter());
            outcome.matches.key_stakeholder = matches_key_stakeholder(&task.source_id, names);
        }

        outcome
    }
}

/// Case-insensitive substring match of any stakeholder name in `source_id`
pub fn matches_key_stakeholder<'a, I>(source_id: &str, names: I) -> bool
where
    I: IntoIterator<Item = &'a String>,
{
    let haystack = source_id.to_lowercase();
    names
        .into_iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .any(|n| haystack.contains(&n.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{AlignmentVerdict, MockReasoningProvider};
    use crate::store::models::{Priority, PriorityKind, TaskSource};
    use crate::store::MemoryStore;

    fn defaults() -> StrategicPriorities {
        StrategicPriorities {
            okrs: vec!["Default OKR".into()],
            focus_areas: vec![],
            projects: vec![],
            key_stakeholders: vec!["Dana Reyes".into()],
        }
    }

    #[test]
    fn test_key_stakeholder_substring_case_insensitive() {
        let names = vec!["dana".to_string(), "  ".to_string()];
        assert!(matches_key_stakeholder("DANA.Reyes@corp.com", &names));
        assert!(!matches_key_stakeholder("sam@corp.com", &names));
        assert!(!matches_key_stakeholder("anything", &Vec::<String>::new()));
    }

    #[tokio::test]
    async fn test_resolve_prefers_stored_priorities() {
        let store = MemoryStore::new()
            .with_priority(Priority::new(PriorityKind::Okr, "Stored OKR"))
            .await;
        let delegate = AlignmentDelegate::new(
            Arc::new(MockReasoningProvider::new()),
            Arc::new(store),
            defaults(),
        );
        let resolved = delegate.resolve_priorities().await;
        assert_eq!(resolved.okrs, vec!["Stored OKR"]);
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_defaults() {
        let delegate = AlignmentDelegate::new(
            Arc::new(MockReasoningProvider::new()),
            Arc::new(MemoryStore::new()),
            defaults(),
        );
        assert_eq!(delegate.resolve_priorities().await, defaults());
    }

    #[tokio::test]
    async fn test_failure_degrades_to_zero() {
        let delegate = AlignmentDelegate::new(
            Arc::new(MockReasoningProvider::new().failing_alignment()),
            Arc::new(MemoryStore::new()),
            StrategicPriorities::default(),
        );
        let task = Task::new(TaskSource::Email, "sam@corp.com", "Lunch");
        let outcome = delegate.evaluate(&task, &StrategicPriorities::default()).await;
        assert_eq!(outcome.score, 0.0);
        assert!(outcome.matches.is_empty());
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_local_stakeholder_check_survives_failure() {
        let delegate = AlignmentDelegate::new(
            Arc::new(MockReasoningProvider::new().failing_alignment()),
            Arc::new(MemoryStore::new()),
            defaults(),
        );
        let task = Task::new(TaskSource::Email, "dana reyes <dana@corp.com>", "Review");
        let outcome = delegate.evaluate(&task, &StrategicPriorities::default()).await;
        assert_eq!(outcome.score, 0.0);
        assert!(outcome.matches.key_stakeholder);
    }

    #[tokio::test]
    async fn test_verdict_passes_through() {
        let verdict = AlignmentVerdict {
            score: 4.5,
            matches: MatchedPriorities {
                okrs: vec!["Grow ARR".into()],
                ..Default::default()
            },
            rationale: None,
        };
        let delegate = AlignmentDelegate::new(
            Arc::new(MockReasoningProvider::new().with_verdict(verdict)),
            Arc::new(MemoryStore::new()),
            StrategicPriorities::default(),
        );
        let mut priorities = StrategicPriorities::default();
        priorities.key_stakeholders.push("board".into());
        let task = Task::new(TaskSource::Email, "board@corp.com", "Q3 deck");
        let outcome = delegate.evaluate(&task, &priorities).await;
        assert_eq!(outcome.score, 4.5);
        assert_eq!(outcome.matches.okrs, vec!["Grow ARR"]);
        assert!(outcome.matches.key_stakeholder);
        assert!(outcome.error.is_none());
    }
}
