//! Deterministic priority formula
//!
//! Blends impact, urgency, effort, stakeholder weight and the strategic
//! alignment score into a 0-100 percentage. Everything here is pure.

use crate::store::models::{Effort, StakeholderClass, Task};
use chrono::{DateTime, Utc};

/// Value used for unset (0) impact or urgency
pub const DEFAULT_LEVEL: u8 = 3;

const ALIGNMENT_WEIGHT: f64 = 0.3;
const URGENCY_WEIGHT: f64 = 0.25;
const IMPACT_WEIGHT: f64 = 0.2;
const STAKEHOLDER_WEIGHT: f64 = 0.15;
const EFFORT_PENALTY: f64 = 0.1;

/// Upper bound of the raw formula output
pub const RAW_MAX: f64 = 4.0;

/// Inputs of the deterministic formula
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInputs {
    /// 1-5, 0 means unset
    pub impact: u8,
    /// 1-5, 0 means unset
    pub urgency: u8,
    pub effort: Effort,
    pub stakeholder: StakeholderClass,
    /// 0-5
    pub alignment: f64,
}

impl ScoreInputs {
    /// Collect the formula inputs from a task and an alignment score
    pub fn from_task(task: &Task, alignment: f64) -> Self {
        Self {
            impact: task.impact,
            urgency: task.urgency,
            effort: task.effort,
            stakeholder: task.stakeholder,
            alignment,
        }
    }
}

fn level(value: u8) -> f64 {
    let v = if value == 0 { DEFAULT_LEVEL } else { value };
    f64::from(v.min(5))
}

/// Raw weighted sum, clamped to [0, 4]
pub fn raw_score(inputs: &ScoreInputs) -> f64 {
    let alignment = if inputs.alignment.is_finite() {
        inputs.alignment.clamp(0.0, 5.0)
    } else {
        0.0
    };

    let raw = ALIGNMENT_WEIGHT * alignment
        + URGENCY_WEIGHT * level(inputs.urgency)
        + IMPACT_WEIGHT * level(inputs.impact)
        + STAKEHOLDER_WEIGHT * inputs.stakeholder.weight()
        - EFFORT_PENALTY * inputs.effort.factor();

    raw.clamp(0.0, RAW_MAX)
}

/// Round half up and clamp into the 0-100 integer domain
pub fn to_percentage(value: f64) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    (value + 0.5).floor().clamp(0.0, 100.0) as u8
}

/// Priority percentage in [0, 100]
pub fn score(inputs: &ScoreInputs) -> u8 {
    to_percentage(raw_score(inputs) / RAW_MAX * 100.0)
}

/// Urgency level implied by a due date
///
/// 5 when overdue or due within 24h, 4 within 72h, 3 within a week,
/// 2 within 30 days, otherwise 1.
pub fn urgency_from_due(due_at: DateTime<Utc>, now: DateTime<Utc>) -> u8 {
    let hours = (due_at - now).num_seconds() as f64 / 3600.0;
    if hours <= 24.0 {
        5
    } else if hours <= 72.0 {
        4
    } else if hours <= 168.0 {
        3
    } else if hours <= 720.0 {
        2
    } else {
        1
    }
}

/// Overwrite the task's urgency from its due date, if it has one.
///
/// The due date is authoritative: a manually set urgency does not survive a
/// scoring pass when a due date exists.
pub fn refresh_urgency(task: &mut Task, now: DateTime<Utc>) {
    if let Some(due) = task.due_at {
        task.urgency = urgency_from_due(due, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::TaskSource;
    use chrono::Duration;

    fn inputs(
        impact: u8,
        urgency: u8,
        effort: Effort,
        stakeholder: StakeholderClass,
        alignment: f64,
    ) -> ScoreInputs {
        ScoreInputs {
            impact,
            urgency,
            effort,
            stakeholder,
            alignment,
        }
    }

    #[test]
    fn test_known_input_literal() {
        // raw = 0.25*3 + 0.2*3 - 0.1*1 = 1.25 -> 31.25% -> 31
        let s = score(&inputs(3, 3, Effort::Medium, StakeholderClass::None, 0.0));
        assert_eq!(s, 31);
    }

    #[test]
    fn test_unset_levels_default_to_three() {
        let unset = score(&inputs(0, 0, Effort::Medium, StakeholderClass::None, 0.0));
        let explicit = score(&inputs(3, 3, Effort::Medium, StakeholderClass::None, 0.0));
        assert_eq!(unset, explicit);
    }

    #[test]
    fn test_round_half_up() {
        // raw = 0.3*5 + 0.25*5 + 0.2*5 + 0.15*1.5 - 0.1*0.5 = 3.925 -> 98.125 -> 98
        let s = score(&inputs(5, 5, Effort::Small, StakeholderClass::External, 5.0));
        assert_eq!(s, 98);

        // Exactly x.5 rounds up
        assert_eq!(to_percentage(12.5), 13);
        assert_eq!(to_percentage(12.49), 12);
    }

    #[test]
    fn test_raw_clamped_to_four() {
        // 1.5 + 1.25 + 1.0 + 0.3 - 0.05 = 4.0 exactly; more alignment cannot exceed it
        let s = score(&inputs(5, 5, Effort::Small, StakeholderClass::Executive, 5.0));
        assert_eq!(s, 100);
        let s = score(&inputs(5, 5, Effort::Small, StakeholderClass::Executive, 50.0));
        assert_eq!(s, 100);
    }

    #[test]
    fn test_all_inputs_stay_in_range() {
        let efforts = [Effort::Small, Effort::Medium, Effort::Large];
        let stakeholders = [
            StakeholderClass::None,
            StakeholderClass::Internal,
            StakeholderClass::External,
            StakeholderClass::Executive,
        ];
        for impact in 0..=5u8 {
            for urgency in 0..=5u8 {
                for effort in efforts {
                    for stakeholder in stakeholders {
                        for step in 0..=10 {
                            let alignment = step as f64 * 0.5;
                            let raw =
                                raw_score(&inputs(impact, urgency, effort, stakeholder, alignment));
                            assert!((0.0..=RAW_MAX).contains(&raw));
                            let s = score(&inputs(impact, urgency, effort, stakeholder, alignment));
                            assert!(s <= 100);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_non_finite_alignment_is_zero() {
        let nan = score(&inputs(3, 3, Effort::Medium, StakeholderClass::None, f64::NAN));
        assert_eq!(nan, 31);
    }

    #[test]
    fn test_urgency_bands() {
        let now = Utc::now();
        assert_eq!(urgency_from_due(now - Duration::hours(5), now), 5);
        assert_eq!(urgency_from_due(now + Duration::hours(24), now), 5);
        assert_eq!(urgency_from_due(now + Duration::hours(25), now), 4);
        assert_eq!(urgency_from_due(now + Duration::hours(72), now), 4);
        assert_eq!(urgency_from_due(now + Duration::hours(100), now), 3);
        assert_eq!(urgency_from_due(now + Duration::hours(168), now), 3);
        assert_eq!(urgency_from_due(now + Duration::hours(300), now), 2);
        assert_eq!(urgency_from_due(now + Duration::hours(720), now), 2);
        assert_eq!(urgency_from_due(now + Duration::hours(721), now), 1);
    }

    #[test]
    fn test_due_date_overrides_manual_urgency() {
        let now = Utc::now();
        let mut task = Task::new(TaskSource::Manual, "x", "Ship it");
        task.urgency = 1;
        task.due_at = Some(now + Duration::hours(2));
        refresh_urgency(&mut task, now);
        assert_eq!(task.urgency, 5);

        let mut undated = Task::new(TaskSource::Manual, "y", "Someday");
        undated.urgency = 2;
        refresh_urgency(&mut undated, now);
        assert_eq!(undated.urgency, 2);
    }
}
