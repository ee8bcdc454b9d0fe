use std::collections::HashSet;

use crate::models::{FlagCandidate, FlagType, ImprovementTrend, Severity, StudentAnalytics};

/// One row of the flagging rule table: when `applies` holds for a snapshot,
/// the rule proposes a flag of `flag_type` with a metric-derived severity and
/// description.
pub struct FlagRule {
    pub flag_type: FlagType,
    pub applies: fn(&StudentAnalytics) -> bool,
    pub severity: fn(&StudentAnalytics) -> Severity,
    pub describe: fn(&StudentAnalytics) -> String,
}

/// The fixed rule set, in evaluation order. Order is user-visible: two rules
/// share the low_submission type, and when both fire in one run the earlier
/// row's severity and description are what gets persisted.
pub const RULES: [FlagRule; 6] = [
    FlagRule {
        flag_type: FlagType::LowSubmission,
        applies: |a| a.submission_rate < 50.0,
        severity: |a| {
            if a.submission_rate < 25.0 {
                Severity::High
            } else {
                Severity::Medium
            }
        },
        describe: |a| {
            format!(
                "Student has only completed {:.1}% of assignments ({}/{})",
                a.submission_rate, a.completed_assignments, a.total_assignments
            )
        },
    },
    FlagRule {
        flag_type: FlagType::ShortRecordings,
        applies: |a| a.avg_recording_duration > 0.0 && a.avg_recording_duration < 30.0,
        severity: |_| Severity::Medium,
        describe: |a| {
            format!(
                "Average recording duration is only {:.1} seconds, which may indicate rushed submissions",
                a.avg_recording_duration
            )
        },
    },
    FlagRule {
        flag_type: FlagType::LowPerformance,
        applies: |a| a.avg_fluency_score > 0.0 && a.avg_fluency_score < 2.0,
        severity: |_| Severity::High,
        describe: |a| {
            format!(
                "Average fluency score is {:.1}/5, indicating reading difficulties",
                a.avg_fluency_score
            )
        },
    },
    FlagRule {
        flag_type: FlagType::MissedDeadlines,
        applies: |a| a.missed_deadline_count > 2,
        severity: |a| {
            if a.missed_deadline_count < 5 {
                Severity::Medium
            } else {
                Severity::High
            }
        },
        describe: |a| {
            format!(
                "Student has missed {} assignment deadlines",
                a.missed_deadline_count
            )
        },
    },
    FlagRule {
        flag_type: FlagType::NoImprovement,
        applies: |a| {
            a.improvement_trend == ImprovementTrend::Declining && a.total_recordings > 5
        },
        severity: |_| Severity::Medium,
        describe: |_| {
            "Student shows declining performance trend over recent submissions".to_string()
        },
    },
    FlagRule {
        flag_type: FlagType::LowSubmission,
        applies: |a| a.days_since_last_submission > 7,
        severity: |a| {
            if a.days_since_last_submission > 14 {
                Severity::Urgent
            } else {
                Severity::High
            }
        },
        describe: |a| {
            format!(
                "Student has not submitted any recordings in {} days",
                a.days_since_last_submission
            )
        },
    },
];

/// Evaluate every rule against a snapshot, keeping at most one candidate per
/// flag type (first matching rule wins). Reconciliation against flags already
/// open in the store happens at insert time.
pub fn evaluate(analytics: &StudentAnalytics) -> Vec<FlagCandidate> {
    let mut seen: HashSet<FlagType> = HashSet::new();
    let mut candidates = Vec::new();

    for rule in RULES.iter() {
        if (rule.applies)(analytics) && seen.insert(rule.flag_type) {
            candidates.push(FlagCandidate {
                flag_type: rule.flag_type,
                severity: (rule.severity)(analytics),
                description: (rule.describe)(analytics),
            });
        }
    }

    candidates
}
