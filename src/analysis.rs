use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use crate::models::{
    AssignmentInfo, ImprovementTrend, RecordingInfo, RecordingStatus, StudentAnalytics,
};

/// Sentinel for a student with no recordings at all. Dashboards and the
/// absence flag rule rely on this exact value.
pub const NO_SUBMISSION_SENTINEL: i32 = 999;

/// Reviewed recordings needed in both the recent and older window before a
/// trend is called; fewer yields insufficient_data.
const TREND_GROUP_MIN: usize = 2;

/// Deadband on the recent-vs-older score comparison so ordinary noise does
/// not flip the trend between runs.
const TREND_DEADBAND: f64 = 0.5;

/// Build a complete analytics snapshot for one student from their visible
/// assignments and full recording history. Pure with respect to its inputs;
/// `now` is passed in so date arithmetic is deterministic under test.
pub fn aggregate(
    assignments: &[AssignmentInfo],
    recordings: &[RecordingInfo],
    now: DateTime<Utc>,
) -> StudentAnalytics {
    let total_assignments = assignments.len() as i32;

    let submitted_assignment_ids: HashSet<uuid::Uuid> =
        recordings.iter().map(|r| r.assignment_id).collect();
    let completed_assignments = assignments
        .iter()
        .filter(|a| submitted_assignment_ids.contains(&a.id))
        .count() as i32;

    let submission_rate = if total_assignments > 0 {
        completed_assignments as f64 / total_assignments as f64 * 100.0
    } else {
        0.0
    };

    let total_recordings = recordings.len() as i32;
    let avg_recording_duration = mean(recordings.iter().map(|r| r.duration_seconds));

    let reviewed: Vec<&RecordingInfo> = recordings
        .iter()
        .filter(|r| r.status == RecordingStatus::Reviewed)
        .collect();

    let avg_fluency_score = mean(reviewed.iter().filter_map(|r| r.fluency_score));
    let avg_accuracy_score = mean(reviewed.iter().filter_map(|r| r.accuracy_score));

    let mut grade_distribution: BTreeMap<String, i64> = BTreeMap::new();
    for recording in &reviewed {
        if let Some(grade) = &recording.grade {
            *grade_distribution.entry(grade.clone()).or_insert(0) += 1;
        }
    }

    let days_since_last_submission = match recordings.iter().map(|r| r.created_at).max() {
        Some(latest) => (now.date_naive() - latest.date_naive()).num_days() as i32,
        None => NO_SUBMISSION_SENTINEL,
    };

    // Literal platform semantics: a deadline counts as missed only when the
    // student submitted something after it, not when they never submitted.
    let missed_deadline_count = assignments
        .iter()
        .filter(|a| match a.due_date {
            Some(due) => {
                due < now
                    && recordings
                        .iter()
                        .any(|r| r.assignment_id == a.id && r.created_at > due)
            }
            None => false,
        })
        .count() as i32;

    let improvement_trend = if total_recordings >= 3 {
        classify_trend(&reviewed)
    } else {
        ImprovementTrend::InsufficientData
    };

    StudentAnalytics {
        total_assignments,
        completed_assignments,
        submission_rate,
        total_recordings,
        avg_recording_duration,
        avg_fluency_score,
        avg_accuracy_score,
        grade_distribution,
        days_since_last_submission,
        avg_time_to_complete: 0.0,
        missed_deadline_count,
        improvement_trend,
    }
}

/// Compare the three most recent reviewed recordings against the three before
/// them (ranks 4-6 by recency). Unreviewed recordings never enter either
/// group, so a student can have plenty of recordings and still land in
/// insufficient_data.
fn classify_trend(reviewed: &[&RecordingInfo]) -> ImprovementTrend {
    let mut by_recency: Vec<&RecordingInfo> = reviewed.to_vec();
    by_recency.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let recent = &by_recency[..by_recency.len().min(3)];
    let older = &by_recency[by_recency.len().min(3)..by_recency.len().min(6)];

    if recent.len() < TREND_GROUP_MIN || older.len() < TREND_GROUP_MIN {
        return ImprovementTrend::InsufficientData;
    }

    let recent_score = group_score(recent);
    let older_score = group_score(older);

    if recent_score > older_score + TREND_DEADBAND {
        ImprovementTrend::Improving
    } else if recent_score < older_score - TREND_DEADBAND {
        ImprovementTrend::Declining
    } else {
        ImprovementTrend::Stable
    }
}

fn group_score(group: &[&RecordingInfo]) -> f64 {
    mean(group.iter().filter_map(|r| r.fluency_score))
        + mean(group.iter().filter_map(|r| r.accuracy_score))
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for value in values {
        sum += value;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn assignment(due_days_ago: Option<i64>) -> AssignmentInfo {
        AssignmentInfo {
            id: Uuid::new_v4(),
            due_date: due_days_ago.map(|d| Utc::now() - Duration::days(d)),
        }
    }

    fn recording(
        assignment_id: Uuid,
        status: RecordingStatus,
        days_ago: i64,
        fluency: Option<f64>,
        accuracy: Option<f64>,
    ) -> RecordingInfo {
        RecordingInfo {
            assignment_id,
            status,
            duration_seconds: 60.0,
            fluency_score: fluency,
            accuracy_score: accuracy,
            grade: None,
            created_at: Utc::now() - Duration::days(days_ago),
        }
    }

    fn reviewed(days_ago: i64, fluency: f64, accuracy: f64) -> RecordingInfo {
        recording(
            Uuid::new_v4(),
            RecordingStatus::Reviewed,
            days_ago,
            Some(fluency),
            Some(accuracy),
        )
    }

    #[test]
    fn empty_history_yields_zeroed_snapshot_with_sentinel() {
        let snapshot = aggregate(&[], &[], Utc::now());
        assert_eq!(snapshot.total_assignments, 0);
        assert_eq!(snapshot.completed_assignments, 0);
        assert_eq!(snapshot.submission_rate, 0.0);
        assert_eq!(snapshot.total_recordings, 0);
        assert_eq!(snapshot.avg_recording_duration, 0.0);
        assert_eq!(snapshot.avg_fluency_score, 0.0);
        assert_eq!(snapshot.days_since_last_submission, NO_SUBMISSION_SENTINEL);
        assert_eq!(snapshot.improvement_trend, ImprovementTrend::InsufficientData);
        assert!(snapshot.grade_distribution.is_empty());
    }

    #[test]
    fn assignments_without_recordings_do_not_divide_by_zero() {
        let assignments = vec![assignment(None), assignment(None)];
        let snapshot = aggregate(&assignments, &[], Utc::now());
        assert_eq!(snapshot.total_assignments, 2);
        assert_eq!(snapshot.completed_assignments, 0);
        assert_eq!(snapshot.submission_rate, 0.0);
    }

    #[test]
    fn submission_rate_counts_any_recording_as_completion() {
        let assignments = vec![assignment(None), assignment(None), assignment(None)];
        let recordings = vec![recording(
            assignments[0].id,
            RecordingStatus::Pending,
            1,
            None,
            None,
        )];
        let snapshot = aggregate(&assignments, &recordings, Utc::now());
        assert_eq!(snapshot.completed_assignments, 1);
        assert!((snapshot.submission_rate - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn score_averages_cover_reviewed_recordings_only() {
        let a = assignment(None);
        let recordings = vec![
            recording(a.id, RecordingStatus::Reviewed, 1, Some(4.0), Some(5.0)),
            recording(a.id, RecordingStatus::Reviewed, 2, Some(2.0), Some(3.0)),
            recording(a.id, RecordingStatus::Pending, 3, Some(1.0), Some(1.0)),
        ];
        let snapshot = aggregate(&[a], &recordings, Utc::now());
        assert!((snapshot.avg_fluency_score - 3.0).abs() < 1e-9);
        assert!((snapshot.avg_accuracy_score - 4.0).abs() < 1e-9);
    }

    #[test]
    fn grade_distribution_skips_null_grades() {
        let a = assignment(None);
        let mut first = reviewed(1, 3.0, 3.0);
        first.grade = Some("excellent".to_string());
        let mut second = reviewed(2, 3.0, 3.0);
        second.grade = Some("excellent".to_string());
        let third = reviewed(3, 3.0, 3.0);

        let recordings: Vec<RecordingInfo> = [first, second, third]
            .into_iter()
            .map(|mut r| {
                r.assignment_id = a.id;
                r
            })
            .collect();
        let snapshot = aggregate(&[a], &recordings, Utc::now());
        assert_eq!(snapshot.grade_distribution.get("excellent"), Some(&2));
        assert_eq!(snapshot.grade_distribution.len(), 1);
    }

    #[test]
    fn days_since_last_submission_uses_most_recent_recording() {
        let a = assignment(None);
        let recordings = vec![
            recording(a.id, RecordingStatus::Pending, 8, None, None),
            recording(a.id, RecordingStatus::Pending, 20, None, None),
        ];
        let snapshot = aggregate(&[a], &recordings, Utc::now());
        assert_eq!(snapshot.days_since_last_submission, 8);
    }

    #[test]
    fn missed_deadline_counts_late_submissions_only() {
        let past_due_late = assignment(Some(10));
        let past_due_on_time = assignment(Some(10));
        let past_due_never_submitted = assignment(Some(10));
        let recordings = vec![
            // Submitted 5 days ago, deadline was 10 days ago: late.
            recording(past_due_late.id, RecordingStatus::Pending, 5, None, None),
            // Submitted 15 days ago, before the deadline: on time.
            recording(
                past_due_on_time.id,
                RecordingStatus::Pending,
                15,
                None,
                None,
            ),
        ];
        let assignments = vec![past_due_late, past_due_on_time, past_due_never_submitted];
        let snapshot = aggregate(&assignments, &recordings, Utc::now());
        assert_eq!(snapshot.missed_deadline_count, 1);
    }

    #[test]
    fn trend_requires_three_recordings_overall() {
        let a = assignment(None);
        let recordings = vec![
            recording(a.id, RecordingStatus::Reviewed, 1, Some(5.0), Some(5.0)),
            recording(a.id, RecordingStatus::Reviewed, 2, Some(1.0), Some(1.0)),
        ];
        let snapshot = aggregate(&[a], &recordings, Utc::now());
        assert_eq!(snapshot.improvement_trend, ImprovementTrend::InsufficientData);
    }

    #[test]
    fn unreviewed_recordings_never_feed_the_trend() {
        // Plenty of recordings, but only one reviewed: the older window is
        // empty, so no trend can be called.
        let a = assignment(None);
        let recordings = vec![
            recording(a.id, RecordingStatus::Reviewed, 1, Some(3.0), Some(3.0)),
            recording(a.id, RecordingStatus::Pending, 2, None, None),
            recording(a.id, RecordingStatus::Pending, 3, None, None),
            recording(a.id, RecordingStatus::Pending, 4, None, None),
        ];
        let snapshot = aggregate(&[a], &recordings, Utc::now());
        assert_eq!(snapshot.improvement_trend, ImprovementTrend::InsufficientData);
    }

    #[test]
    fn trend_deadband_boundary_is_stable_not_improving() {
        // Older group scores 2.0 + 2.0 = 4.0; recent group exactly 4.5.
        let recordings = vec![
            reviewed(1, 2.25, 2.25),
            reviewed(2, 2.25, 2.25),
            reviewed(3, 2.25, 2.25),
            reviewed(4, 2.0, 2.0),
            reviewed(5, 2.0, 2.0),
            reviewed(6, 2.0, 2.0),
        ];
        let snapshot = aggregate(&[], &recordings, Utc::now());
        assert_eq!(snapshot.improvement_trend, ImprovementTrend::Stable);
    }

    #[test]
    fn trend_just_past_deadband_is_improving() {
        // Recent group scores 4.51 against an older 4.0.
        let recordings = vec![
            reviewed(1, 2.25, 2.26),
            reviewed(2, 2.25, 2.26),
            reviewed(3, 2.25, 2.26),
            reviewed(4, 2.0, 2.0),
            reviewed(5, 2.0, 2.0),
            reviewed(6, 2.0, 2.0),
        ];
        let snapshot = aggregate(&[], &recordings, Utc::now());
        assert_eq!(snapshot.improvement_trend, ImprovementTrend::Improving);
    }

    #[test]
    fn trend_detects_decline_past_deadband() {
        let recordings = vec![
            reviewed(1, 1.0, 1.0),
            reviewed(2, 1.0, 1.0),
            reviewed(3, 1.0, 1.0),
            reviewed(4, 3.0, 3.0),
            reviewed(5, 3.0, 3.0),
            reviewed(6, 3.0, 3.0),
        ];
        let snapshot = aggregate(&[], &recordings, Utc::now());
        assert_eq!(snapshot.improvement_trend, ImprovementTrend::Declining);
    }

    #[test]
    fn aggregation_is_deterministic_on_unchanged_inputs() {
        let a = assignment(Some(3));
        let recordings = vec![
            recording(a.id, RecordingStatus::Reviewed, 1, Some(4.0), Some(3.0)),
            recording(a.id, RecordingStatus::Reviewed, 2, Some(2.0), Some(2.0)),
            recording(a.id, RecordingStatus::Pending, 4, None, None),
        ];
        let now = Utc::now();
        let first = aggregate(&[a.clone()], &recordings, now);
        let second = aggregate(&[a], &recordings, now);
        assert_eq!(first, second);
    }

    #[test]
    fn needs_attention_follows_metric_thresholds() {
        let mut snapshot = aggregate(&[], &[], Utc::now());
        // Sentinel 999 alone trips the attention check.
        assert!(snapshot.needs_attention());

        snapshot.submission_rate = 80.0;
        snapshot.days_since_last_submission = 2;
        snapshot.avg_fluency_score = 3.5;
        snapshot.missed_deadline_count = 0;
        assert!(!snapshot.needs_attention());

        snapshot.missed_deadline_count = 3;
        assert!(snapshot.needs_attention());
    }
}
