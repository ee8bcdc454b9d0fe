use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StudentRef {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct AssignmentInfo {
    pub id: Uuid,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingStatus {
    Pending,
    Reviewed,
    Flagged,
}

impl RecordingStatus {
    pub fn from_db(value: &str) -> Self {
        match value {
            "reviewed" => RecordingStatus::Reviewed,
            "flagged" => RecordingStatus::Flagged,
            _ => RecordingStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordingInfo {
    pub assignment_id: Uuid,
    pub status: RecordingStatus,
    pub duration_seconds: f64,
    pub fluency_score: Option<f64>,
    pub accuracy_score: Option<f64>,
    pub grade: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImprovementTrend {
    Improving,
    Stable,
    Declining,
    InsufficientData,
}

impl ImprovementTrend {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImprovementTrend::Improving => "improving",
            ImprovementTrend::Stable => "stable",
            ImprovementTrend::Declining => "declining",
            ImprovementTrend::InsufficientData => "insufficient_data",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "improving" => ImprovementTrend::Improving,
            "stable" => ImprovementTrend::Stable,
            "declining" => ImprovementTrend::Declining,
            _ => ImprovementTrend::InsufficientData,
        }
    }
}

/// One fully recomputed snapshot of a student's performance. Every analysis
/// run overwrites all fields; nothing here accumulates across runs.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentAnalytics {
    pub total_assignments: i32,
    pub completed_assignments: i32,
    pub submission_rate: f64,
    pub total_recordings: i32,
    pub avg_recording_duration: f64,
    pub avg_fluency_score: f64,
    pub avg_accuracy_score: f64,
    pub grade_distribution: BTreeMap<String, i64>,
    pub days_since_last_submission: i32,
    pub avg_time_to_complete: f64,
    pub missed_deadline_count: i32,
    pub improvement_trend: ImprovementTrend,
}

impl StudentAnalytics {
    pub fn completion_rate(&self) -> f64 {
        if self.total_assignments == 0 {
            return 0.0;
        }
        self.completed_assignments as f64 / self.total_assignments as f64 * 100.0
    }

    pub fn needs_attention(&self) -> bool {
        self.submission_rate < 70.0
            || self.days_since_last_submission > 7
            || self.avg_fluency_score < 2.0
            || self.missed_deadline_count > 2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagType {
    LowSubmission,
    ShortRecordings,
    LowPerformance,
    MissedDeadlines,
    NoImprovement,
    TechnicalIssues,
}

impl FlagType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagType::LowSubmission => "low_submission",
            FlagType::ShortRecordings => "short_recordings",
            FlagType::LowPerformance => "low_performance",
            FlagType::MissedDeadlines => "missed_deadlines",
            FlagType::NoImprovement => "no_improvement",
            FlagType::TechnicalIssues => "technical_issues",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Urgent,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Urgent => "urgent",
        }
    }
}

/// A flag-worthy condition detected for a student in the current run, before
/// reconciliation against already-open flags.
#[derive(Debug, Clone)]
pub struct FlagCandidate {
    pub flag_type: FlagType,
    pub severity: Severity,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenFlagRecord {
    pub id: Uuid,
    pub student_name: String,
    pub student_email: String,
    pub flag_type: String,
    pub severity: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemRollup {
    pub date: chrono::NaiveDate,
    pub total_students: i32,
    pub active_students: i32,
    pub total_teachers: i32,
    pub active_teachers: i32,
    pub total_assignments_created: i32,
    pub total_recordings_submitted: i32,
    pub total_recordings_reviewed: i32,
    pub storage_used_gb: f64,
}

#[derive(Debug, Clone)]
pub struct AnalyticsRecord {
    pub student_name: String,
    pub student_email: String,
    pub analytics: StudentAnalytics,
}
