use std::fmt::Write;

use crate::models::{AnalyticsRecord, OpenFlagRecord, SystemRollup};

fn severity_rank(severity: &str) -> u8 {
    match severity {
        "urgent" => 3,
        "high" => 2,
        "medium" => 1,
        _ => 0,
    }
}

pub fn build_report(
    rollup: Option<&SystemRollup>,
    analytics: &[AnalyticsRecord],
    open_flags: &[OpenFlagRecord],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Student Attention Report");
    let _ = writeln!(output);
    let _ = writeln!(output, "## System Snapshot");

    match rollup {
        Some(rollup) => {
            let _ = writeln!(output, "As of {}:", rollup.date);
            let _ = writeln!(
                output,
                "- Students: {} total, {} active this week",
                rollup.total_students, rollup.active_students
            );
            let _ = writeln!(
                output,
                "- Teachers: {} total, {} active this week",
                rollup.total_teachers, rollup.active_teachers
            );
            let _ = writeln!(
                output,
                "- Content: {} assignments, {} recordings ({} reviewed)",
                rollup.total_assignments_created,
                rollup.total_recordings_submitted,
                rollup.total_recordings_reviewed
            );
            let _ = writeln!(output, "- Storage: {:.2} GB", rollup.storage_used_gb);
        }
        None => {
            let _ = writeln!(output, "No system rollup recorded yet; run an analysis first.");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students Needing Attention");

    let attention: Vec<&AnalyticsRecord> = analytics
        .iter()
        .filter(|record| record.analytics.needs_attention())
        .collect();

    if attention.is_empty() {
        let _ = writeln!(output, "No students currently need attention.");
    } else {
        for record in &attention {
            let a = &record.analytics;
            let _ = writeln!(
                output,
                "- {} ({}): completed {}/{} assignments ({:.0}%), avg fluency {:.1}, \
                 {} days since last submission, trend {}",
                record.student_name,
                record.student_email,
                a.completed_assignments,
                a.total_assignments,
                a.completion_rate(),
                a.avg_fluency_score,
                a.days_since_last_submission,
                a.improvement_trend.as_str()
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Open Flags");

    let mut flags: Vec<&OpenFlagRecord> = open_flags.iter().collect();
    flags.sort_by(|a, b| {
        severity_rank(&b.severity)
            .cmp(&severity_rank(&a.severity))
            .then(b.created_at.cmp(&a.created_at))
    });

    if flags.is_empty() {
        let _ = writeln!(output, "No open flags.");
    } else {
        for flag in &flags {
            let _ = writeln!(
                output,
                "- [{}] {} ({}): {}",
                flag.severity, flag.student_name, flag.flag_type, flag.description
            );
        }
    }

    output
}
