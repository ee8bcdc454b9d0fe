use anyhow::Context;
use chrono::{Duration, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    AnalyticsRecord, AssignmentInfo, FlagCandidate, FlagType, ImprovementTrend, OpenFlagRecord,
    RecordingInfo, RecordingStatus, StudentAnalytics, StudentRef, SystemRollup,
};

#[derive(Debug, thiserror::Error)]
pub enum FlagError {
    #[error("flag {0} not found")]
    NotFound(Uuid),
    #[error("flag {0} is already resolved")]
    AlreadyResolved(Uuid),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn fetch_students(pool: &PgPool) -> anyhow::Result<Vec<StudentRef>> {
    let rows = sqlx::query(
        "SELECT id, full_name, email FROM student_analysis.users \
         WHERE user_type = 'student' ORDER BY full_name",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| StudentRef {
            id: row.get("id"),
            full_name: row.get("full_name"),
            email: row.get("email"),
        })
        .collect())
}

/// Assignments visible to a student: assigned to them directly or to any
/// class they belong to.
pub async fn fetch_assignments_for_student(
    pool: &PgPool,
    student_id: Uuid,
) -> anyhow::Result<Vec<AssignmentInfo>> {
    let rows = sqlx::query(
        "SELECT a.id, a.due_date FROM student_analysis.assignments a \
         WHERE a.assigned_student_id = $1 \
            OR a.class_id IN (\
                SELECT class_id FROM student_analysis.class_memberships \
                WHERE student_id = $1)",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| AssignmentInfo {
            id: row.get("id"),
            due_date: row.get("due_date"),
        })
        .collect())
}

pub async fn fetch_recordings_for_student(
    pool: &PgPool,
    student_id: Uuid,
) -> anyhow::Result<Vec<RecordingInfo>> {
    let rows = sqlx::query(
        "SELECT assignment_id, status, duration_seconds, fluency_score, \
                accuracy_score, grade, created_at \
         FROM student_analysis.recordings WHERE student_id = $1 \
         ORDER BY created_at DESC",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| RecordingInfo {
            assignment_id: row.get("assignment_id"),
            status: RecordingStatus::from_db(row.get::<String, _>("status").as_str()),
            duration_seconds: row.get("duration_seconds"),
            fluency_score: row.get("fluency_score"),
            accuracy_score: row.get("accuracy_score"),
            grade: row.get("grade"),
            created_at: row.get("created_at"),
        })
        .collect())
}

/// Persist one student's run output atomically: the snapshot upsert and any
/// new flags commit together or not at all. Returns the flag types actually
/// inserted; candidates matching an already-open flag are skipped by the
/// partial unique index without touching the existing flag.
pub async fn save_student_analysis(
    pool: &PgPool,
    student_id: Uuid,
    analytics: &StudentAnalytics,
    candidates: &[FlagCandidate],
) -> anyhow::Result<Vec<FlagType>> {
    let grade_distribution = serde_json::to_value(&analytics.grade_distribution)
        .context("failed to serialize grade distribution")?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO student_analysis.student_analytics
        (id, student_id, total_assignments, completed_assignments, submission_rate,
         total_recordings, avg_recording_duration, avg_fluency_score, avg_accuracy_score,
         grade_distribution, days_since_last_submission, avg_time_to_complete,
         missed_deadline_count, improvement_trend, last_updated)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, now())
        ON CONFLICT (student_id) DO UPDATE SET
            total_assignments = EXCLUDED.total_assignments,
            completed_assignments = EXCLUDED.completed_assignments,
            submission_rate = EXCLUDED.submission_rate,
            total_recordings = EXCLUDED.total_recordings,
            avg_recording_duration = EXCLUDED.avg_recording_duration,
            avg_fluency_score = EXCLUDED.avg_fluency_score,
            avg_accuracy_score = EXCLUDED.avg_accuracy_score,
            grade_distribution = EXCLUDED.grade_distribution,
            days_since_last_submission = EXCLUDED.days_since_last_submission,
            avg_time_to_complete = EXCLUDED.avg_time_to_complete,
            missed_deadline_count = EXCLUDED.missed_deadline_count,
            improvement_trend = EXCLUDED.improvement_trend,
            last_updated = now()
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(analytics.total_assignments)
    .bind(analytics.completed_assignments)
    .bind(analytics.submission_rate)
    .bind(analytics.total_recordings)
    .bind(analytics.avg_recording_duration)
    .bind(analytics.avg_fluency_score)
    .bind(analytics.avg_accuracy_score)
    .bind(grade_distribution)
    .bind(analytics.days_since_last_submission)
    .bind(analytics.avg_time_to_complete)
    .bind(analytics.missed_deadline_count)
    .bind(analytics.improvement_trend.as_str())
    .execute(&mut *tx)
    .await?;

    let mut created = Vec::new();
    for candidate in candidates {
        let result = sqlx::query(
            r#"
            INSERT INTO student_analysis.student_flags
            (id, student_id, flag_type, severity, description, auto_generated)
            VALUES ($1, $2, $3, $4, $5, TRUE)
            ON CONFLICT (student_id, flag_type) WHERE is_resolved = FALSE
            DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(candidate.flag_type.as_str())
        .bind(candidate.severity.as_str())
        .bind(&candidate.description)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            created.push(candidate.flag_type);
        }
    }

    tx.commit().await?;
    Ok(created)
}

/// Resolution is terminal: a resolved flag keeps its resolver, timestamp and
/// notes forever, and a recurring condition produces a fresh flag instead.
pub async fn resolve_flag(
    pool: &PgPool,
    flag_id: Uuid,
    resolver_id: Uuid,
    notes: &str,
) -> Result<(), FlagError> {
    let result = sqlx::query(
        "UPDATE student_analysis.student_flags \
         SET is_resolved = TRUE, resolved_by = $2, resolved_at = now(), resolution_notes = $3 \
         WHERE id = $1 AND is_resolved = FALSE",
    )
    .bind(flag_id)
    .bind(resolver_id)
    .bind(notes)
    .execute(pool)
    .await?;

    if result.rows_affected() > 0 {
        return Ok(());
    }

    let exists = sqlx::query("SELECT 1 FROM student_analysis.student_flags WHERE id = $1")
        .bind(flag_id)
        .fetch_optional(pool)
        .await?;

    match exists {
        Some(_) => Err(FlagError::AlreadyResolved(flag_id)),
        None => Err(FlagError::NotFound(flag_id)),
    }
}

pub async fn lookup_user_id(pool: &PgPool, email: &str) -> anyhow::Result<Option<Uuid>> {
    let row = sqlx::query("SELECT id FROM student_analysis.users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.get("id")))
}

/// Upsert today's system-wide rollup from live counts. Running twice on the
/// same date overwrites that date's row.
pub async fn update_system_analytics(pool: &PgPool) -> anyhow::Result<NaiveDate> {
    let week_ago = Utc::now() - Duration::days(7);
    let today = Utc::now().date_naive();

    let counts = sqlx::query(
        r#"
        SELECT
            (SELECT COUNT(*) FROM student_analysis.users WHERE user_type = 'student') AS total_students,
            (SELECT COUNT(DISTINCT r.student_id)
               FROM student_analysis.recordings r
               JOIN student_analysis.users u ON u.id = r.student_id
              WHERE u.user_type = 'student' AND r.created_at >= $1) AS active_students,
            (SELECT COUNT(*) FROM student_analysis.users WHERE user_type = 'teacher') AS total_teachers,
            (SELECT COUNT(*) FROM student_analysis.users
              WHERE user_type = 'teacher' AND last_login >= $1) AS active_teachers,
            (SELECT COUNT(*) FROM student_analysis.assignments) AS total_assignments,
            (SELECT COUNT(*) FROM student_analysis.recordings) AS total_recordings,
            (SELECT COUNT(*) FROM student_analysis.recordings WHERE status = 'reviewed') AS reviewed_recordings,
            (SELECT COALESCE(SUM(file_size_bytes), 0)::BIGINT FROM student_analysis.recordings) AS total_bytes
        "#,
    )
    .bind(week_ago)
    .fetch_one(pool)
    .await?;

    let total_bytes: i64 = counts.get("total_bytes");
    let storage_used_gb = total_bytes as f64 / (1024f64 * 1024.0 * 1024.0);

    sqlx::query(
        r#"
        INSERT INTO student_analysis.system_analytics
        (id, date, total_students, active_students, total_teachers, active_teachers,
         total_assignments_created, total_recordings_submitted, total_recordings_reviewed,
         storage_used_gb)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (date) DO UPDATE SET
            total_students = EXCLUDED.total_students,
            active_students = EXCLUDED.active_students,
            total_teachers = EXCLUDED.total_teachers,
            active_teachers = EXCLUDED.active_teachers,
            total_assignments_created = EXCLUDED.total_assignments_created,
            total_recordings_submitted = EXCLUDED.total_recordings_submitted,
            total_recordings_reviewed = EXCLUDED.total_recordings_reviewed,
            storage_used_gb = EXCLUDED.storage_used_gb
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(today)
    .bind(counts.get::<i64, _>("total_students") as i32)
    .bind(counts.get::<i64, _>("active_students") as i32)
    .bind(counts.get::<i64, _>("total_teachers") as i32)
    .bind(counts.get::<i64, _>("active_teachers") as i32)
    .bind(counts.get::<i64, _>("total_assignments") as i32)
    .bind(counts.get::<i64, _>("total_recordings") as i32)
    .bind(counts.get::<i64, _>("reviewed_recordings") as i32)
    .bind(storage_used_gb)
    .execute(pool)
    .await?;

    Ok(today)
}

pub async fn fetch_open_flags(
    pool: &PgPool,
    student_email: Option<&str>,
) -> anyhow::Result<Vec<OpenFlagRecord>> {
    let mut query = String::from(
        "SELECT f.id, u.full_name, u.email, f.flag_type, f.severity, f.description, f.created_at \
         FROM student_analysis.student_flags f \
         JOIN student_analysis.users u ON u.id = f.student_id \
         WHERE f.is_resolved = FALSE",
    );
    if student_email.is_some() {
        query.push_str(" AND u.email = $1");
    }
    query.push_str(" ORDER BY f.created_at DESC");

    let mut rows = sqlx::query(&query);
    if let Some(email) = student_email {
        rows = rows.bind(email);
    }

    let records = rows.fetch_all(pool).await?;
    Ok(records
        .into_iter()
        .map(|row| OpenFlagRecord {
            id: row.get("id"),
            student_name: row.get("full_name"),
            student_email: row.get("email"),
            flag_type: row.get("flag_type"),
            severity: row.get("severity"),
            description: row.get("description"),
            created_at: row.get("created_at"),
        })
        .collect())
}

pub async fn fetch_analytics(pool: &PgPool) -> anyhow::Result<Vec<AnalyticsRecord>> {
    let rows = sqlx::query(
        "SELECT u.full_name, u.email, sa.total_assignments, sa.completed_assignments, \
                sa.submission_rate, sa.total_recordings, sa.avg_recording_duration, \
                sa.avg_fluency_score, sa.avg_accuracy_score, sa.grade_distribution, \
                sa.days_since_last_submission, sa.avg_time_to_complete, \
                sa.missed_deadline_count, sa.improvement_trend \
         FROM student_analysis.student_analytics sa \
         JOIN student_analysis.users u ON u.id = sa.student_id \
         ORDER BY sa.submission_rate ASC",
    )
    .fetch_all(pool)
    .await?;

    let mut records = Vec::new();
    for row in rows {
        let grade_distribution: serde_json::Value = row.get("grade_distribution");
        let grade_distribution =
            serde_json::from_value(grade_distribution).unwrap_or_default();

        records.push(AnalyticsRecord {
            student_name: row.get("full_name"),
            student_email: row.get("email"),
            analytics: StudentAnalytics {
                total_assignments: row.get("total_assignments"),
                completed_assignments: row.get("completed_assignments"),
                submission_rate: row.get("submission_rate"),
                total_recordings: row.get("total_recordings"),
                avg_recording_duration: row.get("avg_recording_duration"),
                avg_fluency_score: row.get("avg_fluency_score"),
                avg_accuracy_score: row.get("avg_accuracy_score"),
                grade_distribution,
                days_since_last_submission: row.get("days_since_last_submission"),
                avg_time_to_complete: row.get("avg_time_to_complete"),
                missed_deadline_count: row.get("missed_deadline_count"),
                improvement_trend: ImprovementTrend::from_db(
                    row.get::<String, _>("improvement_trend").as_str(),
                ),
            },
        });
    }

    Ok(records)
}

pub async fn fetch_latest_rollup(pool: &PgPool) -> anyhow::Result<Option<SystemRollup>> {
    let row = sqlx::query(
        "SELECT date, total_students, active_students, total_teachers, active_teachers, \
                total_assignments_created, total_recordings_submitted, \
                total_recordings_reviewed, storage_used_gb \
         FROM student_analysis.system_analytics ORDER BY date DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| SystemRollup {
        date: row.get("date"),
        total_students: row.get("total_students"),
        active_students: row.get("active_students"),
        total_teachers: row.get("total_teachers"),
        active_teachers: row.get("active_teachers"),
        total_assignments_created: row.get("total_assignments_created"),
        total_recordings_submitted: row.get("total_recordings_submitted"),
        total_recordings_reviewed: row.get("total_recordings_reviewed"),
        storage_used_gb: row.get("storage_used_gb"),
    }))
}

/// Retention policy: resolved flags live 30 days past resolution, system
/// rollups 90 days. Unresolved flags are never touched.
pub async fn cleanup_old_records(pool: &PgPool) -> anyhow::Result<(u64, u64)> {
    let flag_cutoff = Utc::now() - Duration::days(30);
    let flags_deleted = sqlx::query(
        "DELETE FROM student_analysis.student_flags \
         WHERE is_resolved = TRUE AND resolved_at < $1",
    )
    .bind(flag_cutoff)
    .execute(pool)
    .await?
    .rows_affected();

    let rollup_cutoff = Utc::now().date_naive() - Duration::days(90);
    let rollups_deleted =
        sqlx::query("DELETE FROM student_analysis.system_analytics WHERE date < $1")
            .bind(rollup_cutoff)
            .execute(pool)
            .await?
            .rows_affected();

    Ok((flags_deleted, rollups_deleted))
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let teacher_id = Uuid::parse_str("7b1f4c9e-5a02-4f6d-9c31-8e2d6a0f41b5")?;
    let users = vec![
        (teacher_id, "Dana Whitfield", "dana.whitfield@school.example", "teacher"),
        (
            Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?,
            "Avery Lee",
            "avery.lee@school.example",
            "student",
        ),
        (
            Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?,
            "Jules Moreno",
            "jules.moreno@school.example",
            "student",
        ),
        (
            Uuid::parse_str("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2")?,
            "Kiara Patel",
            "kiara.patel@school.example",
            "student",
        ),
    ];

    for (id, name, email, user_type) in &users {
        sqlx::query(
            r#"
            INSERT INTO student_analysis.users (id, full_name, email, user_type, last_login)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name, user_type = EXCLUDED.user_type
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .bind(user_type)
        .execute(pool)
        .await?;
    }

    let class_id = Uuid::parse_str("f3a6c2d8-1b47-4e0a-9d25-6c8f0b3a7e91")?;
    sqlx::query(
        "INSERT INTO student_analysis.classes (id, name) VALUES ($1, 'Year 3 Reading') \
         ON CONFLICT (name) DO NOTHING",
    )
    .bind(class_id)
    .execute(pool)
    .await?;

    for (_, _, email, user_type) in &users {
        if *user_type != "student" {
            continue;
        }
        sqlx::query(
            r#"
            INSERT INTO student_analysis.class_memberships (class_id, student_id)
            SELECT $1, id FROM student_analysis.users WHERE email = $2
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(class_id)
        .bind(email)
        .execute(pool)
        .await?;
    }

    let assignments = vec![
        ("The Velveteen Rabbit, ch. 1", 21i64),
        ("Charlotte's Web, ch. 3", 14),
        ("Frog and Toad Are Friends", 7),
        ("The Paper Bag Princess", 2),
    ];

    let mut assignment_ids = Vec::new();
    for (title, due_days_ago) in assignments {
        let id = Uuid::new_v4();
        let inserted = sqlx::query(
            r#"
            INSERT INTO student_analysis.assignments (id, title, class_id, due_date)
            VALUES ($1, $2, $3, now() - make_interval(days => $4::int))
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(class_id)
        .bind(due_days_ago as i32)
        .execute(pool)
        .await?;
        if inserted.rows_affected() > 0 {
            assignment_ids.push(id);
        }
    }

    // A mix of reviewed, pending and late recordings so a seeded analysis run
    // produces flags worth looking at.
    let recordings = vec![
        ("avery.lee@school.example", 0usize, "reviewed", 95.0, Some(4.0), Some(4.0), Some("excellent"), 20i64),
        ("avery.lee@school.example", 1, "reviewed", 88.0, Some(4.0), Some(5.0), Some("excellent"), 13),
        ("avery.lee@school.example", 2, "pending", 102.0, None, None, None, 5),
        ("jules.moreno@school.example", 0, "reviewed", 22.0, Some(2.0), Some(2.0), Some("needs_practice"), 19),
        ("jules.moreno@school.example", 1, "reviewed", 18.0, Some(1.0), Some(2.0), Some("needs_practice"), 10),
        ("kiara.patel@school.example", 0, "reviewed", 60.0, Some(3.0), Some(3.0), Some("good"), 18),
    ];

    for (email, assignment_idx, status, duration, fluency, accuracy, grade, days_ago) in recordings
    {
        let Some(assignment_id) = assignment_ids.get(assignment_idx) else {
            continue;
        };
        let student_id: Uuid =
            sqlx::query("SELECT id FROM student_analysis.users WHERE email = $1")
                .bind(email)
                .fetch_one(pool)
                .await?
                .get("id");

        sqlx::query(
            r#"
            INSERT INTO student_analysis.recordings
            (id, student_id, assignment_id, status, duration_seconds, fluency_score,
             accuracy_score, grade, file_size_bytes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9,
                    now() - make_interval(days => $10::int))
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(assignment_id)
        .bind(status)
        .bind(duration)
        .bind(fluency)
        .bind(accuracy)
        .bind(grade)
        .bind(1_400_000i64)
        .bind(days_ago as i32)
        .execute(pool)
        .await?;
    }

    Ok(())
}
