use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

mod analysis;
mod db;
mod flags;
mod models;
mod report;

use models::{FlagType, StudentRef};

#[derive(Parser)]
#[command(name = "student-analysis")]
#[command(about = "Student analytics and flagging engine for the reading practice platform", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Run the full analysis batch: per-student analytics, flags, system rollup
    Analyze,
    /// Resolve one flag, recording who resolved it and why
    ResolveFlag {
        #[arg(long)]
        flag_id: Uuid,
        #[arg(long)]
        resolver_email: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// List open flags, optionally for a single student
    Flags {
        #[arg(long)]
        student_email: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown attention report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Delete resolved flags older than 30 days and rollups older than 90 days
    Cleanup,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Analyze => {
            run_analysis(&pool).await?;
        }
        Commands::ResolveFlag {
            flag_id,
            resolver_email,
            notes,
        } => {
            let resolver_id = db::lookup_user_id(&pool, &resolver_email)
                .await?
                .with_context(|| format!("no user with email {resolver_email}"))?;

            match db::resolve_flag(&pool, flag_id, resolver_id, &notes).await {
                Ok(()) => println!("Flag {flag_id} resolved."),
                Err(err) => {
                    eprintln!("Could not resolve flag: {err}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Flags {
            student_email,
            json,
        } => {
            let open_flags = db::fetch_open_flags(&pool, student_email.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&open_flags)?);
            } else if open_flags.is_empty() {
                println!("No open flags.");
            } else {
                for flag in &open_flags {
                    println!(
                        "{} [{}] {} ({}): {}",
                        flag.id, flag.severity, flag.student_name, flag.flag_type,
                        flag.description
                    );
                }
            }
        }
        Commands::Report { out } => {
            let rollup = db::fetch_latest_rollup(&pool).await?;
            let analytics = db::fetch_analytics(&pool).await?;
            let open_flags = db::fetch_open_flags(&pool, None).await?;
            let report = report::build_report(rollup.as_ref(), &analytics, &open_flags);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Cleanup => {
            let (flags_deleted, rollups_deleted) = db::cleanup_old_records(&pool).await?;
            println!(
                "Cleaned up {flags_deleted} resolved flags and {rollups_deleted} old rollups."
            );
        }
    }

    Ok(())
}

/// Batch entry point: every student's snapshot is written before their flags
/// are evaluated, and one student failing never aborts the rest of the run.
/// The system rollup runs once after the roster loop.
async fn run_analysis(pool: &PgPool) -> anyhow::Result<()> {
    println!("Starting student analysis...");
    let students = db::fetch_students(pool).await?;

    let mut processed = 0usize;
    let mut failed = 0usize;

    for student in &students {
        match analyze_student(pool, student).await {
            Ok(created) => {
                processed += 1;
                for flag_type in created {
                    println!(
                        "Created {} flag for {}",
                        flag_type.as_str(),
                        student.full_name
                    );
                }
            }
            Err(err) => {
                failed += 1;
                eprintln!("Failed to analyze {}: {err:#}", student.email);
            }
        }
    }

    let date = db::update_system_analytics(pool).await?;
    println!("Updated system analytics for {date}");
    println!("Student analysis completed for {processed} students ({failed} failed)");

    Ok(())
}

async fn analyze_student(pool: &PgPool, student: &StudentRef) -> anyhow::Result<Vec<FlagType>> {
    let assignments = db::fetch_assignments_for_student(pool, student.id).await?;
    let recordings = db::fetch_recordings_for_student(pool, student.id).await?;

    let snapshot = analysis::aggregate(&assignments, &recordings, Utc::now());
    let candidates = flags::evaluate(&snapshot);

    db::save_student_analysis(pool, student.id, &snapshot, &candidates).await
}
