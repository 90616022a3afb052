use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

mod ai;
mod db;
mod models;
mod provider;
mod ranking;
mod report;
mod rotation;

use ai::{QuestionGenerator, QuestionRequest};
use provider::GeminiClient;
use rotation::KeyPool;

#[derive(Parser)]
#[command(name = "tuition-admin")]
#[command(about = "Exam ranking and AI question toolkit for a tuition centre", long_about = None)]
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
    /// Import per-student marks for a monthly exam from a CSV file
    ImportMarks {
        #[arg(long)]
        monthly_exam: Uuid,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Compute and store a draft ranking for a monthly exam
    GenerateRanking {
        #[arg(long)]
        monthly_exam: Uuid,
    },
    /// Lock the draft ranking as immutable history
    FinalizeRanking {
        #[arg(long)]
        monthly_exam: Uuid,
    },
    /// Print the stored ranking for a monthly exam
    ShowRanking {
        #[arg(long)]
        monthly_exam: Uuid,
    },
    /// Generate a markdown report for a monthly exam
    Report {
        #[arg(long)]
        monthly_exam: Uuid,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Generate multiple-choice questions through the AI provider
    GenerateQuestions {
        #[arg(long)]
        class: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        chapter: String,
        #[arg(long, default_value = "medium")]
        difficulty: String,
        #[arg(long, default_value_t = 5)]
        quantity: u32,
    },
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

fn question_generator() -> anyhow::Result<QuestionGenerator<GeminiClient>> {
    let keys = std::env::var("GEMINI_API_KEYS")
        .context("GEMINI_API_KEYS must be set to a comma-separated credential list")?;
    let credentials: Vec<String> = keys
        .split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect();

    let daily_quota = std::env::var("GEMINI_DAILY_QUOTA")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);

    let base_url = std::env::var("GEMINI_BASE_URL")
        .unwrap_or_else(|_| provider::DEFAULT_BASE_URL.to_string());
    let model =
        std::env::var("GEMINI_MODEL").unwrap_or_else(|_| provider::DEFAULT_MODEL.to_string());
    let timeout = std::env::var("GEMINI_TIMEOUT_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(provider::DEFAULT_TIMEOUT);

    let pool = KeyPool::new(credentials, daily_quota)?;
    let client = GeminiClient::new(base_url, model, timeout)?;
    Ok(QuestionGenerator::new(pool, client))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect().await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportMarks { monthly_exam, csv } => {
            let pool = connect().await?;
            let imported = db::import_marks_csv(&pool, monthly_exam, &csv).await?;
            println!("Imported {imported} marks from {}.", csv.display());
        }
        Commands::GenerateRanking { monthly_exam } => {
            let pool = connect().await?;
            let records = db::generate_ranking(&pool, monthly_exam).await?;

            if records.is_empty() {
                println!("No marks recorded for this monthly exam yet.");
                return Ok(());
            }

            println!("Draft ranking for monthly exam {monthly_exam}:");
            for record in &records {
                println!(
                    "- #{} roll {} {} ({:.1} marks)",
                    record.position, record.roll_number, record.student_name, record.total_marks
                );
            }
        }
        Commands::FinalizeRanking { monthly_exam } => {
            let pool = connect().await?;
            let locked = db::finalize_ranking(&pool, monthly_exam).await?;
            println!("Finalized {locked} ranking records for monthly exam {monthly_exam}.");
        }
        Commands::ShowRanking { monthly_exam } => {
            let pool = connect().await?;
            let records = db::fetch_ranking(&pool, monthly_exam).await?;

            if records.is_empty() {
                println!("No ranking stored for this monthly exam.");
                return Ok(());
            }

            for record in &records {
                let status = if record.is_final { "final" } else { "draft" };
                println!(
                    "- #{} roll {} {} ({:.1} marks, {status})",
                    record.position, record.roll_number, record.student_name, record.total_marks
                );
            }
        }
        Commands::Report { monthly_exam, out } => {
            let pool = connect().await?;
            let exam = db::fetch_monthly_exam(&pool, monthly_exam).await?;
            let summaries = db::fetch_exam_summaries(&pool, monthly_exam).await?;
            let records = db::fetch_ranking(&pool, monthly_exam).await?;
            let report = report::build_report(&exam, &summaries, &records);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::GenerateQuestions {
            class,
            subject,
            chapter,
            difficulty,
            quantity,
        } => {
            let generator = question_generator()?;
            let request = QuestionRequest {
                class_name: class,
                subject,
                chapter,
                difficulty,
                quantity,
            };
            let questions = generator.generate_questions(&request).await?;
            println!("{}", serde_json::to_string_pretty(&questions)?);
        }
    }

    Ok(())
}
