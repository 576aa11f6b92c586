use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

mod analytics;
mod api;
mod config;
mod counselor;
mod db;
mod error;
mod extraction;
mod gemini;
mod models;
mod report;
mod schedule;
mod upload;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "student-companion")]
#[command(about = "Timetable extraction and wellbeing chat service for students", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Log at debug level unless RUST_LOG says otherwise
        #[arg(long)]
        debug: bool,
    },
    /// Create or upgrade the database schema
    InitDb,
    /// Generate a markdown wellbeing report for one student
    Report {
        #[arg(long)]
        student_id: String,
        #[arg(long, default_value_t = analytics::DEFAULT_WINDOW_DAYS)]
        since_days: i64,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Export per-session mood rows as CSV
    ExportMoods {
        #[arg(long)]
        student_id: String,
        #[arg(long, default_value_t = analytics::DEFAULT_WINDOW_DAYS)]
        since_days: i64,
        #[arg(long, default_value = "moods.csv")]
        out: PathBuf,
    },
}

fn init_tracing(debug: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            tracing_subscriber::EnvFilter::new("debug")
        } else {
            tracing_subscriber::EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .init();
}

async fn connect(config: &Config) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(matches!(cli.command, Commands::Serve { debug: true }));

    let config = Config::from_env()?;
    let pool = connect(&config).await?;

    match cli.command {
        Commands::Serve { .. } => {
            db::init_db(&pool).await?;

            let model = gemini::GeminiClient::new(config.gemini.clone())?;
            tracing::info!(
                environment = %config.environment,
                gemini_configured = model.is_configured(),
                "starting student companion API"
            );
            if !model.is_configured() {
                tracing::warn!("GEMINI_API_KEY is not set; model-backed routes will fall back or fail");
            }

            api::serve(Arc::new(api::ApiState {
                pool,
                model,
                config,
            }))
            .await?;
        }
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Report {
            student_id,
            since_days,
            out,
        } => {
            let since = analytics::window_start(since_days);
            let conversations = db::fetch_conversations_since(&pool, &student_id, since).await?;
            let report = report::build_report(&student_id, since_days, since, &conversations);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::ExportMoods {
            student_id,
            since_days,
            out,
        } => {
            let since = analytics::window_start(since_days);
            let conversations = db::fetch_conversations_since(&pool, &student_id, since).await?;
            let file = std::fs::File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            let written = report::write_mood_csv(file, &conversations)?;
            println!("Exported {written} sessions to {}.", out.display());
        }
    }

    Ok(())
}
