use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod error;
mod forecast;
mod models;
mod server;

use config::Config;
use models::ForecastResponse;

#[derive(Parser)]
#[command(name = "performance-estimator")]
#[command(about = "Per-student performance forecasts for Aula Digital", long_about = None)]
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
    /// Import grade history from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Run the HTTP prediction service
    Serve,
    /// Compute one forecast and print it as JSON
    Estimate {
        #[arg(long)]
        student_id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
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
        Commands::Import { csv } => {
            let inserted = db::import_grades_csv(&pool, &csv).await?;
            println!("Inserted {inserted} grade records from {}.", csv.display());
        }
        Commands::Serve => {
            server::serve(pool, config).await?;
        }
        Commands::Estimate { student_id } => {
            let student = db::find_student(&pool, student_id)
                .await?
                .with_context(|| format!("student {student_id} not found"))?;

            let grades = db::list_grades(&pool, student.id).await?;
            let attendance = db::list_attendance(&pool, student.id).await?;
            let participation = db::list_participation(&pool, student.id).await?;

            let forecast = forecast::estimate(
                &grades,
                &attendance,
                &participation,
                Utc::now(),
                &config.estimator,
            );

            let response = ForecastResponse { student, forecast };
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}
