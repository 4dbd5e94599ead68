//! Geo batch CLI
//!
//! Loads countries and cities into SQLite, then extracts the countries
//! having cities to a JSON file and to MongoDB.

use std::{path::PathBuf, process::ExitCode, str::FromStr};

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use mongodb::sync::Client;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use tokio_util::sync::CancellationToken;

use geo_batch::{
    config::AppConfig,
    core::{
        job::JobExecution,
        repository::{JobRepository, SqliteJobRepository},
    },
    geo::{mapping::CountryKeyMapper, run_geo_job, schema::init_schema, Country},
    item::mongodb::MongodbItemWriterBuilder,
};

#[derive(Parser)]
#[command(name = "geo-batch")]
#[command(about = "Load countries and cities, then extract locations", long_about = None)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "geo-batch.json")]
    config: PathBuf,

    /// Resume the last run of the job if it did not complete (a run left by a crashed process also needs --force-unlock)
    #[arg(long)]
    resume: bool,

    /// Name of the job, key of its runs in the job repository
    #[arg(long, default_value = "job1")]
    job_name: String,

    /// Release the claim left on the last incomplete run by a process that died
    #[arg(long, requires = "resume")]
    force_unlock: bool,
}

async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("invalid SQLite url {}", url))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("unable to open {}", url))
}

fn report(execution: &JobExecution) {
    println!(
        "Job {} run {}: {} in {:?}",
        execution.job_name, execution.run_id, execution.status, execution.duration
    );

    for step in &execution.step_executions {
        println!(
            "  {:<20} {:<10} read: {:>8}  written: {:>8}  skipped: {:>6}",
            step.name, step.status, step.read_count, step.write_count, step.skip_count
        );
        if let Some(cause) = &step.failure_cause {
            println!("    cause: {}", cause);
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = AppConfig::from_file(&cli.config)?;

    let pool = connect(&config.database_url).await?;
    init_schema(&pool).await?;

    let repository = SqliteJobRepository::new(connect(&config.repository_url).await?).await?;

    let cancellation = CancellationToken::new();
    let token = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, the job stops at the end of the current chunk");
            token.cancel();
        }
    });

    // The job and the MongoDB sync driver block: run them off the async context.
    let execution = tokio::task::block_in_place(|| -> Result<JobExecution> {
        if cli.force_unlock {
            if let Some(run_id) = repository.find_resumable_run(&cli.job_name)? {
                info!("Releasing run {} of job {}", run_id, cli.job_name);
                repository.release_run(&cli.job_name, run_id)?;
            }
        }

        let client = Client::with_uri_str(&config.mongodb.uri)
            .with_context(|| format!("unable to connect to {}", config.mongodb.uri))?;
        let collection = client
            .database(&config.mongodb.database)
            .collection::<Country>(&config.mongodb.collection);
        let locations = MongodbItemWriterBuilder::new()
            .collection(&collection)
            .key_mapper(&CountryKeyMapper)
            .build()?;

        let execution = run_geo_job(
            &config,
            &pool,
            &repository,
            &locations,
            &cli.job_name,
            cli.resume,
            cancellation,
        )?;
        Ok(execution)
    })?;

    report(&execution);

    if execution.is_completed() {
        Ok(ExitCode::SUCCESS)
    } else {
        if let Some(failed) = execution.first_failure() {
            eprintln!(
                "Step {} failed: {}",
                failed.name,
                failed.failure_cause.as_deref().unwrap_or("unknown cause")
            );
        }
        Ok(ExitCode::FAILURE)
    }
}
