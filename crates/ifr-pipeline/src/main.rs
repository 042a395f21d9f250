//! IFR Pipeline - entry point

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use ifr_common::logging::{init_logging, LogConfig, LogLevel};
use tracing::info;

use ifr_pipeline::{
    config::Config,
    db::{self, state::StateStore},
    orchestrator::Orchestrator,
    pipeline::Pipeline,
    storage::{S3Storage, StorageConfig},
    watcher,
};

#[derive(Parser, Debug)]
#[command(name = "ifr-pipeline")]
#[command(author, version, about = "IFR spreadsheet ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Run the watcher and trigger cycles on a schedule
    Serve,

    /// Run one watcher cycle and exit
    Watch,

    /// Run one pipeline pass over eligible files and exit
    Run,

    /// Reset an abandoned file's retry counter so it is picked up again
    Reset {
        /// Object path of the file to reset
        file_path: String,
    },

    /// Apply database migrations and exit
    Migrate,
}

/// Logging setup: environment variables first, then CLI flags on top, with
/// pipeline defaults filling anything neither side specifies.
fn effective_log_config(verbose: bool) -> Result<LogConfig> {
    let mut config = LogConfig::from_env()?;

    if verbose {
        config.level = LogLevel::Debug;
    }

    if std::env::var("LOG_FILE_PREFIX").is_err() {
        config.log_file_prefix = "ifr-pipeline".to_string();
    }

    if config.filter_directives.is_none() {
        config.filter_directives =
            Some("ifr_pipeline=debug,sqlx=warn,aws_sdk_s3=warn".to_string());
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = effective_log_config(cli.verbose)?;
    init_logging(&log_config)?;

    let config = Config::load()?;
    let pool = db::connect(&config.database).await?;
    info!("database connection pool established");

    let storage_config = StorageConfig::from_env()?;
    let observer = Arc::new(S3Storage::new(storage_config));

    let store = StateStore::new(pool.clone());

    match cli.command {
        Command::Serve => {
            sqlx::migrate!("../../migrations").run(&pool).await?;
            info!("database migrations completed");

            let pipeline = Arc::new(Pipeline::new(
                pool.clone(),
                store.clone(),
                observer.clone(),
                config.pipeline.clone(),
            ));
            let orchestrator =
                Orchestrator::new(store, observer, pipeline, config.pipeline.clone());
            let handle = orchestrator.start();

            tokio::signal::ctrl_c().await?;
            info!("shutdown signal received");
            handle.abort();
        },
        Command::Watch => {
            let has_work = watcher::run_watcher_cycle(
                observer.as_ref(),
                &store,
                &config.pipeline.watch_prefix,
            )
            .await?;
            info!(eligible = has_work, "watcher cycle complete");
        },
        Command::Run => {
            let pipeline = Pipeline::new(pool, store, observer, config.pipeline);
            let summary = pipeline.run().await?;
            info!(
                processed = summary.processed,
                failed = summary.failed,
                skipped = summary.skipped,
                "pipeline run complete"
            );
        },
        Command::Reset { file_path } => {
            if store.reset_retries(&file_path).await? {
                info!(%file_path, "retries reset, file is pending again");
            } else {
                info!(%file_path, "no such file in the state table");
            }
        },
        Command::Migrate => {
            sqlx::migrate!("../../migrations").run(&pool).await?;
            info!("database migrations completed");
        },
    }

    Ok(())
}
