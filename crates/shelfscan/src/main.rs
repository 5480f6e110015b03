//! Shelfscan unified launcher.
//!
//! One binary hosts every surface of the pipeline: upload, the four
//! workers, the dispatcher, review resolution, reports, and maintenance.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use shelfscan_blob::FsBlobStore;
use shelfscan_logging::{init_logging, LogConfig};
use shelfscan_model::Settings;
use shelfscan_store::Store;
use shelfscan_worker::WorkerContext;

mod cli;

#[derive(Parser, Debug)]
#[command(name = "shelfscan", about = "Retail barcode extraction pipeline", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the state store schema and indexes.
    InitDb,
    /// Upload local images into a batch and queue them for processing.
    Upload(cli::upload::UploadArgs),
    /// Run a pipeline worker.
    Worker(cli::worker::WorkerArgs),
    /// Run the job dispatcher.
    Dispatch(cli::dispatch::DispatchArgs),
    /// Resolve images waiting for manual review.
    Review(cli::review::ReviewArgs),
    /// Report detected codes for a batch.
    Report(cli::report::ReportArgs),
    /// Show pipeline statistics.
    Stats(cli::stats::StatsArgs),
    /// Purge old terminal jobs.
    Cleanup(cli::cleanup::CleanupArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let args = Cli::parse();
    let settings = Settings::from_env().context("loading settings")?;
    init_logging(LogConfig {
        level: &settings.log_level,
        format: settings.log_format,
    })?;

    let store = Store::connect(&settings.database_url)
        .await
        .with_context(|| format!("opening state store: {}", settings.database_url))?;
    store.init_schema().await.context("initialising schema")?;
    let blobs = Arc::new(FsBlobStore::new(
        settings.blob_root.clone(),
        &settings.blob_container,
    ));
    let ctx = WorkerContext::new(store, blobs, settings);

    match args.command {
        Commands::InitDb => {
            // Schema creation already ran above; this subcommand exists so
            // deployments can initialise without doing any other work.
            println!("state store ready at {}", ctx.settings.database_url);
            Ok(())
        }
        Commands::Upload(args) => cli::upload::run(&ctx, args).await,
        Commands::Worker(args) => cli::worker::run(&ctx, args).await,
        Commands::Dispatch(args) => cli::dispatch::run(&ctx, args).await,
        Commands::Review(args) => cli::review::run(&ctx, args).await,
        Commands::Report(args) => cli::report::run(&ctx, args).await,
        Commands::Stats(args) => cli::stats::run(&ctx, args).await,
        Commands::Cleanup(args) => cli::cleanup::run(&ctx, args).await,
    }
}
