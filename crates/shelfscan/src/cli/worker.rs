//! Worker subcommand: runs one of the four pipeline workers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use shelfscan_ai::{BarcodeExtractor, GeminiConfig, GeminiExtractor};
use shelfscan_worker::{
    run_poll_loop, FallbackDecodeWorker, NullScanner, PassthroughPreprocessor, PollOptions,
    PreprocessWorker, PrimaryDecodeWorker, RetryWorker, WorkerContext,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WorkerKind {
    Preprocess,
    DecodePrimary,
    DecodeFallback,
    DecodeFailed,
}

#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Which worker to run.
    #[arg(value_enum)]
    pub kind: WorkerKind,

    /// Images per batch.
    #[arg(long, env = "SHELFSCAN_WORKER_BATCH_SIZE", default_value_t = 10)]
    pub batch_size: usize,

    /// Seconds between polls.
    #[arg(long, env = "SHELFSCAN_WORKER_POLL_INTERVAL", default_value_t = 5)]
    pub poll_interval: u64,

    /// Run one batch and exit.
    #[arg(long)]
    pub once: bool,

    /// Keep running even when no work is left.
    #[arg(long)]
    pub daemon: bool,
}

pub async fn run(ctx: &WorkerContext, args: WorkerArgs) -> Result<()> {
    let options = PollOptions {
        poll_interval: Duration::from_secs(args.poll_interval),
        once: args.once,
        daemon: args.daemon,
    };
    let batch_size = args.batch_size;

    match args.kind {
        WorkerKind::Preprocess => {
            let worker = Arc::new(PreprocessWorker::new(
                ctx.clone(),
                Arc::new(PassthroughPreprocessor),
            ));
            run_poll_loop("preprocess", options, || {
                let worker = worker.clone();
                async move { worker.run_batch(batch_size).await }
            })
            .await
        }
        WorkerKind::DecodePrimary => {
            let worker = Arc::new(PrimaryDecodeWorker::new(
                ctx.clone(),
                Arc::new(NullScanner),
            ));
            run_poll_loop("decode_primary", options, || {
                let worker = worker.clone();
                async move { worker.run_batch(batch_size).await }
            })
            .await
        }
        WorkerKind::DecodeFallback => {
            let worker = Arc::new(FallbackDecodeWorker::new(ctx.clone(), extractor(ctx)?));
            run_poll_loop("decode_fallback", options, || {
                let worker = worker.clone();
                async move { worker.run_batch(batch_size).await }
            })
            .await
        }
        WorkerKind::DecodeFailed => {
            let worker = Arc::new(RetryWorker::new(ctx.clone(), extractor(ctx)?));
            run_poll_loop("decode_failed", options, || {
                let worker = worker.clone();
                async move { worker.run_batch(batch_size).await }
            })
            .await
        }
    }
}

fn extractor(ctx: &WorkerContext) -> Result<Arc<dyn BarcodeExtractor>> {
    let api_key = ctx
        .settings
        .ai_api_key
        .clone()
        .context("AI decoder requires SHELFSCAN_AI_API_KEY")?;
    let mut config = GeminiConfig::new(api_key, ctx.settings.ai_model.clone());
    config.timeout = Duration::from_secs(ctx.settings.ai_timeout_secs);
    config.max_output_tokens = ctx.settings.ai_max_tokens;
    config.temperature = ctx.settings.ai_temperature;
    Ok(Arc::new(GeminiExtractor::new(config)?))
}
