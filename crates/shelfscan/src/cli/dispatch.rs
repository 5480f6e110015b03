//! Dispatcher subcommand.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tracing::error;

use shelfscan_worker::{Dispatcher, WorkerContext};

#[derive(Args, Debug)]
pub struct DispatchArgs {
    /// Max jobs per dispatch cycle.
    #[arg(long, default_value_t = 50)]
    pub batch_size: i64,

    /// Seconds between cycles.
    #[arg(long, default_value_t = 10)]
    pub poll_interval: u64,

    /// Run one cycle and exit.
    #[arg(long)]
    pub once: bool,

    /// Print pipeline stats as JSON and exit.
    #[arg(long)]
    pub stats: bool,
}

pub async fn run(ctx: &WorkerContext, args: DispatchArgs) -> Result<()> {
    let dispatcher = Dispatcher::new(ctx.clone(), args.batch_size);

    if args.stats {
        let stats = dispatcher.stats().await?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    loop {
        if let Err(e) = dispatcher.run_cycle().await {
            error!(error = %e, "dispatch cycle failed");
        }
        if args.once {
            break;
        }
        tokio::time::sleep(Duration::from_secs(args.poll_interval)).await;
    }
    Ok(())
}
