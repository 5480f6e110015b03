//! Maintenance: purge old terminal jobs.

use anyhow::Result;
use clap::Args;

use shelfscan_worker::WorkerContext;

#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Purge completed/failed/cancelled jobs older than this many days.
    #[arg(long)]
    pub days: Option<i64>,
}

pub async fn run(ctx: &WorkerContext, args: CleanupArgs) -> Result<()> {
    let days = args.days.unwrap_or(ctx.settings.retention_days);
    let purged = ctx.store.jobs().cleanup_old_completed(days).await?;
    println!("Purged {purged} jobs older than {days} days");
    Ok(())
}
