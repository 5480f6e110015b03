//! Pipeline statistics subcommand.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use shelfscan_worker::WorkerContext;

#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Restrict image counts to one batch.
    #[arg(long)]
    pub batch_id: Option<String>,
}

pub async fn run(ctx: &WorkerContext, args: StatsArgs) -> Result<()> {
    let image_stats = ctx.store.images().stats(args.batch_id.as_deref()).await?;
    let detection_stats = ctx
        .store
        .detections()
        .stats_by_source(args.batch_id.as_deref())
        .await?;
    let queue_stats = ctx.store.jobs().stats().await?;

    let output = json!({
        "images": image_stats
            .into_iter()
            .collect::<std::collections::BTreeMap<String, i64>>(),
        "detections_by_source": detection_stats
            .into_iter()
            .collect::<std::collections::BTreeMap<String, i64>>(),
        "jobs": queue_stats
            .iter()
            .map(|s| json!({
                "job_type": s.job_type,
                "status": s.status,
                "count": s.count,
            }))
            .collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
