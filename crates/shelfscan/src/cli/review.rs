//! Review subcommand: the CLI face of ambiguity resolution.

use anyhow::Result;
use clap::{Args, Subcommand};

use shelfscan_worker::{apply_review_decision, ReviewAction, ReviewDecision, WorkerContext};

#[derive(Args, Debug)]
pub struct ReviewArgs {
    #[command(subcommand)]
    pub command: ReviewCommand,
}

#[derive(Subcommand, Debug)]
pub enum ReviewCommand {
    /// List images waiting for review with their candidate detections.
    List {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Choose one detection as the authoritative reading.
    Choose {
        #[arg(long)]
        image_id: String,
        #[arg(long)]
        detection_id: i64,
        #[arg(long)]
        reviewer: Option<String>,
    },
    /// Mark the image as having no usable barcode.
    NoBarcode {
        #[arg(long)]
        image_id: String,
        #[arg(long)]
        reviewer: Option<String>,
    },
}

pub async fn run(ctx: &WorkerContext, args: ReviewArgs) -> Result<()> {
    match args.command {
        ReviewCommand::List { limit } => {
            let images = ctx.store.images().find_for_manual_review(limit).await?;
            if images.is_empty() {
                println!("No images waiting for review.");
                return Ok(());
            }
            for image in images {
                println!(
                    "{}  batch={}  file={}",
                    image.image_id,
                    image.batch_id,
                    image.source_filename.as_deref().unwrap_or("-")
                );
                let detections = ctx.store.detections().find_by_image(&image.image_id).await?;
                for d in detections.iter().filter(|d| !d.rejected) {
                    println!(
                        "    [{}] {}  {}  confidence={}",
                        d.id,
                        d.code,
                        d.symbology.as_label(),
                        d.ai_confidence
                            .map(|c| format!("{c:.2}"))
                            .unwrap_or_else(|| "-".to_string()),
                    );
                }
            }
            Ok(())
        }
        ReviewCommand::Choose {
            image_id,
            detection_id,
            reviewer,
        } => {
            apply_review_decision(
                ctx,
                &image_id,
                &ReviewDecision {
                    action: ReviewAction::Choose { detection_id },
                    reviewer,
                },
            )
            .await?;
            println!("Detection {detection_id} chosen for image {image_id}");
            Ok(())
        }
        ReviewCommand::NoBarcode { image_id, reviewer } => {
            apply_review_decision(
                ctx,
                &image_id,
                &ReviewDecision {
                    action: ReviewAction::NoBarcode,
                    reviewer,
                },
            )
            .await?;
            println!("Image {image_id} marked as having no barcode");
            Ok(())
        }
    }
}
