//! Review resolution: applies a human decision to an ambiguous image.
//!
//! After `choose`, exactly one non-rejected detection remains for the
//! image. `skip` leaves everything untouched so the reviewer can come back
//! later.

use anyhow::{bail, Context, Result};
use tracing::info;

use shelfscan_model::{paths, ImageStatus};

use crate::context::WorkerContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewAction {
    /// This detection is the authoritative reading.
    Choose { detection_id: i64 },
    /// None of the candidates is right; the image has no usable barcode.
    NoBarcode,
    /// Defer the decision.
    Skip,
}

#[derive(Debug, Clone)]
pub struct ReviewDecision {
    pub action: ReviewAction,
    pub reviewer: Option<String>,
}

pub async fn apply_review_decision(
    ctx: &WorkerContext,
    image_id: &str,
    decision: &ReviewDecision,
) -> Result<()> {
    if decision.action == ReviewAction::Skip {
        return Ok(());
    }

    let images = ctx.store.images();
    let detections = ctx.store.detections();
    let image = images
        .get(image_id)
        .await?
        .with_context(|| format!("image not found: {image_id}"))?;
    if image.status != ImageStatus::ManualReview {
        bail!(
            "image {image_id} is not awaiting review (status: {})",
            image.status
        );
    }
    let blob_path = image
        .final_blob_path
        .clone()
        .unwrap_or_else(|| paths::manual_review(&image.batch_id, &image.image_id, "jpg"));
    let reviewer = decision.reviewer.as_deref();

    match decision.action {
        ReviewAction::Choose { detection_id } => {
            let detection = detections
                .get(detection_id)
                .await?
                .with_context(|| format!("detection not found: {detection_id}"))?;
            if detection.image_id != image_id {
                bail!(
                    "detection {detection_id} belongs to image {}, not {image_id}",
                    detection.image_id
                );
            }

            detections.mark_chosen(detection_id, reviewer).await?;
            detections
                .reject_other_detections(image_id, detection_id, reviewer)
                .await?;

            let dest = paths::processed(&image.batch_id, &image.image_id, "jpg");
            ctx.blobs
                .r#move(&blob_path, &dest)
                .await
                .context("moving blob to processed")?;
            images
                .set_reviewed(image_id, ImageStatus::DecodedManual, &dest, 1)
                .await?;
            info!(image_id, detection_id, "review: detection chosen");
        }
        ReviewAction::NoBarcode => {
            detections.reject_all_for_image(image_id, reviewer).await?;

            let dest = paths::failed(&image.batch_id, &image.image_id, "jpg");
            ctx.blobs
                .r#move(&blob_path, &dest)
                .await
                .context("moving blob to failed")?;
            images
                .set_reviewed(image_id, ImageStatus::Failed, &dest, 0)
                .await?;
            info!(image_id, "review: no barcode");
        }
        ReviewAction::Skip => unreachable!(),
    }
    Ok(())
}
