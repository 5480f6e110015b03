//! Fallback decode worker: sends images the local scanner gave up on to the
//! AI vision decoder and routes the outcome.
//!
//! Zero valid readings fail the image; exactly one is a success; two or
//! more are ambiguous and go to manual review — the AI decoder is not
//! trusted to disambiguate its own output.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, warn};

use shelfscan_ai::{BarcodeExtractor, ExtractedCode, BARCODE_EXTRACTION_PROMPT};
use shelfscan_barcode::normalize_to_ean13;
use shelfscan_model::{paths, DetectionRecord, DetectionSource, ImageRecord, ImageStatus, JobType};

use crate::context::WorkerContext;
use crate::DEFAULT_LEASE_SECS;

pub struct FallbackDecodeWorker {
    ctx: WorkerContext,
    extractor: Arc<dyn BarcodeExtractor>,
    worker_id: String,
}

impl FallbackDecodeWorker {
    pub fn new(ctx: WorkerContext, extractor: Arc<dyn BarcodeExtractor>) -> Self {
        Self {
            ctx,
            extractor,
            worker_id: WorkerContext::worker_id("decode-fallback"),
        }
    }

    pub async fn run_batch(&self, batch_size: usize) -> Result<usize> {
        let mut processed = 0;
        for _ in 0..batch_size {
            let job = self
                .ctx
                .store
                .jobs()
                .dequeue(
                    Some(JobType::DecodeFallback),
                    &self.worker_id,
                    DEFAULT_LEASE_SECS,
                )
                .await?;
            let Some(job) = job else { break };

            let Some(image) = self.ctx.store.images().get(&job.image_id).await? else {
                self.ctx
                    .store
                    .jobs()
                    .fail(&job.job_id, "image not found", None, job.max_attempts)
                    .await?;
                continue;
            };

            match self.process_image(&image).await {
                Ok(true) => {
                    self.ctx.store.jobs().complete(&job.job_id, None).await?;
                    processed += 1;
                }
                Ok(false) => {
                    self.ctx.store.jobs().complete(&job.job_id, None).await?;
                }
                Err(e) => {
                    warn!(image_id = %image.image_id, error = %e, "fallback decode failed");
                    fail_image(&self.ctx, &image, "decode_fallback", &e).await?;
                    self.ctx
                        .store
                        .jobs()
                        .fail(&job.job_id, &e.to_string(), None, job.max_attempts)
                        .await?;
                }
            }
        }
        Ok(processed)
    }

    async fn process_image(&self, image: &ImageRecord) -> Result<bool> {
        let images = self.ctx.store.images();
        let detections = self.ctx.store.detections();

        if detections.exists_for_image(&image.image_id).await? {
            info!(image_id = %image.image_id, "detections exist, skipping");
            return Ok(false);
        }
        if !image.processing.needs_fallback {
            info!(image_id = %image.image_id, "fallback flag not set, skipping");
            return Ok(false);
        }
        match image.status {
            ImageStatus::Preprocessed
            | ImageStatus::DecodedPrimary
            | ImageStatus::DecodingFallback => {}
            status => {
                info!(image_id = %image.image_id, %status, "not eligible for fallback, skipping");
                return Ok(false);
            }
        }

        images
            .update_status(&image.image_id, ImageStatus::DecodingFallback)
            .await?;

        let blob_path = source_blob_path(image);
        let start = Instant::now();
        let bytes = self
            .ctx
            .blobs
            .get(&blob_path)
            .await
            .context("downloading image for fallback")?;

        let response = self
            .extractor
            .extract(&bytes, BARCODE_EXTRACTION_PROMPT)
            .await
            .context("AI extraction")?;
        let duration_ms = start.elapsed().as_millis() as u64;

        let valid: Vec<ExtractedCode> = response
            .results
            .iter()
            .filter(|r| r.is_valid())
            .cloned()
            .collect();

        info!(
            image_id = %image.image_id,
            total_found = response.results.len(),
            valid_found = valid.len(),
            duration_ms,
            tokens_used = response.tokens_used.unwrap_or(0),
            "AI extraction complete"
        );

        let mut image = image.clone();
        image.add_decoder_attempt(
            "ai",
            !valid.is_empty(),
            true,
            valid.len(),
            Some(duration_ms),
            None,
        );
        if let Some(tokens) = response.tokens_used {
            image.add_ai_tokens(tokens);
        }

        apply_ai_outcome(&self.ctx, &image, &blob_path, &valid, true).await?;
        Ok(true)
    }
}

/// Blob to decode: the normalised artifact when preprocessing ran, the raw
/// upload otherwise.
pub(crate) fn source_blob_path(image: &ImageRecord) -> String {
    image
        .preprocessing
        .normalized_path
        .clone()
        .unwrap_or_else(|| image.source_path.clone())
}

/// Route the validated AI readings: 0 fails the image, 1 succeeds, 2+ go to
/// review. `move_on_failure` is false for retries whose blob already sits
/// in failed/.
pub(crate) async fn apply_ai_outcome(
    ctx: &WorkerContext,
    image: &ImageRecord,
    blob_path: &str,
    valid: &[ExtractedCode],
    move_on_failure: bool,
) -> Result<()> {
    let images = ctx.store.images();
    let detections = ctx.store.detections();

    match valid.len() {
        0 => {
            if move_on_failure {
                let dest = paths::failed(&image.batch_id, &image.image_id, "jpg");
                ctx.blobs
                    .r#move(blob_path, &dest)
                    .await
                    .context("moving blob to failed")?;
                images
                    .set_failed(&image.image_id, Some(&dest), Some(&image.processing))
                    .await?;
            } else {
                images
                    .set_failed(&image.image_id, None, Some(&image.processing))
                    .await?;
            }
            info!(image_id = %image.image_id, "no barcodes found, image failed");
        }
        1 => {
            let detection = ai_detection(ctx, image, &valid[0], false).await?;
            detections.create(&detection).await?;

            let dest = paths::processed(&image.batch_id, &image.image_id, "jpg");
            ctx.blobs
                .r#move(blob_path, &dest)
                .await
                .context("moving blob to processed")?;
            images
                .set_decoded(
                    &image.image_id,
                    ImageStatus::DecodedFallback,
                    &dest,
                    1,
                    &image.processing,
                )
                .await?;
            info!(image_id = %image.image_id, code = %valid[0].code, "image decoded by AI");
        }
        _ => {
            let mut records = Vec::with_capacity(valid.len());
            for result in valid {
                records.push(ai_detection(ctx, image, result, true).await?);
            }
            detections.create_many(&records).await?;

            let dest = paths::manual_review(&image.batch_id, &image.image_id, "jpg");
            ctx.blobs
                .r#move(blob_path, &dest)
                .await
                .context("moving blob to manual review")?;
            images
                .set_manual_review(&image.image_id, &dest, records.len() as i64, &image.processing)
                .await?;
            info!(
                image_id = %image.image_id,
                detections = records.len(),
                "multiple barcodes found, needs manual review"
            );
        }
    }
    Ok(())
}

/// Build one detection from a validated AI reading.
pub(crate) async fn ai_detection(
    ctx: &WorkerContext,
    image: &ImageRecord,
    result: &ExtractedCode,
    ambiguous: bool,
) -> Result<DetectionRecord> {
    let normalized = normalize_to_ean13(&result.code, result.validation.symbology);
    let product = match ctx.store.products().get_by_any_code(&result.code).await? {
        Some(p) => Some(p),
        None => match &normalized {
            Some(code) => ctx.store.products().get_by_any_code(code).await?,
            None => None,
        },
    };

    let mut detection = DetectionRecord::new(
        image.image_id.clone(),
        image.batch_id.clone(),
        result.code.clone(),
        DetectionSource::FallbackAi,
    );
    detection.source_filename = image.source_filename.clone();
    detection.symbology = result.validation.symbology;
    detection.normalized_code = normalized;
    detection.confidence = Some(result.confidence);
    detection.checksum_valid = result.validation.checksum_valid;
    detection.length_valid = result.validation.length_valid;
    detection.numeric_only = result.validation.numeric_only;
    detection.ambiguous = ambiguous;
    detection.ai_confidence = Some(result.confidence);
    detection.ai_symbology_guess = Some(result.symbology_guess.clone());
    detection.product_found = product.is_some();
    detection.product_id = product.map(|p| p.id.to_string());
    Ok(detection)
}

/// Error boundary for the fallback path: record the error, move the blob to
/// failed/ best-effort, and fail the image.
pub(crate) async fn fail_image(
    ctx: &WorkerContext,
    image: &ImageRecord,
    stage: &str,
    error: &anyhow::Error,
) -> Result<()> {
    let images = ctx.store.images();
    images
        .add_processing_error(&image.image_id, stage, &error.to_string(), None)
        .await?;

    let blob_path = source_blob_path(image);
    let dest = paths::failed(&image.batch_id, &image.image_id, "jpg");
    match ctx.blobs.r#move(&blob_path, &dest).await {
        Ok(()) => {
            images.set_failed(&image.image_id, Some(&dest), None).await?;
        }
        Err(move_err) => {
            warn!(
                image_id = %image.image_id,
                error = %move_err,
                "failed to move blob to failed folder"
            );
            images.set_failed(&image.image_id, None, None).await?;
        }
    }
    Ok(())
}
