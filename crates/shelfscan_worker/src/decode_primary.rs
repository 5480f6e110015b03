//! Primary decode worker: runs the local scanner on normalised images.
//!
//! The local scanner is deterministic and cheap, so when it reads anything
//! valid it is authoritative — even multiple readings complete the image
//! without review. Only an empty result escalates to the AI fallback.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, warn};

use shelfscan_barcode::{normalize_to_ean13, validate, Validation};
use shelfscan_model::{paths, DetectionRecord, DetectionSource, ImageRecord, ImageStatus, JobType};

use crate::context::WorkerContext;
use crate::scanner::{BarcodeScanner, ScanResult};
use crate::DEFAULT_LEASE_SECS;

pub struct PrimaryDecodeWorker {
    ctx: WorkerContext,
    scanner: Arc<dyn BarcodeScanner>,
    worker_id: String,
}

impl PrimaryDecodeWorker {
    pub fn new(ctx: WorkerContext, scanner: Arc<dyn BarcodeScanner>) -> Self {
        Self {
            ctx,
            scanner,
            worker_id: WorkerContext::worker_id("decode-primary"),
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
                    Some(JobType::DecodePrimary),
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
                    warn!(image_id = %image.image_id, error = %e, "primary decode failed");
                    let images = self.ctx.store.images();
                    images
                        .add_processing_error(&image.image_id, "decode_primary", &e.to_string(), None)
                        .await?;
                    // Scanner trouble is not terminal; hand the image to the
                    // AI fallback instead.
                    let mut latest = images
                        .get(&image.image_id)
                        .await?
                        .unwrap_or_else(|| image.clone());
                    latest.processing.needs_fallback = true;
                    images
                        .mark_needs_fallback(&image.image_id, &latest.processing)
                        .await?;
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
        if image.processing.needs_fallback {
            info!(image_id = %image.image_id, "marked for fallback, skipping");
            return Ok(false);
        }
        match image.status {
            ImageStatus::Preprocessed | ImageStatus::DecodingPrimary => {}
            status => {
                info!(image_id = %image.image_id, %status, "not decodable, skipping");
                return Ok(false);
            }
        }

        images
            .update_status(&image.image_id, ImageStatus::DecodingPrimary)
            .await?;

        let blob_path = image
            .preprocessing
            .normalized_path
            .clone()
            .unwrap_or_else(|| paths::preprocessed(&image.batch_id, &image.image_id, "jpg"));

        let start = Instant::now();
        let bytes = self
            .ctx
            .blobs
            .get(&blob_path)
            .await
            .context("downloading normalised image")?;

        let readings = self.scanner.scan(&bytes).context("local scan")?;
        let duration_ms = start.elapsed().as_millis() as u64;

        let valid: Vec<(ScanResult, Validation)> = readings
            .into_iter()
            .map(|r| {
                let v = validate(&r.code);
                (r, v)
            })
            .filter(|(_, v)| v.is_valid())
            .collect();

        info!(
            image_id = %image.image_id,
            valid_found = valid.len(),
            duration_ms,
            "primary decoding complete"
        );

        let mut image = image.clone();
        image.add_decoder_attempt(
            "local",
            !valid.is_empty(),
            false,
            valid.len(),
            Some(duration_ms),
            None,
        );

        if valid.is_empty() {
            // Nothing readable: stay preprocessed, raise the fallback flag.
            // The blob is not moved; the fallback worker reads it in place.
            images
                .mark_needs_fallback(&image.image_id, &image.processing)
                .await?;
            return Ok(true);
        }

        let mut records = Vec::with_capacity(valid.len());
        for (reading, validation) in &valid {
            let normalized = normalize_to_ean13(&reading.code, validation.symbology);
            let product = match self.ctx.store.products().get_by_any_code(&reading.code).await? {
                Some(p) => Some(p),
                None => match &normalized {
                    Some(code) => self.ctx.store.products().get_by_any_code(code).await?,
                    None => None,
                },
            };

            let mut detection = DetectionRecord::new(
                image.image_id.clone(),
                image.batch_id.clone(),
                reading.code.clone(),
                DetectionSource::PrimaryLocal,
            );
            detection.source_filename = image.source_filename.clone();
            detection.symbology = validation.symbology;
            detection.normalized_code = normalized;
            detection.rotation_degrees = Some(reading.rotation_degrees);
            detection.checksum_valid = validation.checksum_valid;
            detection.length_valid = validation.length_valid;
            detection.numeric_only = validation.numeric_only;
            detection.product_found = product.is_some();
            detection.product_id = product.map(|p| p.id.to_string());
            records.push(detection);
        }
        detections.create_many(&records).await?;

        let dest_path = paths::processed(&image.batch_id, &image.image_id, "jpg");
        self.ctx
            .blobs
            .r#move(&blob_path, &dest_path)
            .await
            .context("moving blob to processed")?;

        images
            .set_decoded(
                &image.image_id,
                ImageStatus::DecodedPrimary,
                &dest_path,
                records.len() as i64,
                &image.processing,
            )
            .await?;

        info!(
            image_id = %image.image_id,
            detections = records.len(),
            "image decoded by local scanner"
        );
        Ok(true)
    }
}
