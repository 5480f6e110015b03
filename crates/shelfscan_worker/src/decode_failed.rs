//! Retry worker: re-runs the AI decoder on failed images.
//!
//! The AI decoder is non-deterministic, so a second call on the same image
//! may read what the first one missed. Retries are bounded by the total
//! fallback attempt count persisted on the image; there is no job type for
//! retries — the worker polls the image store directly.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, warn};

use shelfscan_ai::{BarcodeExtractor, ExtractedCode, BARCODE_EXTRACTION_PROMPT};
use shelfscan_model::{paths, ImageRecord, ImageStatus};

use crate::context::WorkerContext;
use crate::decode_fallback::apply_ai_outcome;

/// Total AI attempts allowed per image, the original fallback included.
pub const MAX_AI_ATTEMPTS: i64 = 3;

pub struct RetryWorker {
    ctx: WorkerContext,
    extractor: Arc<dyn BarcodeExtractor>,
}

impl RetryWorker {
    pub fn new(ctx: WorkerContext, extractor: Arc<dyn BarcodeExtractor>) -> Self {
        Self { ctx, extractor }
    }

    pub async fn run_batch(&self, batch_size: usize) -> Result<usize> {
        let candidates = self
            .ctx
            .store
            .images()
            .find_failed_for_retry(batch_size as i64, MAX_AI_ATTEMPTS)
            .await?;
        if !candidates.is_empty() {
            info!(count = candidates.len(), "found failed images for retry");
        }

        let mut processed = 0;
        for image in &candidates {
            match self.process_image(image).await {
                Ok(true) => processed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(image_id = %image.image_id, error = %e, "retry failed");
                    let images = self.ctx.store.images();
                    images
                        .add_processing_error(&image.image_id, "decode_failed", &e.to_string(), None)
                        .await?;
                    // The blob already sits in failed/; just settle the status.
                    images.set_failed(&image.image_id, None, None).await?;
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

        let attempt_number = image.processing.fallback_attempts.len() + 1;
        info!(
            image_id = %image.image_id,
            attempt = attempt_number,
            max_attempts = MAX_AI_ATTEMPTS,
            "retrying AI decode"
        );

        images
            .update_status(&image.image_id, ImageStatus::DecodingFallback)
            .await?;

        // The failed transition moved the blob; fall back to the canonical
        // failed path when the recorded one is missing.
        let blob_path = image
            .final_blob_path
            .clone()
            .unwrap_or_else(|| paths::failed(&image.batch_id, &image.image_id, "jpg"));

        let start = Instant::now();
        let bytes = self
            .ctx
            .blobs
            .get(&blob_path)
            .await
            .context("downloading failed image")?;

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
            attempt = attempt_number,
            total_found = response.results.len(),
            valid_found = valid.len(),
            duration_ms,
            tokens_used = response.tokens_used.unwrap_or(0),
            "AI retry complete"
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

        // Unlike the first fallback pass the blob already lives in failed/;
        // a still-empty result leaves it there.
        apply_ai_outcome(&self.ctx, &image, &blob_path, &valid, false).await?;
        Ok(true)
    }
}
