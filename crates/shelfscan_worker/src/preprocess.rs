//! Preprocess worker: normalises pending images and archives originals.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use shelfscan_model::{paths, ImageRecord, ImageStatus, JobType, PreprocessingInfo};

use crate::context::WorkerContext;
use crate::DEFAULT_LEASE_SECS;

/// Image normalisation capability: a pure `bytes -> bytes + metadata`
/// function. The actual grayscale/resize/denoise/CLAHE algorithm lives
/// behind this seam.
pub trait Preprocessor: Send + Sync {
    fn preprocess(&self, image: &[u8]) -> Result<(Vec<u8>, PreprocessingInfo)>;
}

/// Identity preprocessor: bytes pass through untouched and the metadata
/// records that no normalisation was applied.
#[derive(Debug, Default)]
pub struct PassthroughPreprocessor;

impl Preprocessor for PassthroughPreprocessor {
    fn preprocess(&self, image: &[u8]) -> Result<(Vec<u8>, PreprocessingInfo)> {
        Ok((image.to_vec(), PreprocessingInfo::default()))
    }
}

pub struct PreprocessWorker {
    ctx: WorkerContext,
    preprocessor: Arc<dyn Preprocessor>,
    worker_id: String,
}

impl PreprocessWorker {
    pub fn new(ctx: WorkerContext, preprocessor: Arc<dyn Preprocessor>) -> Self {
        Self {
            ctx,
            preprocessor,
            worker_id: WorkerContext::worker_id("preprocess"),
        }
    }

    /// Claim and run up to `batch_size` preprocess jobs. Returns how many
    /// images were processed.
    pub async fn run_batch(&self, batch_size: usize) -> Result<usize> {
        let mut processed = 0;
        for _ in 0..batch_size {
            let job = self
                .ctx
                .store
                .jobs()
                .dequeue(Some(JobType::Preprocess), &self.worker_id, DEFAULT_LEASE_SECS)
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
                    // Idempotency guard fired; nothing left to do.
                    self.ctx.store.jobs().complete(&job.job_id, None).await?;
                }
                Err(e) => {
                    warn!(image_id = %image.image_id, error = %e, "preprocess failed");
                    self.ctx
                        .store
                        .images()
                        .add_processing_error(&image.image_id, "preprocess", &e.to_string(), None)
                        .await?;
                    self.ctx
                        .store
                        .images()
                        .set_failed(&image.image_id, None, None)
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

    /// Returns Ok(false) when the idempotency guard skipped the image.
    async fn process_image(&self, image: &ImageRecord) -> Result<bool> {
        if image.preprocessing.normalized_path.is_some() {
            info!(image_id = %image.image_id, "already preprocessed, skipping");
            return Ok(false);
        }
        if image.status != ImageStatus::Pending && image.status != ImageStatus::Preprocessing {
            info!(image_id = %image.image_id, status = %image.status, "not pending, skipping");
            return Ok(false);
        }

        let images = self.ctx.store.images();
        images
            .update_status(&image.image_id, ImageStatus::Preprocessing)
            .await?;

        let start = Instant::now();
        let source = self
            .ctx
            .blobs
            .get(&image.source_path)
            .await
            .context("downloading source image")?;

        let (normalised, mut info) = self.preprocessor.preprocess(&source)?;

        let dest_path = paths::preprocessed(&image.batch_id, &image.image_id, "jpg");
        self.ctx
            .blobs
            .put(&dest_path, &normalised, &image.content_type, None)
            .await
            .context("uploading normalised image")?;

        info.normalized_path = Some(dest_path.clone());
        info.duration_ms = Some(start.elapsed().as_millis() as u64);
        info.completed_at = Some(Utc::now());

        // Keep the original for debugging and reprocessing. Archive failure
        // is non-fatal; the source stays where it is.
        let archived_path = paths::archived(
            &image.batch_id,
            &image.image_id,
            paths::extension_of(&image.source_path),
        );
        if let Err(e) = self.ctx.blobs.r#move(&image.source_path, &archived_path).await {
            warn!(image_id = %image.image_id, error = %e, "failed to archive original");
        }

        images.set_preprocessed(&image.image_id, &info).await?;
        info!(
            image_id = %image.image_id,
            duration_ms = info.duration_ms.unwrap_or(0),
            "image preprocessed"
        );
        Ok(true)
    }
}
