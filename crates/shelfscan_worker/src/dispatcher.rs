//! Dispatcher: watches image statuses and enqueues the next stage's job.
//!
//! Enqueueing is idempotent per image: a live job of the right type
//! suppresses a duplicate, and each worker's entry guard absorbs whatever
//! slips through. Running several dispatchers is safe, just wasteful.

use anyhow::Result;
use serde_json::json;
use tracing::info;

use shelfscan_model::JobType;

use crate::context::WorkerContext;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchCounts {
    pub preprocess: usize,
    pub decode_primary: usize,
    pub decode_fallback: usize,
}

impl DispatchCounts {
    pub fn total(&self) -> usize {
        self.preprocess + self.decode_primary + self.decode_fallback
    }
}

pub struct Dispatcher {
    ctx: WorkerContext,
    batch_size: i64,
}

impl Dispatcher {
    pub fn new(ctx: WorkerContext, batch_size: i64) -> Self {
        Self { ctx, batch_size }
    }

    /// One full cycle: pending images get preprocess jobs, preprocessed
    /// images get primary decode jobs, flagged images get fallback jobs.
    pub async fn run_cycle(&self) -> Result<DispatchCounts> {
        let counts = DispatchCounts {
            preprocess: self.dispatch_preprocess().await?,
            decode_primary: self.dispatch_primary().await?,
            decode_fallback: self.dispatch_fallback().await?,
        };
        if counts.total() > 0 {
            info!(
                preprocess = counts.preprocess,
                decode_primary = counts.decode_primary,
                decode_fallback = counts.decode_fallback,
                "dispatch cycle complete"
            );
        }
        Ok(counts)
    }

    async fn dispatch_preprocess(&self) -> Result<usize> {
        let pending = self.ctx.store.images().find_pending(self.batch_size).await?;
        let mut created = 0;
        for image in pending {
            if !self
                .ctx
                .store
                .jobs()
                .exists_for_image(&image.image_id, JobType::Preprocess)
                .await?
            {
                self.ctx
                    .store
                    .jobs()
                    .enqueue(JobType::Preprocess, &image.image_id, &image.batch_id, 0, None)
                    .await?;
                created += 1;
            }
        }
        Ok(created)
    }

    async fn dispatch_primary(&self) -> Result<usize> {
        let eligible = self
            .ctx
            .store
            .images()
            .find_preprocessed(self.batch_size)
            .await?;
        let mut created = 0;
        for image in eligible {
            if !self
                .ctx
                .store
                .jobs()
                .exists_for_image(&image.image_id, JobType::DecodePrimary)
                .await?
            {
                self.ctx
                    .store
                    .jobs()
                    .enqueue(
                        JobType::DecodePrimary,
                        &image.image_id,
                        &image.batch_id,
                        0,
                        None,
                    )
                    .await?;
                created += 1;
            }
        }
        Ok(created)
    }

    async fn dispatch_fallback(&self) -> Result<usize> {
        let eligible = self
            .ctx
            .store
            .images()
            .find_needing_fallback(self.batch_size)
            .await?;
        let mut created = 0;
        for image in eligible {
            if !self
                .ctx
                .store
                .jobs()
                .exists_for_image(&image.image_id, JobType::DecodeFallback)
                .await?
            {
                self.ctx
                    .store
                    .jobs()
                    .enqueue(
                        JobType::DecodeFallback,
                        &image.image_id,
                        &image.batch_id,
                        0,
                        None,
                    )
                    .await?;
                created += 1;
            }
        }
        Ok(created)
    }

    /// Pipeline statistics: image counts per status plus queue state.
    pub async fn stats(&self) -> Result<serde_json::Value> {
        let image_stats = self.ctx.store.images().stats(None).await?;
        let queue_stats = self.ctx.store.jobs().stats().await?;
        Ok(json!({
            "images": image_stats
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
        }))
    }
}
