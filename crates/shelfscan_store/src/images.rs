//! Image repository.
//!
//! Every status write goes through the state machine. Re-marking the status
//! an image already has is treated as an idempotent no-op edge: a worker
//! whose lease was stolen may repeat a write another worker already made.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

use shelfscan_model::{ImageRecord, ImageStatus, PreprocessingInfo, ProcessingInfo};

use crate::error::StoreError;

pub struct ImageRepository<'a> {
    pool: &'a Pool<Sqlite>,
}

impl<'a> ImageRepository<'a> {
    pub fn new(pool: &'a Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn create(&self, image: &ImageRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO images (
                image_id, batch_id, source_path, source_filename, external_id,
                status, status_updated_at, preprocessing, processing,
                needs_fallback, final_blob_path, detection_count,
                content_type, file_size_bytes, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&image.image_id)
        .bind(&image.batch_id)
        .bind(&image.source_path)
        .bind(&image.source_filename)
        .bind(&image.external_id)
        .bind(image.status.as_str())
        .bind(image.status_updated_at)
        .bind(serde_json::to_string(&image.preprocessing)?)
        .bind(serde_json::to_string(&image.processing)?)
        .bind(image.processing.needs_fallback)
        .bind(&image.final_blob_path)
        .bind(image.detection_count)
        .bind(&image.content_type)
        .bind(image.file_size_bytes)
        .bind(image.created_at)
        .bind(image.updated_at)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, image_id: &str) -> Result<Option<ImageRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM images WHERE image_id = ?")
            .bind(image_id)
            .fetch_optional(self.pool)
            .await?;
        row.map(|r| image_from_row(&r)).transpose()
    }

    async fn get_required(&self, image_id: &str) -> Result<ImageRecord, StoreError> {
        self.get(image_id)
            .await?
            .ok_or_else(|| StoreError::not_found("image", image_id))
    }

    /// Duplicate detection at upload time: same batch, same filename.
    pub async fn get_by_source_filename(
        &self,
        batch_id: &str,
        source_filename: &str,
    ) -> Result<Option<ImageRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM images WHERE batch_id = ? AND source_filename = ?",
        )
        .bind(batch_id)
        .bind(source_filename)
        .fetch_optional(self.pool)
        .await?;
        row.map(|r| image_from_row(&r)).transpose()
    }

    /// Move to `new_status` keeping the stored needs_fallback flag.
    pub async fn update_status(
        &self,
        image_id: &str,
        new_status: ImageStatus,
    ) -> Result<(), StoreError> {
        let image = self.get_required(image_id).await?;
        check_edge(image.status, new_status, image.processing.needs_fallback)?;
        let now = Utc::now();
        sqlx::query(
            "UPDATE images SET status = ?, status_updated_at = ?, updated_at = ? WHERE image_id = ?",
        )
        .bind(new_status.as_str())
        .bind(now)
        .bind(now)
        .bind(image_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Preprocessing finished: store its record and advance to preprocessed.
    pub async fn set_preprocessed(
        &self,
        image_id: &str,
        preprocessing: &PreprocessingInfo,
    ) -> Result<(), StoreError> {
        let image = self.get_required(image_id).await?;
        check_edge(image.status, ImageStatus::Preprocessed, false)?;
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE images SET status = ?, status_updated_at = ?,
                preprocessing = ?, updated_at = ?
            WHERE image_id = ?
            "#,
        )
        .bind(ImageStatus::Preprocessed.as_str())
        .bind(now)
        .bind(serde_json::to_string(preprocessing)?)
        .bind(now)
        .bind(image_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Primary decoding found nothing (or blew up): back to preprocessed
    /// with the fallback flag raised. The blob stays where it is.
    pub async fn mark_needs_fallback(
        &self,
        image_id: &str,
        processing: &ProcessingInfo,
    ) -> Result<(), StoreError> {
        let image = self.get_required(image_id).await?;
        check_edge(image.status, ImageStatus::Preprocessed, true)?;
        let mut processing = processing.clone();
        processing.needs_fallback = true;
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE images SET status = ?, status_updated_at = ?,
                processing = ?, needs_fallback = 1, updated_at = ?
            WHERE image_id = ?
            "#,
        )
        .bind(ImageStatus::Preprocessed.as_str())
        .bind(now)
        .bind(serde_json::to_string(&processing)?)
        .bind(now)
        .bind(image_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Terminal success: one of the decoded_* statuses, with the blob already
    /// moved to its final folder.
    pub async fn set_decoded(
        &self,
        image_id: &str,
        status: ImageStatus,
        final_blob_path: &str,
        detection_count: i64,
        processing: &ProcessingInfo,
    ) -> Result<(), StoreError> {
        let image = self.get_required(image_id).await?;
        check_edge(image.status, status, image.processing.needs_fallback)?;
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE images SET status = ?, status_updated_at = ?,
                final_blob_path = ?, detection_count = ?,
                processing = ?, needs_fallback = ?, updated_at = ?
            WHERE image_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(final_blob_path)
        .bind(detection_count)
        .bind(serde_json::to_string(processing)?)
        .bind(processing.needs_fallback)
        .bind(now)
        .bind(image_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Ambiguous fallback outcome: detections recorded, awaiting a reviewer.
    pub async fn set_manual_review(
        &self,
        image_id: &str,
        final_blob_path: &str,
        detection_count: i64,
        processing: &ProcessingInfo,
    ) -> Result<(), StoreError> {
        let image = self.get_required(image_id).await?;
        check_edge(image.status, ImageStatus::ManualReview, image.processing.needs_fallback)?;
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE images SET status = ?, status_updated_at = ?,
                final_blob_path = ?, detection_count = ?,
                processing = ?, needs_fallback = ?, updated_at = ?
            WHERE image_id = ?
            "#,
        )
        .bind(ImageStatus::ManualReview.as_str())
        .bind(now)
        .bind(final_blob_path)
        .bind(detection_count)
        .bind(serde_json::to_string(processing)?)
        .bind(processing.needs_fallback)
        .bind(now)
        .bind(image_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Transition to failed. `final_blob_path` is set when the blob was
    /// moved to failed/; a retry that keeps the existing path passes None.
    pub async fn set_failed(
        &self,
        image_id: &str,
        final_blob_path: Option<&str>,
        processing: Option<&ProcessingInfo>,
    ) -> Result<(), StoreError> {
        let image = self.get_required(image_id).await?;
        check_edge(image.status, ImageStatus::Failed, image.processing.needs_fallback)?;
        let now = Utc::now();
        let processing = processing.unwrap_or(&image.processing);
        sqlx::query(
            r#"
            UPDATE images SET status = ?, status_updated_at = ?,
                final_blob_path = COALESCE(?, final_blob_path),
                processing = ?, needs_fallback = ?, updated_at = ?
            WHERE image_id = ?
            "#,
        )
        .bind(ImageStatus::Failed.as_str())
        .bind(now)
        .bind(final_blob_path)
        .bind(serde_json::to_string(processing)?)
        .bind(processing.needs_fallback)
        .bind(now)
        .bind(image_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Rewrite the processing document without touching status.
    pub async fn update_processing(
        &self,
        image_id: &str,
        processing: &ProcessingInfo,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE images SET processing = ?, needs_fallback = ?, updated_at = ? WHERE image_id = ?",
        )
        .bind(serde_json::to_string(processing)?)
        .bind(processing.needs_fallback)
        .bind(Utc::now())
        .bind(image_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_detection_count(
        &self,
        image_id: &str,
        detection_count: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE images SET detection_count = ?, updated_at = ? WHERE image_id = ?",
        )
        .bind(detection_count)
        .bind(Utc::now())
        .bind(image_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Move the blob path and status together after a review decision.
    pub async fn set_reviewed(
        &self,
        image_id: &str,
        status: ImageStatus,
        final_blob_path: &str,
        detection_count: i64,
    ) -> Result<(), StoreError> {
        let image = self.get_required(image_id).await?;
        check_edge(image.status, status, image.processing.needs_fallback)?;
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE images SET status = ?, status_updated_at = ?,
                final_blob_path = ?, detection_count = ?, updated_at = ?
            WHERE image_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(final_blob_path)
        .bind(detection_count)
        .bind(now)
        .bind(image_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Append to the image's error log.
    pub async fn add_processing_error(
        &self,
        image_id: &str,
        stage: &str,
        message: &str,
        details: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        let mut image = self.get_required(image_id).await?;
        image.add_error(stage, message, details);
        self.update_processing(image_id, &image.processing).await
    }

    pub async fn find_by_status(
        &self,
        status: ImageStatus,
        limit: i64,
        batch_id: Option<&str>,
    ) -> Result<Vec<ImageRecord>, StoreError> {
        let rows = match batch_id {
            Some(batch) => {
                sqlx::query(
                    r#"
                    SELECT * FROM images WHERE status = ? AND batch_id = ?
                    ORDER BY created_at ASC LIMIT ?
                    "#,
                )
                .bind(status.as_str())
                .bind(batch)
                .bind(limit)
                .fetch_all(self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM images WHERE status = ? ORDER BY created_at ASC LIMIT ?",
                )
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(self.pool)
                .await?
            }
        };
        rows.iter().map(image_from_row).collect()
    }

    pub async fn find_pending(&self, limit: i64) -> Result<Vec<ImageRecord>, StoreError> {
        self.find_by_status(ImageStatus::Pending, limit, None).await
    }

    /// Preprocessed images the primary decoder has not given up on yet.
    pub async fn find_preprocessed(&self, limit: i64) -> Result<Vec<ImageRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM images
            WHERE status = ? AND needs_fallback = 0
            ORDER BY created_at ASC LIMIT ?
            "#,
        )
        .bind(ImageStatus::Preprocessed.as_str())
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        rows.iter().map(image_from_row).collect()
    }

    pub async fn find_needing_fallback(&self, limit: i64) -> Result<Vec<ImageRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM images
            WHERE needs_fallback = 1 AND status IN (?, ?)
            ORDER BY created_at ASC LIMIT ?
            "#,
        )
        .bind(ImageStatus::Preprocessed.as_str())
        .bind(ImageStatus::DecodedPrimary.as_str())
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        rows.iter().map(image_from_row).collect()
    }

    pub async fn find_for_manual_review(&self, limit: i64) -> Result<Vec<ImageRecord>, StoreError> {
        self.find_by_status(ImageStatus::ManualReview, limit, None)
            .await
    }

    /// Failed images still under the fallback attempt cap. The count lives
    /// in the persisted processing document, so an attempt whose write was
    /// lost does not count against the cap.
    pub async fn find_failed_for_retry(
        &self,
        limit: i64,
        max_attempts: i64,
    ) -> Result<Vec<ImageRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM images
            WHERE status = ?
              AND COALESCE(json_array_length(processing, '$.fallback_attempts'), 0) < ?
            ORDER BY created_at ASC LIMIT ?
            "#,
        )
        .bind(ImageStatus::Failed.as_str())
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        rows.iter().map(image_from_row).collect()
    }

    /// Image counts per status.
    pub async fn stats(&self, batch_id: Option<&str>) -> Result<Vec<(String, i64)>, StoreError> {
        let rows = match batch_id {
            Some(batch) => {
                sqlx::query("SELECT status, COUNT(*) AS n FROM images WHERE batch_id = ? GROUP BY status")
                    .bind(batch)
                    .fetch_all(self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT status, COUNT(*) AS n FROM images GROUP BY status")
                    .fetch_all(self.pool)
                    .await?
            }
        };
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("status"), r.get::<i64, _>("n")))
            .collect())
    }

    pub async fn count_by_batch(&self, batch_id: &str) -> Result<i64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images WHERE batch_id = ?")
            .bind(batch_id)
            .fetch_one(self.pool)
            .await?;
        Ok(n)
    }

    pub async fn find_by_batch(&self, batch_id: &str) -> Result<Vec<ImageRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM images WHERE batch_id = ? ORDER BY source_filename ASC, created_at ASC",
        )
        .bind(batch_id)
        .fetch_all(self.pool)
        .await?;
        rows.iter().map(image_from_row).collect()
    }
}

fn check_edge(
    current: ImageStatus,
    next: ImageStatus,
    needs_fallback: bool,
) -> Result<(), StoreError> {
    if current == next {
        return Ok(());
    }
    current.transition(next, needs_fallback)?;
    Ok(())
}

fn image_from_row(row: &SqliteRow) -> Result<ImageRecord, StoreError> {
    let preprocessing: PreprocessingInfo =
        serde_json::from_str(row.try_get::<String, _>("preprocessing")?.as_str())?;
    let processing: ProcessingInfo =
        serde_json::from_str(row.try_get::<String, _>("processing")?.as_str())?;
    Ok(ImageRecord {
        image_id: row.try_get("image_id")?,
        batch_id: row.try_get("batch_id")?,
        source_path: row.try_get("source_path")?,
        source_filename: row.try_get("source_filename")?,
        external_id: row.try_get("external_id")?,
        status: row.try_get("status")?,
        status_updated_at: row.try_get("status_updated_at")?,
        preprocessing,
        processing,
        final_blob_path: row.try_get("final_blob_path")?,
        detection_count: row.try_get("detection_count")?,
        content_type: row.try_get("content_type")?,
        file_size_bytes: row.try_get("file_size_bytes")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
