//! Detection repository.
//!
//! `exists_for_image` is the idempotency guard every decode worker checks
//! before doing any work; detections are never created twice for one image.
//! Listings order by `(detected_at, id)` so "first remaining detection"
//! picks are deterministic.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

use shelfscan_barcode::Symbology;
use shelfscan_model::DetectionRecord;

use crate::error::StoreError;

pub struct DetectionRepository<'a> {
    pool: &'a Pool<Sqlite>,
}

impl<'a> DetectionRepository<'a> {
    pub fn new(pool: &'a Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Insert one detection, returning its assigned id.
    pub async fn create(&self, detection: &DetectionRecord) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO detections (
                image_id, batch_id, source_filename,
                code, symbology, normalized_code,
                source, confidence, rotation_degrees,
                checksum_valid, length_valid, numeric_only,
                ambiguous, chosen, rejected,
                product_found, product_id,
                ai_confidence, ai_symbology_guess,
                detected_at, reviewed_at, reviewed_by
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&detection.image_id)
        .bind(&detection.batch_id)
        .bind(&detection.source_filename)
        .bind(&detection.code)
        .bind(detection.symbology.as_label())
        .bind(&detection.normalized_code)
        .bind(detection.source.as_str())
        .bind(detection.confidence)
        .bind(detection.rotation_degrees)
        .bind(detection.checksum_valid)
        .bind(detection.length_valid)
        .bind(detection.numeric_only)
        .bind(detection.ambiguous)
        .bind(detection.chosen)
        .bind(detection.rejected)
        .bind(detection.product_found)
        .bind(&detection.product_id)
        .bind(detection.ai_confidence)
        .bind(&detection.ai_symbology_guess)
        .bind(detection.detected_at)
        .bind(detection.reviewed_at)
        .bind(&detection.reviewed_by)
        .execute(self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn create_many(
        &self,
        detections: &[DetectionRecord],
    ) -> Result<Vec<i64>, StoreError> {
        let mut ids = Vec::with_capacity(detections.len());
        for detection in detections {
            ids.push(self.create(detection).await?);
        }
        Ok(ids)
    }

    pub async fn get(&self, id: i64) -> Result<Option<DetectionRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM detections WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        row.map(|r| detection_from_row(&r)).transpose()
    }

    pub async fn find_by_image(&self, image_id: &str) -> Result<Vec<DetectionRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM detections WHERE image_id = ? ORDER BY detected_at ASC, id ASC",
        )
        .bind(image_id)
        .fetch_all(self.pool)
        .await?;
        rows.iter().map(detection_from_row).collect()
    }

    /// Idempotency guard: any detection at all for this image?
    pub async fn exists_for_image(&self, image_id: &str) -> Result<bool, StoreError> {
        let n: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM (SELECT 1 FROM detections WHERE image_id = ? LIMIT 1)")
                .bind(image_id)
                .fetch_one(self.pool)
                .await?;
        Ok(n > 0)
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Vec<DetectionRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM detections WHERE code = ? ORDER BY detected_at ASC, id ASC",
        )
        .bind(code)
        .fetch_all(self.pool)
        .await?;
        rows.iter().map(detection_from_row).collect()
    }

    pub async fn find_by_batch(&self, batch_id: &str) -> Result<Vec<DetectionRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM detections WHERE batch_id = ? ORDER BY detected_at ASC, id ASC",
        )
        .bind(batch_id)
        .fetch_all(self.pool)
        .await?;
        rows.iter().map(detection_from_row).collect()
    }

    pub async fn find_by_source_filename(
        &self,
        source_filename: &str,
    ) -> Result<Vec<DetectionRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM detections WHERE source_filename = ? ORDER BY detected_at ASC, id ASC",
        )
        .bind(source_filename)
        .fetch_all(self.pool)
        .await?;
        rows.iter().map(detection_from_row).collect()
    }

    pub async fn find_valid_by_image(
        &self,
        image_id: &str,
    ) -> Result<Vec<DetectionRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM detections
            WHERE image_id = ? AND checksum_valid = 1 AND length_valid = 1
              AND numeric_only = 1 AND rejected = 0
            ORDER BY detected_at ASC, id ASC
            "#,
        )
        .bind(image_id)
        .fetch_all(self.pool)
        .await?;
        rows.iter().map(detection_from_row).collect()
    }

    pub async fn find_ambiguous(&self, limit: i64) -> Result<Vec<DetectionRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM detections WHERE ambiguous = 1 ORDER BY detected_at ASC, id ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        rows.iter().map(detection_from_row).collect()
    }

    pub async fn count_non_rejected(&self, image_id: &str) -> Result<i64, StoreError> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM detections WHERE image_id = ? AND rejected = 0",
        )
        .bind(image_id)
        .fetch_one(self.pool)
        .await?;
        Ok(n)
    }

    /// Review: this is the one.
    pub async fn mark_chosen(&self, id: i64, reviewer: Option<&str>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE detections
            SET chosen = 1, ambiguous = 0, reviewed_at = ?, reviewed_by = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(reviewer)
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Review: not this one.
    pub async fn mark_rejected(&self, id: i64, reviewer: Option<&str>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE detections
            SET rejected = 1, ambiguous = 0, reviewed_at = ?, reviewed_by = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(reviewer)
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Reject every detection for the image except the chosen one.
    pub async fn reject_other_detections(
        &self,
        image_id: &str,
        chosen_id: i64,
        reviewer: Option<&str>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE detections
            SET rejected = 1, ambiguous = 0, reviewed_at = ?, reviewed_by = ?
            WHERE image_id = ? AND id != ?
            "#,
        )
        .bind(Utc::now())
        .bind(reviewer)
        .bind(image_id)
        .bind(chosen_id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Reject every detection for the image (review decided no barcode).
    pub async fn reject_all_for_image(
        &self,
        image_id: &str,
        reviewer: Option<&str>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE detections
            SET rejected = 1, ambiguous = 0, reviewed_at = ?, reviewed_by = ?
            WHERE image_id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(reviewer)
        .bind(image_id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Detection counts per source.
    pub async fn stats_by_source(
        &self,
        batch_id: Option<&str>,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        let rows = match batch_id {
            Some(batch) => {
                sqlx::query(
                    "SELECT source, COUNT(*) AS n FROM detections WHERE batch_id = ? GROUP BY source",
                )
                .bind(batch)
                .fetch_all(self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT source, COUNT(*) AS n FROM detections GROUP BY source")
                    .fetch_all(self.pool)
                    .await?
            }
        };
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("source"), r.get::<i64, _>("n")))
            .collect())
    }
}

fn detection_from_row(row: &SqliteRow) -> Result<DetectionRecord, StoreError> {
    let symbology = Symbology::from_label(row.try_get::<String, _>("symbology")?.as_str());
    Ok(DetectionRecord {
        id: row.try_get("id")?,
        image_id: row.try_get("image_id")?,
        batch_id: row.try_get("batch_id")?,
        source_filename: row.try_get("source_filename")?,
        code: row.try_get("code")?,
        symbology,
        normalized_code: row.try_get("normalized_code")?,
        source: row.try_get("source")?,
        confidence: row.try_get("confidence")?,
        rotation_degrees: row.try_get("rotation_degrees")?,
        checksum_valid: row.try_get("checksum_valid")?,
        length_valid: row.try_get("length_valid")?,
        numeric_only: row.try_get("numeric_only")?,
        ambiguous: row.try_get("ambiguous")?,
        chosen: row.try_get("chosen")?,
        rejected: row.try_get("rejected")?,
        product_found: row.try_get("product_found")?,
        product_id: row.try_get("product_id")?,
        ai_confidence: row.try_get("ai_confidence")?,
        ai_symbology_guess: row.try_get("ai_symbology_guess")?,
        detected_at: row.try_get("detected_at")?,
        reviewed_at: row.try_get("reviewed_at")?,
        reviewed_by: row.try_get("reviewed_by")?,
    })
}
