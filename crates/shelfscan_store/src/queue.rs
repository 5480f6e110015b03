//! Durable, lease-based job queue.
//!
//! At-least-once semantics: a claim takes a bounded lease, and `dequeue`
//! treats in-progress jobs with an expired lease as runnable again, so a
//! crashed worker's job is stolen without an external watchdog. Claiming is
//! a transaction ending in a guarded UPDATE; losing the race yields nothing
//! rather than a double lease.

use chrono::{Duration, Utc};
use sqlx::{Pool, Sqlite};
use tracing::info;

use shelfscan_model::{JobRecord, JobStatus, JobType};

use crate::error::StoreError;

/// Base backoff for failed jobs: 60 · 2^attempt_count seconds.
const BACKOFF_BASE_SECS: i64 = 60;

pub struct JobQueue<'a> {
    pool: &'a Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatRow {
    pub job_type: String,
    pub status: String,
    pub count: i64,
}

impl<'a> JobQueue<'a> {
    pub fn new(pool: &'a Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Insert a pending job, runnable at `scheduled_for` (or immediately).
    pub async fn enqueue(
        &self,
        job_type: JobType,
        image_id: &str,
        batch_id: &str,
        priority: i64,
        scheduled_for: Option<chrono::DateTime<Utc>>,
    ) -> Result<String, StoreError> {
        let mut job = JobRecord::new(job_type, image_id, batch_id);
        job.priority = priority;
        if let Some(when) = scheduled_for {
            job.scheduled_for = when;
        }
        sqlx::query(
            r#"
            INSERT INTO jobs (
                job_id, job_type, image_id, batch_id, status, priority,
                attempt_count, max_attempts, worker_id, started_at, completed_at,
                result, error_message, error_details,
                scheduled_for, locked_until, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.job_id)
        .bind(job.job_type.as_str())
        .bind(&job.image_id)
        .bind(&job.batch_id)
        .bind(job.status.as_str())
        .bind(job.priority)
        .bind(job.attempt_count)
        .bind(job.max_attempts)
        .bind(&job.worker_id)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.result)
        .bind(&job.error_message)
        .bind(&job.error_details)
        .bind(job.scheduled_for)
        .bind(job.locked_until)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(self.pool)
        .await?;
        Ok(job.job_id)
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let job = sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(self.pool)
            .await?;
        Ok(job)
    }

    /// Atomically claim one runnable job for `worker_id`.
    ///
    /// Selection order: highest priority first, then earliest scheduled_for.
    /// The claim bumps attempt_count and takes a lease of `lease_seconds`.
    pub async fn dequeue(
        &self,
        job_type: Option<JobType>,
        worker_id: &str,
        lease_seconds: i64,
    ) -> Result<Option<JobRecord>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let now = Utc::now();
        let job_id: Option<String> = match job_type {
            Some(kind) => {
                sqlx::query_scalar(
                    r#"
                    SELECT job_id FROM jobs
                    WHERE job_type = ?
                      AND ((status = 'pending' AND scheduled_for <= ?)
                           OR (status = 'in_progress' AND locked_until < ?))
                    ORDER BY priority DESC, scheduled_for ASC
                    LIMIT 1
                    "#,
                )
                .bind(kind.as_str())
                .bind(now)
                .bind(now)
                .fetch_optional(&mut *tx)
                .await?
            }
            None => {
                sqlx::query_scalar(
                    r#"
                    SELECT job_id FROM jobs
                    WHERE (status = 'pending' AND scheduled_for <= ?)
                       OR (status = 'in_progress' AND locked_until < ?)
                    ORDER BY priority DESC, scheduled_for ASC
                    LIMIT 1
                    "#,
                )
                .bind(now)
                .bind(now)
                .fetch_optional(&mut *tx)
                .await?
            }
        };

        let Some(job_id) = job_id else {
            tx.commit().await?;
            return Ok(None);
        };

        // Guarded claim: re-checks runnability so a concurrent claimant
        // cannot hold the same lease.
        let lock_until = now + Duration::seconds(lease_seconds);
        let rows_affected = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'in_progress',
                worker_id = ?,
                started_at = ?,
                locked_until = ?,
                attempt_count = attempt_count + 1,
                updated_at = ?
            WHERE job_id = ?
              AND ((status = 'pending' AND scheduled_for <= ?)
                   OR (status = 'in_progress' AND locked_until < ?))
            "#,
        )
        .bind(worker_id)
        .bind(now)
        .bind(lock_until)
        .bind(now)
        .bind(&job_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            // Claimed by another worker between select and update.
            tx.commit().await?;
            return Ok(None);
        }

        let job = sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs WHERE job_id = ?")
            .bind(&job_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(job_id = %job.job_id, job_type = %job.job_type.as_str(), image_id = %job.image_id, "claimed job");

        Ok(Some(job))
    }

    /// Mark a job completed and clear its lease.
    pub async fn complete(&self, job_id: &str, result: Option<&str>) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', completed_at = ?, result = ?,
                locked_until = NULL, updated_at = ?
            WHERE job_id = ?
            "#,
        )
        .bind(now)
        .bind(result)
        .bind(now)
        .bind(job_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Record a failure. With retries remaining the job returns to pending
    /// with exponential backoff; otherwise it is failed for good.
    pub async fn fail(
        &self,
        job_id: &str,
        error_message: &str,
        error_details: Option<&str>,
        max_attempts: i64,
    ) -> Result<(), StoreError> {
        let job = self
            .get(job_id)
            .await?
            .ok_or_else(|| StoreError::not_found("job", job_id))?;

        let now = Utc::now();
        if job.attempt_count < max_attempts {
            let backoff_secs = BACKOFF_BASE_SECS * (1i64 << job.attempt_count.min(32));
            let scheduled_for = now + Duration::seconds(backoff_secs);
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'pending', worker_id = NULL,
                    error_message = ?, error_details = ?,
                    locked_until = NULL, scheduled_for = ?, updated_at = ?
                WHERE job_id = ?
                "#,
            )
            .bind(error_message)
            .bind(error_details)
            .bind(scheduled_for)
            .bind(now)
            .bind(job_id)
            .execute(self.pool)
            .await?;
            info!(job_id, backoff_secs, "job failed, retry scheduled");
        } else {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'failed', completed_at = ?,
                    error_message = ?, error_details = ?,
                    locked_until = NULL, updated_at = ?
                WHERE job_id = ?
                "#,
            )
            .bind(now)
            .bind(error_message)
            .bind(error_details)
            .bind(now)
            .bind(job_id)
            .execute(self.pool)
            .await?;
            info!(job_id, "job failed permanently");
        }
        Ok(())
    }

    pub async fn cancel(&self, job_id: &str) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'cancelled', completed_at = ?,
                locked_until = NULL, updated_at = ?
            WHERE job_id = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(job_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Dispatcher deduplication: a live (pending or in-progress) job of this
    /// type already targets the image.
    pub async fn exists_for_image(
        &self,
        image_id: &str,
        job_type: JobType,
    ) -> Result<bool, StoreError> {
        let n: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(1) FROM (
                SELECT 1 FROM jobs
                WHERE image_id = ? AND job_type = ?
                  AND status IN ('pending', 'in_progress')
                LIMIT 1
            )
            "#,
        )
        .bind(image_id)
        .bind(job_type.as_str())
        .fetch_one(self.pool)
        .await?;
        Ok(n > 0)
    }

    pub async fn count_pending(&self, job_type: Option<JobType>) -> Result<i64, StoreError> {
        let n: i64 = match job_type {
            Some(kind) => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM jobs WHERE status = 'pending' AND job_type = ?",
                )
                .bind(kind.as_str())
                .fetch_one(self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'pending'")
                    .fetch_one(self.pool)
                    .await?
            }
        };
        Ok(n)
    }

    pub async fn find_by_status(
        &self,
        status: JobStatus,
        limit: i64,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let jobs = sqlx::query_as::<_, JobRecord>(
            "SELECT * FROM jobs WHERE status = ? ORDER BY scheduled_for ASC LIMIT ?",
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        Ok(jobs)
    }

    /// Job counts per (type, status).
    pub async fn stats(&self) -> Result<Vec<QueueStatRow>, StoreError> {
        use sqlx::Row;
        let rows = sqlx::query(
            "SELECT job_type, status, COUNT(*) AS n FROM jobs GROUP BY job_type, status",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| QueueStatRow {
                job_type: r.get("job_type"),
                status: r.get("status"),
                count: r.get("n"),
            })
            .collect())
    }

    /// Purge terminal jobs older than the cutoff. Returns rows deleted.
    pub async fn cleanup_old_completed(&self, days: i64) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - Duration::days(days);
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('completed', 'failed', 'cancelled')
              AND completed_at < ?
            "#,
        )
        .bind(cutoff)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
