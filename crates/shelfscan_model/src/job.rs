//! Job record for the durable work queue.
//!
//! Jobs are derived and disposable; the queue prunes them after retention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Types of processing jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Preprocess,
    DecodePrimary,
    DecodeFallback,
    Cleanup,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preprocess => "preprocess",
            Self::DecodePrimary => "decode_primary",
            Self::DecodeFallback => "decode_fallback",
            Self::Cleanup => "cleanup",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "preprocess" => Self::Preprocess,
            "decode_primary" => Self::DecodePrimary,
            "decode_fallback" => Self::DecodeFallback,
            "cleanup" => Self::Cleanup,
            _ => return None,
        })
    }
}

/// Status of a job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One unit of work waiting to run.
///
/// Runnable iff `pending ∧ scheduled_for ≤ now`, or `in_progress ∧
/// locked_until < now` (expired lease, eligible for steal).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub job_type: JobType,

    pub image_id: String,
    pub batch_id: String,

    pub status: JobStatus,
    pub priority: i64,

    pub attempt_count: i64,
    pub max_attempts: i64,
    pub worker_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// JSON blobs; the queue does not interpret them.
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub error_details: Option<String>,

    pub scheduled_for: DateTime<Utc>,
    pub locked_until: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(job_type: JobType, image_id: impl Into<String>, batch_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4().to_string(),
            job_type,
            image_id: image_id.into(),
            batch_id: batch_id.into(),
            status: JobStatus::Pending,
            priority: 0,
            attempt_count: 0,
            max_attempts: 3,
            worker_id: None,
            started_at: None,
            completed_at: None,
            result: None,
            error_message: None,
            error_details: None,
            scheduled_for: now,
            locked_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.attempt_count < self.max_attempts
    }
}
