//! Table and index creation.
//!
//! Single-field indexes only; nested records (preprocessing, processing,
//! additional_codes) are JSON text columns. `needs_fallback` is mirrored
//! into its own column so the dispatcher can select on it without JSON
//! extraction; repositories keep it in sync with the processing document.

use sqlx::{Pool, Sqlite};

use crate::error::StoreError;

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS images (
        image_id TEXT PRIMARY KEY,
        batch_id TEXT NOT NULL,
        source_path TEXT NOT NULL,
        source_filename TEXT,
        external_id TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        status_updated_at TEXT NOT NULL,
        preprocessing TEXT NOT NULL DEFAULT '{}',
        processing TEXT NOT NULL DEFAULT '{}',
        needs_fallback INTEGER NOT NULL DEFAULT 0,
        final_blob_path TEXT,
        detection_count INTEGER NOT NULL DEFAULT 0,
        content_type TEXT NOT NULL DEFAULT 'image/jpeg',
        file_size_bytes INTEGER,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS detections (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        image_id TEXT NOT NULL,
        batch_id TEXT NOT NULL,
        source_filename TEXT,
        code TEXT NOT NULL,
        symbology TEXT NOT NULL DEFAULT 'UNKNOWN',
        normalized_code TEXT,
        source TEXT NOT NULL,
        confidence REAL,
        rotation_degrees INTEGER,
        checksum_valid INTEGER NOT NULL DEFAULT 0,
        length_valid INTEGER NOT NULL DEFAULT 0,
        numeric_only INTEGER NOT NULL DEFAULT 0,
        ambiguous INTEGER NOT NULL DEFAULT 0,
        chosen INTEGER NOT NULL DEFAULT 0,
        rejected INTEGER NOT NULL DEFAULT 0,
        product_found INTEGER NOT NULL DEFAULT 0,
        product_id TEXT,
        ai_confidence REAL,
        ai_symbology_guess TEXT,
        detected_at TEXT NOT NULL,
        reviewed_at TEXT,
        reviewed_by TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ean TEXT NOT NULL UNIQUE,
        upc TEXT,
        ean8 TEXT,
        additional_codes TEXT NOT NULL DEFAULT '[]',
        name TEXT NOT NULL,
        brand TEXT,
        description TEXT,
        category TEXT,
        subcategory TEXT,
        size TEXT,
        unit TEXT,
        pack_size INTEGER,
        external_id TEXT,
        sku TEXT,
        active INTEGER NOT NULL DEFAULT 1,
        image_url TEXT,
        source TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        job_id TEXT PRIMARY KEY,
        job_type TEXT NOT NULL,
        image_id TEXT NOT NULL,
        batch_id TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        priority INTEGER NOT NULL DEFAULT 0,
        attempt_count INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL DEFAULT 3,
        worker_id TEXT,
        started_at TEXT,
        completed_at TEXT,
        result TEXT,
        error_message TEXT,
        error_details TEXT,
        scheduled_for TEXT NOT NULL,
        locked_until TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_images_status ON images (status)",
    "CREATE INDEX IF NOT EXISTS idx_images_batch_id ON images (batch_id)",
    "CREATE INDEX IF NOT EXISTS idx_images_created_at ON images (created_at)",
    "CREATE INDEX IF NOT EXISTS idx_images_source_filename ON images (source_filename)",
    "CREATE INDEX IF NOT EXISTS idx_images_needs_fallback ON images (needs_fallback)",
    "CREATE INDEX IF NOT EXISTS idx_detections_image_id ON detections (image_id)",
    "CREATE INDEX IF NOT EXISTS idx_detections_code ON detections (code)",
    "CREATE INDEX IF NOT EXISTS idx_detections_batch_id ON detections (batch_id)",
    "CREATE INDEX IF NOT EXISTS idx_detections_source ON detections (source)",
    "CREATE INDEX IF NOT EXISTS idx_detections_ambiguous ON detections (ambiguous)",
    "CREATE INDEX IF NOT EXISTS idx_detections_source_filename ON detections (source_filename)",
    "CREATE INDEX IF NOT EXISTS idx_products_ean ON products (ean)",
    "CREATE INDEX IF NOT EXISTS idx_products_upc ON products (upc)",
    "CREATE INDEX IF NOT EXISTS idx_products_ean8 ON products (ean8)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs (status)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_job_type ON jobs (job_type)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_image_id ON jobs (image_id)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_scheduled_for ON jobs (scheduled_for)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_locked_until ON jobs (locked_until)",
];

pub async fn init(pool: &Pool<Sqlite>) -> Result<(), StoreError> {
    for stmt in TABLES.iter().chain(INDEXES) {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}
