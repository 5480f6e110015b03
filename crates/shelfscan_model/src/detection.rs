//! Detection record: one candidate barcode reading attached to an image.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shelfscan_barcode::Symbology;

/// How a code was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    PrimaryLocal,
    FallbackAi,
    Manual,
}

impl DetectionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrimaryLocal => "primary_local",
            Self::FallbackAi => "fallback_ai",
            Self::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "primary_local" => Self::PrimaryLocal,
            "fallback_ai" => Self::FallbackAi,
            "manual" => Self::Manual,
            _ => return None,
        })
    }
}

/// A barcode detection result.
///
/// `id` is a store-assigned surrogate key (0 until persisted). Exactly one of
/// `{chosen, rejected, ambiguous-with-neither}` may hold; a single image gets
/// at most one `chosen` detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: i64,

    pub image_id: String,
    pub batch_id: String,
    pub source_filename: Option<String>,

    pub code: String,
    pub symbology: Symbology,
    pub normalized_code: Option<String>,

    pub source: DetectionSource,
    pub confidence: Option<f64>,
    pub rotation_degrees: Option<i32>,

    pub checksum_valid: bool,
    pub length_valid: bool,
    pub numeric_only: bool,

    pub ambiguous: bool,
    pub chosen: bool,
    pub rejected: bool,

    pub product_found: bool,
    pub product_id: Option<String>,

    /// AI decoder reported values, present only for fallback detections.
    pub ai_confidence: Option<f64>,
    pub ai_symbology_guess: Option<String>,

    pub detected_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<String>,
}

impl DetectionRecord {
    pub fn new(image_id: impl Into<String>, batch_id: impl Into<String>, code: impl Into<String>, source: DetectionSource) -> Self {
        Self {
            id: 0,
            image_id: image_id.into(),
            batch_id: batch_id.into(),
            source_filename: None,
            code: code.into(),
            symbology: Symbology::Unknown,
            normalized_code: None,
            source,
            confidence: None,
            rotation_degrees: None,
            checksum_valid: false,
            length_valid: false,
            numeric_only: false,
            ambiguous: false,
            chosen: false,
            rejected: false,
            product_found: false,
            product_id: None,
            ai_confidence: None,
            ai_symbology_guess: None,
            detected_at: Utc::now(),
            reviewed_at: None,
            reviewed_by: None,
        }
    }

    /// All three validation flags hold.
    pub fn is_valid(&self) -> bool {
        self.checksum_valid && self.length_valid && self.numeric_only
    }
}
