//! Image record: one per uploaded file, the root aggregate of the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::ImageStatus;

/// Metadata captured by the preprocessing stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingInfo {
    pub normalized_path: Option<String>,
    pub original_width: Option<u32>,
    pub original_height: Option<u32>,
    pub processed_width: Option<u32>,
    pub processed_height: Option<u32>,
    #[serde(default)]
    pub grayscale: bool,
    #[serde(default)]
    pub clahe_applied: bool,
    #[serde(default)]
    pub denoised: bool,
    #[serde(default)]
    pub rotations_generated: Vec<i32>,
    pub duration_ms: Option<u64>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Error recorded against an image during any stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingError {
    pub stage: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub details: Option<serde_json::Value>,
}

/// One decoding attempt, primary or fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderAttempt {
    pub decoder: String,
    pub attempt_number: u32,
    pub success: bool,
    #[serde(default)]
    pub codes_found: usize,
    pub duration_ms: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

/// Decode history for an image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingInfo {
    #[serde(default)]
    pub primary_attempts: Vec<DecoderAttempt>,
    #[serde(default)]
    pub fallback_attempts: Vec<DecoderAttempt>,
    #[serde(default)]
    pub needs_fallback: bool,
    pub ai_tokens_used: Option<u64>,
    #[serde(default)]
    pub errors: Vec<ProcessingError>,
}

/// An uploaded image traversing the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image_id: String,
    pub batch_id: String,

    /// Original blob path in incoming/.
    pub source_path: String,
    pub source_filename: Option<String>,
    pub external_id: Option<String>,

    pub status: ImageStatus,
    pub status_updated_at: DateTime<Utc>,

    pub preprocessing: PreprocessingInfo,
    pub processing: ProcessingInfo,

    /// Final location once a terminal folder applies.
    pub final_blob_path: Option<String>,
    pub detection_count: i64,

    pub content_type: String,
    pub file_size_bytes: Option<i64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageRecord {
    pub fn new(batch_id: impl Into<String>, source_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            image_id: Uuid::new_v4().to_string(),
            batch_id: batch_id.into(),
            source_path: source_path.into(),
            source_filename: None,
            external_id: None,
            status: ImageStatus::Pending,
            status_updated_at: now,
            preprocessing: PreprocessingInfo::default(),
            processing: ProcessingInfo::default(),
            final_blob_path: None,
            detection_count: 0,
            content_type: "image/jpeg".to_string(),
            file_size_bytes: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a decoding attempt; attempt numbers are 1-based per list.
    pub fn add_decoder_attempt(
        &mut self,
        decoder: &str,
        success: bool,
        is_fallback: bool,
        codes_found: usize,
        duration_ms: Option<u64>,
        error: Option<String>,
    ) {
        let attempts = if is_fallback {
            &mut self.processing.fallback_attempts
        } else {
            &mut self.processing.primary_attempts
        };
        let attempt = DecoderAttempt {
            decoder: decoder.to_string(),
            attempt_number: attempts.len() as u32 + 1,
            success,
            codes_found,
            duration_ms,
            timestamp: Utc::now(),
            error,
        };
        attempts.push(attempt);
        self.updated_at = Utc::now();
    }

    pub fn add_error(
        &mut self,
        stage: &str,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) {
        self.processing.errors.push(ProcessingError {
            stage: stage.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
            details,
        });
        self.updated_at = Utc::now();
    }

    /// Add to the cumulative AI token counter.
    pub fn add_ai_tokens(&mut self, tokens: u64) {
        let current = self.processing.ai_tokens_used.unwrap_or(0);
        self.processing.ai_tokens_used = Some(current + tokens);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_image_starts_pending() {
        let image = ImageRecord::new("batch-1", "incoming/batch-1/x.jpg");
        assert_eq!(image.status, ImageStatus::Pending);
        assert_eq!(image.detection_count, 0);
        assert!(!image.processing.needs_fallback);
        assert!(image.preprocessing.normalized_path.is_none());
    }

    #[test]
    fn attempt_numbers_count_per_list() {
        let mut image = ImageRecord::new("b", "incoming/b/x.jpg");
        image.add_decoder_attempt("local", false, false, 0, Some(12), None);
        image.add_decoder_attempt("ai", false, true, 0, Some(900), None);
        image.add_decoder_attempt("ai", true, true, 1, Some(850), None);

        assert_eq!(image.processing.primary_attempts.len(), 1);
        assert_eq!(image.processing.fallback_attempts.len(), 2);
        assert_eq!(image.processing.primary_attempts[0].attempt_number, 1);
        assert_eq!(image.processing.fallback_attempts[0].attempt_number, 1);
        assert_eq!(image.processing.fallback_attempts[1].attempt_number, 2);
    }

    #[test]
    fn ai_tokens_accumulate() {
        let mut image = ImageRecord::new("b", "incoming/b/x.jpg");
        assert_eq!(image.processing.ai_tokens_used, None);
        image.add_ai_tokens(120);
        image.add_ai_tokens(80);
        assert_eq!(image.processing.ai_tokens_used, Some(200));
    }

    #[test]
    fn processing_info_round_trips_as_json() {
        let mut image = ImageRecord::new("b", "incoming/b/x.jpg");
        image.add_decoder_attempt("local", true, false, 2, Some(5), None);
        image.add_error("decode_primary", "boom", None);

        let json = serde_json::to_string(&image.processing).unwrap();
        let back: ProcessingInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, image.processing);
    }
}
