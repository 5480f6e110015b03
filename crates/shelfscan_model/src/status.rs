//! Image pipeline state machine.
//!
//! All status mutation goes through [`ImageStatus::transition`]; repositories
//! refuse writes that would take an illegal edge.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status of an image in the processing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    Pending,
    Preprocessing,
    Preprocessed,
    DecodingPrimary,
    DecodedPrimary,
    DecodingFallback,
    DecodedFallback,
    ManualReview,
    DecodedManual,
    Failed,
}

/// Attempted illegal status transition.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal image transition {from} -> {to} (needs_fallback={needs_fallback})")]
pub struct TransitionError {
    pub from: ImageStatus,
    pub to: ImageStatus,
    pub needs_fallback: bool,
}

impl ImageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Preprocessing => "preprocessing",
            Self::Preprocessed => "preprocessed",
            Self::DecodingPrimary => "decoding_primary",
            Self::DecodedPrimary => "decoded_primary",
            Self::DecodingFallback => "decoding_fallback",
            Self::DecodedFallback => "decoded_fallback",
            Self::ManualReview => "manual_review",
            Self::DecodedManual => "decoded_manual",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "pending" => Self::Pending,
            "preprocessing" => Self::Preprocessing,
            "preprocessed" => Self::Preprocessed,
            "decoding_primary" => Self::DecodingPrimary,
            "decoded_primary" => Self::DecodedPrimary,
            "decoding_fallback" => Self::DecodingFallback,
            "decoded_fallback" => Self::DecodedFallback,
            "manual_review" => Self::ManualReview,
            "decoded_manual" => Self::DecodedManual,
            "failed" => Self::Failed,
            _ => return None,
        })
    }

    /// Terminal statuses end the pipeline for an image. `Failed` is
    /// terminal-retryable: the retry worker may take it back through
    /// `DecodingFallback`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::DecodedPrimary | Self::DecodedFallback | Self::DecodedManual | Self::Failed
        )
    }

    /// Blob folder this status pins `final_blob_path` to, if any.
    pub fn blob_folder(&self) -> Option<&'static str> {
        match self {
            Self::DecodedPrimary | Self::DecodedFallback | Self::DecodedManual => {
                Some(crate::paths::PROCESSED)
            }
            Self::ManualReview => Some(crate::paths::MANUAL_REVIEW),
            Self::Failed => Some(crate::paths::FAILED),
            _ => None,
        }
    }

    /// Whether the edge `self -> next` is legal. `needs_fallback` gates the
    /// edges that only exist once the primary decoder has given up.
    pub fn can_transition_to(&self, next: ImageStatus, needs_fallback: bool) -> bool {
        use ImageStatus::*;
        match (self, next) {
            (Pending, Preprocessing) | (Pending, Failed) => true,
            (Preprocessing, Preprocessed) | (Preprocessing, Failed) => true,
            (Preprocessed, DecodingPrimary) => !needs_fallback,
            (Preprocessed, DecodingFallback) => needs_fallback,
            (DecodingPrimary, DecodedPrimary) | (DecodingPrimary, Failed) => true,
            // No valid reading: back to preprocessed, flagged for fallback.
            (DecodingPrimary, Preprocessed) => needs_fallback,
            (DecodedPrimary, DecodingFallback) => needs_fallback,
            (DecodingFallback, DecodedFallback)
            | (DecodingFallback, ManualReview)
            | (DecodingFallback, Failed) => true,
            (ManualReview, DecodedManual) | (ManualReview, Failed) => true,
            // Retry edge, bounded by the fallback attempt cap.
            (Failed, DecodingFallback) => true,
            _ => false,
        }
    }

    pub fn transition(
        &self,
        next: ImageStatus,
        needs_fallback: bool,
    ) -> Result<ImageStatus, TransitionError> {
        if self.can_transition_to(next, needs_fallback) {
            Ok(next)
        } else {
            Err(TransitionError {
                from: *self,
                to: next,
                needs_fallback,
            })
        }
    }
}

impl std::fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
