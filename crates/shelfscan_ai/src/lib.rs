//! AI vision decoder capability.
//!
//! The fallback and retry workers hand an image to a remote vision model and
//! get back candidate barcode readings. The call is best-effort and
//! non-deterministic; every returned code is re-validated locally before it
//! can become a detection, so the parser may drop malformed items silently.

use async_trait::async_trait;
use thiserror::Error;

use shelfscan_barcode::Validation;

mod gemini;
mod parse;
mod prompt;

pub use gemini::{GeminiConfig, GeminiExtractor};
pub use parse::parse_results;
pub use prompt::BARCODE_EXTRACTION_PROMPT;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI decoder is not configured: {0}")]
    NotConfigured(&'static str),
    #[error("AI transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("AI decoder returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("AI response had no text content")]
    EmptyResponse,
}

/// One candidate reading returned by the model, re-checked locally.
#[derive(Debug, Clone)]
pub struct ExtractedCode {
    pub code: String,
    /// The model's own symbology label, kept verbatim for the detection.
    pub symbology_guess: String,
    pub confidence: f64,
    /// Local validator verdict; `validation.symbology` is authoritative.
    pub validation: Validation,
}

impl ExtractedCode {
    pub fn is_valid(&self) -> bool {
        self.validation.is_valid()
    }
}

/// Full response from one extraction call.
#[derive(Debug, Clone, Default)]
pub struct ExtractionResponse {
    pub results: Vec<ExtractedCode>,
    pub raw_text: String,
    pub tokens_used: Option<u64>,
}

impl ExtractionResponse {
    /// The readings that survived local validation.
    pub fn valid_results(&self) -> Vec<&ExtractedCode> {
        self.results.iter().filter(|r| r.is_valid()).collect()
    }
}

/// Capability interface over the remote vision decoder.
#[async_trait]
pub trait BarcodeExtractor: Send + Sync {
    async fn extract(&self, image: &[u8], prompt: &str) -> Result<ExtractionResponse, AiError>;
}
