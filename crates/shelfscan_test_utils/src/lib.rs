//! Shelfscan test utilities.
//!
//! Fixtures shared by integration tests: an in-memory store with schema, a
//! temp-dir blob store, and scripted doubles for the scanner and the AI
//! extractor capabilities.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use shelfscan_ai::{AiError, BarcodeExtractor, ExtractedCode, ExtractionResponse};
use shelfscan_barcode::validate;
use shelfscan_blob::{BlobStore, FsBlobStore};
use shelfscan_model::{paths, ImageRecord, Settings};
use shelfscan_store::Store;
use shelfscan_worker::{BarcodeScanner, ScanResult, WorkerContext};

/// A complete in-memory pipeline environment. Keep the struct alive for the
/// duration of the test: dropping it deletes the blob directory.
pub struct TestEnv {
    pub store: Store,
    pub blobs: Arc<FsBlobStore>,
    pub settings: Settings,
    _blob_dir: TempDir,
}

impl TestEnv {
    pub async fn new() -> Self {
        let store = Store::connect_memory().await.expect("in-memory store");
        store.init_schema().await.expect("schema");
        let blob_dir = TempDir::new().expect("temp blob dir");
        let settings = Settings::default();
        let blobs = Arc::new(FsBlobStore::new(blob_dir.path(), &settings.blob_container));
        Self {
            store,
            blobs,
            settings,
            _blob_dir: blob_dir,
        }
    }

    pub fn context(&self) -> WorkerContext {
        WorkerContext::new(
            self.store.clone(),
            self.blobs.clone(),
            self.settings.clone(),
        )
    }

    /// Create a pending image record plus its incoming blob.
    pub async fn seed_image(&self, batch_id: &str, name: &str, bytes: &[u8]) -> ImageRecord {
        let mut image = ImageRecord::new(batch_id, String::new());
        image.source_path = paths::incoming(batch_id, &image.image_id, "jpg");
        image.source_filename = Some(format!("{name}.jpg"));
        image.file_size_bytes = Some(bytes.len() as i64);
        self.blobs
            .put(&image.source_path, bytes, "image/jpeg", None)
            .await
            .expect("seed blob");
        self.store.images().create(&image).await.expect("seed image");
        image
    }
}

/// Scanner double returning a fixed set of readings on every call.
pub struct FakeScanner {
    readings: Vec<ScanResult>,
}

impl FakeScanner {
    pub fn reading(code: &str) -> Self {
        Self {
            readings: vec![ScanResult {
                code: code.to_string(),
                rotation_degrees: 0,
            }],
        }
    }

    pub fn readings(codes: &[&str]) -> Self {
        Self {
            readings: codes
                .iter()
                .map(|code| ScanResult {
                    code: code.to_string(),
                    rotation_degrees: 0,
                })
                .collect(),
        }
    }

    pub fn empty() -> Self {
        Self {
            readings: Vec::new(),
        }
    }
}

impl BarcodeScanner for FakeScanner {
    fn scan(&self, _image: &[u8]) -> anyhow::Result<Vec<ScanResult>> {
        Ok(self.readings.clone())
    }
}

/// Scanner double that always errors, for exercising the error boundary.
pub struct FailingScanner;

impl BarcodeScanner for FailingScanner {
    fn scan(&self, _image: &[u8]) -> anyhow::Result<Vec<ScanResult>> {
        anyhow::bail!("scanner exploded")
    }
}

/// Build an extraction response the way the AI client would after parsing
/// and local validation.
pub fn ai_response(codes: &[(&str, f64)], tokens: Option<u64>) -> ExtractionResponse {
    let results = codes
        .iter()
        .map(|(code, confidence)| {
            let validation = validate(code);
            ExtractedCode {
                code: code.to_string(),
                symbology_guess: validation.symbology.as_label().to_string(),
                confidence: *confidence,
                validation,
            }
        })
        .collect();
    ExtractionResponse {
        results,
        raw_text: String::new(),
        tokens_used: tokens,
    }
}

/// Extractor double replaying a scripted sequence of responses. Once the
/// script runs out it keeps returning empty responses.
pub struct FakeExtractor {
    script: Mutex<VecDeque<Result<ExtractionResponse, String>>>,
    calls: Mutex<usize>,
}

impl FakeExtractor {
    pub fn replying(responses: Vec<ExtractionResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().map(Ok).collect()),
            calls: Mutex::new(0),
        }
    }

    pub fn erroring(message: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::from([Err(message.to_string())])),
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().expect("calls lock")
    }
}

#[async_trait]
impl BarcodeExtractor for FakeExtractor {
    async fn extract(&self, _image: &[u8], _prompt: &str) -> Result<ExtractionResponse, AiError> {
        *self.calls.lock().expect("calls lock") += 1;
        match self.script.lock().expect("script lock").pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(_message)) => Err(AiError::EmptyResponse),
            None => Ok(ExtractionResponse::default()),
        }
    }
}
