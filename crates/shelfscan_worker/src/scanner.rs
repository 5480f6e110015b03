//! Local linear-barcode scanner capability.
//!
//! The scanner is an external collaborator: it takes normalised image bytes
//! and returns candidate readings, trying rotations internally (at minimum
//! 0° and 180°). The pipeline validates every reading itself, so a scanner
//! is free to return junk candidates.

use anyhow::Result;

/// One candidate reading from the local scanner.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    pub code: String,
    /// Rotation applied when this reading was found.
    pub rotation_degrees: i32,
}

pub trait BarcodeScanner: Send + Sync {
    fn scan(&self, image: &[u8]) -> Result<Vec<ScanResult>>;
}

/// Scanner that never finds anything. Deployments without a native decoder
/// run with this and lean entirely on the AI fallback.
#[derive(Debug, Default)]
pub struct NullScanner;

impl BarcodeScanner for NullScanner {
    fn scan(&self, _image: &[u8]) -> Result<Vec<ScanResult>> {
        Ok(Vec::new())
    }
}
