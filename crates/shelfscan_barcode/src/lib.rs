//! EAN/UPC barcode validation and normalization.
//!
//! Pure functions, no I/O. Every candidate code the pipeline sees — whether
//! from the local scanner or the AI decoder — passes through [`validate`]
//! before it may become a detection.

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod checksum;

pub use checksum::{ean13_check_digit, ean8_check_digit, upc_a_check_digit, ChecksumError};

/// Linear barcode symbology, detected by length over an all-digit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbology {
    #[serde(rename = "EAN-13")]
    Ean13,
    #[serde(rename = "EAN-8")]
    Ean8,
    #[serde(rename = "UPC-A")]
    UpcA,
    #[serde(rename = "UPC-E")]
    UpcE,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl Symbology {
    /// Wire label, as returned by the AI decoder and stored in detections.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Ean13 => "EAN-13",
            Self::Ean8 => "EAN-8",
            Self::UpcA => "UPC-A",
            Self::UpcE => "UPC-E",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label {
            "EAN-13" => Self::Ean13,
            "EAN-8" => Self::Ean8,
            "UPC-A" => Self::UpcA,
            "UPC-E" => Self::UpcE,
            _ => Self::Unknown,
        }
    }

    /// Expected code length(s) for this symbology.
    pub fn length_matches(&self, len: usize) -> bool {
        match self {
            Self::Ean13 => len == 13,
            Self::Ean8 => len == 8,
            Self::UpcA => len == 12,
            Self::UpcE => len == 6 || len == 7,
            Self::Unknown => false,
        }
    }
}

impl std::fmt::Display for Symbology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Knobs for [`validate`]. UPC-E checksum verification is deliberately off:
/// the deployed pipeline accepts UPC-E unchecked, and the flag exists so the
/// behaviour can be tightened without an API change.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationOptions {
    pub verify_upc_e: bool,
}

/// Outcome of validating one candidate code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub symbology: Symbology,
    pub checksum_valid: bool,
    pub length_valid: bool,
    pub numeric_only: bool,
    /// Human-readable reason when invalid, empty otherwise.
    pub error: String,
}

impl Validation {
    /// A code is accepted iff all three flags hold.
    pub fn is_valid(&self) -> bool {
        self.checksum_valid && self.length_valid && self.numeric_only
    }

    fn rejected(symbology: Symbology, numeric_only: bool, error: impl Into<String>) -> Self {
        Self {
            symbology,
            checksum_valid: false,
            length_valid: symbology != Symbology::Unknown,
            numeric_only,
            error: error.into(),
        }
    }
}

/// Error raised by check-digit computation on malformed input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("code contains non-numeric characters")]
    NonNumeric,
    #[error("unsupported code length: {0}")]
    UnsupportedLength(usize),
}

/// Detect symbology from length. Non-digit input is always `Unknown`.
pub fn detect_symbology(code: &str) -> Symbology {
    if code.is_empty() || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Symbology::Unknown;
    }
    match code.len() {
        13 => Symbology::Ean13,
        8 => Symbology::Ean8,
        12 => Symbology::UpcA,
        6 | 7 => Symbology::UpcE,
        _ => Symbology::Unknown,
    }
}

/// Validate an EAN-13 code: 13 digits, check digit matches.
pub fn validate_ean13(code: &str) -> bool {
    if code.len() != 13 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    match ean13_check_digit(&code[..12]) {
        Ok(expected) => expected == code.as_bytes()[12] - b'0',
        Err(_) => false,
    }
}

/// Validate an EAN-8 code: 8 digits, check digit matches.
pub fn validate_ean8(code: &str) -> bool {
    if code.len() != 8 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    match ean8_check_digit(&code[..7]) {
        Ok(expected) => expected == code.as_bytes()[7] - b'0',
        Err(_) => false,
    }
}

/// Validate a UPC-A code: 12 digits, check digit matches.
pub fn validate_upc_a(code: &str) -> bool {
    if code.len() != 12 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    match upc_a_check_digit(&code[..11]) {
        Ok(expected) => expected == code.as_bytes()[11] - b'0',
        Err(_) => false,
    }
}

/// Validate a candidate code end to end: numeric, known length, checksum.
pub fn validate(code: &str) -> Validation {
    validate_with(code, ValidationOptions::default())
}

pub fn validate_with(code: &str, options: ValidationOptions) -> Validation {
    let numeric_only = !code.is_empty() && code.bytes().all(|b| b.is_ascii_digit());
    if !numeric_only {
        return Validation::rejected(
            Symbology::Unknown,
            false,
            "code contains non-numeric characters",
        );
    }

    let symbology = detect_symbology(code);
    if symbology == Symbology::Unknown {
        return Validation::rejected(
            symbology,
            true,
            format!("unsupported code length: {}", code.len()),
        );
    }

    let checksum_valid = match symbology {
        Symbology::Ean13 => validate_ean13(code),
        Symbology::Ean8 => validate_ean8(code),
        Symbology::UpcA => validate_upc_a(code),
        // UPC-E check digits require expansion to UPC-A; accepted unchecked
        // unless the caller opts in.
        Symbology::UpcE => !options.verify_upc_e,
        Symbology::Unknown => false,
    };

    Validation {
        symbology,
        checksum_valid,
        length_valid: true,
        numeric_only: true,
        error: if checksum_valid {
            String::new()
        } else {
            format!("invalid {symbology} checksum")
        },
    }
}

/// Canonicalise to EAN-13 where possible: UPC-A gets a leading zero, EAN-13
/// passes through, everything else has no EAN-13 form.
pub fn normalize_to_ean13(code: &str, symbology: Symbology) -> Option<String> {
    match symbology {
        Symbology::UpcA if code.len() == 12 => Some(format!("0{code}")),
        Symbology::Ean13 if code.len() == 13 => Some(code.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_symbology_by_length() {
        assert_eq!(detect_symbology("4006381333931"), Symbology::Ean13);
        assert_eq!(detect_symbology("96385074"), Symbology::Ean8);
        assert_eq!(detect_symbology("012345678905"), Symbology::UpcA);
        assert_eq!(detect_symbology("123456"), Symbology::UpcE);
        assert_eq!(detect_symbology("1234567"), Symbology::UpcE);
        assert_eq!(detect_symbology("12345"), Symbology::Unknown);
        assert_eq!(detect_symbology("12345678901234"), Symbology::Unknown);
        assert_eq!(detect_symbology(""), Symbology::Unknown);
    }

    #[test]
    fn non_digit_input_is_unknown() {
        assert_eq!(detect_symbology("400638133393a"), Symbology::Unknown);
        assert_eq!(detect_symbology("4006-38133393"), Symbology::Unknown);
    }

    #[test]
    fn ean13_calibration() {
        assert!(validate_ean13("4006381333931"));
        assert!(!validate_ean13("4006381333932"));
        assert!(validate_ean13("5901234123457"));
        assert!(!validate_ean13("400638133393"));
    }

    #[test]
    fn ean8_calibration() {
        assert!(validate_ean8("96385074"));
        assert!(!validate_ean8("96385075"));
    }

    #[test]
    fn upc_a_calibration() {
        assert!(validate_upc_a("012345678905"));
        assert!(!validate_upc_a("012345678906"));
    }

    #[test]
    fn upc_e_accepted_without_checksum() {
        let v = validate("123456");
        assert!(v.is_valid());
        assert_eq!(v.symbology, Symbology::UpcE);
    }

    #[test]
    fn upc_e_toggle_rejects_when_enabled() {
        let v = validate_with(
            "123456",
            ValidationOptions { verify_upc_e: true },
        );
        assert!(!v.is_valid());
    }

    #[test]
    fn validate_flags() {
        let v = validate("4006381333931");
        assert!(v.is_valid());
        assert!(v.checksum_valid && v.length_valid && v.numeric_only);
        assert!(v.error.is_empty());

        let v = validate("400638133393x");
        assert!(!v.numeric_only);
        assert!(!v.is_valid());

        let v = validate("12345");
        assert!(v.numeric_only);
        assert!(!v.length_valid);
        assert_eq!(v.symbology, Symbology::Unknown);

        let v = validate("4006381333932");
        assert!(v.numeric_only && v.length_valid);
        assert!(!v.checksum_valid);
    }

    #[test]
    fn normalization_to_ean13() {
        assert_eq!(
            normalize_to_ean13("012345678905", Symbology::UpcA).as_deref(),
            Some("0012345678905")
        );
        // The normalized UPC-A must itself pass EAN-13 validation.
        assert!(validate_ean13("0012345678905"));
        assert_eq!(
            normalize_to_ean13("4006381333931", Symbology::Ean13).as_deref(),
            Some("4006381333931")
        );
        assert_eq!(normalize_to_ean13("96385074", Symbology::Ean8), None);
        assert_eq!(normalize_to_ean13("123456", Symbology::UpcE), None);
    }

    #[test]
    fn symbology_labels_round_trip() {
        for s in [
            Symbology::Ean13,
            Symbology::Ean8,
            Symbology::UpcA,
            Symbology::UpcE,
            Symbology::Unknown,
        ] {
            assert_eq!(Symbology::from_label(s.as_label()), s);
        }
        assert_eq!(Symbology::from_label("QR"), Symbology::Unknown);
    }
}
