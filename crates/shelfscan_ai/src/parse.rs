//! Tolerant parsing of model output.
//!
//! Models wrap JSON in prose or markdown fences despite instructions. The
//! extraction order is fixed: direct parse, then a `[...]` span, then a
//! `{...}` span, then a fenced code block. Items without a usable `code`
//! are dropped without comment; the local validator is the gatekeeper.

use regex::Regex;
use serde_json::Value;

use shelfscan_barcode::validate;

use crate::ExtractedCode;

/// Parse response text into candidate readings, validating each code.
pub fn parse_results(text: &str) -> Vec<ExtractedCode> {
    let Some(json) = extract_json(text) else {
        return Vec::new();
    };

    let items = match json {
        Value::Array(items) => items,
        other => vec![other],
    };

    let mut results = Vec::new();
    for item in items {
        let Value::Object(map) = item else { continue };
        let code = match map.get("code") {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => continue,
        };
        if code.is_empty() {
            continue;
        }
        let symbology_guess = map
            .get("symbologyGuess")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_string();
        let confidence = map
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        results.push(ExtractedCode {
            validation: validate(&code),
            code,
            symbology_guess,
            confidence,
        });
    }
    results
}

/// Pull a JSON value out of free-form text.
fn extract_json(text: &str) -> Option<Value> {
    let text = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }

    // Regexes are infallible here; the patterns are literals.
    let array_re = Regex::new(r"(?s)\[.*\]").ok()?;
    if let Some(m) = array_re.find(text) {
        if let Ok(value) = serde_json::from_str::<Value>(m.as_str()) {
            return Some(value);
        }
    }

    let object_re = Regex::new(r"(?s)\{.*\}").ok()?;
    if let Some(m) = object_re.find(text) {
        if let Ok(value) = serde_json::from_str::<Value>(m.as_str()) {
            return Some(value);
        }
    }

    let fence_re = Regex::new(r"(?s)```(?:json)?\s*(.*?)```").ok()?;
    if let Some(caps) = fence_re.captures(text) {
        if let Ok(value) = serde_json::from_str::<Value>(caps.get(1)?.as_str()) {
            return Some(value);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelfscan_barcode::Symbology;

    #[test]
    fn parses_clean_json_array() {
        let text = r#"[{"code":"5901234123457","symbologyGuess":"EAN-13","confidence":0.9}]"#;
        let results = parse_results(text);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].code, "5901234123457");
        assert_eq!(results[0].symbology_guess, "EAN-13");
        assert!((results[0].confidence - 0.9).abs() < f64::EPSILON);
        assert!(results[0].is_valid());
        assert_eq!(results[0].validation.symbology, Symbology::Ean13);
    }

    #[test]
    fn parses_array_embedded_in_prose() {
        let text = r#"Here is what I found on the label:
[{"code": "4006381333931", "symbologyGuess": "EAN-13", "confidence": 0.85}]
Let me know if you need more."#;
        let results = parse_results(text);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].code, "4006381333931");
    }

    #[test]
    fn parses_single_object_in_prose() {
        let text = r#"Result: {"code": "96385074", "symbologyGuess": "EAN-8", "confidence": 0.7}"#;
        let results = parse_results(text);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].validation.symbology, Symbology::Ean8);
    }

    #[test]
    fn parses_fenced_code_block() {
        let text = "```json\n[{\"code\": \"012345678905\", \"symbologyGuess\": \"UPC-A\", \"confidence\": 0.95}]\n```";
        let results = parse_results(text);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].validation.symbology, Symbology::UpcA);
    }

    #[test]
    fn empty_array_yields_nothing() {
        assert!(parse_results("[]").is_empty());
        assert!(parse_results("  \n[]\n ").is_empty());
    }

    #[test]
    fn items_without_code_are_dropped() {
        let text = r#"[
            {"symbologyGuess": "EAN-13", "confidence": 0.9},
            {"code": "", "confidence": 0.9},
            {"code": "5901234123457", "symbologyGuess": "EAN-13", "confidence": 0.9},
            "not an object"
        ]"#;
        let results = parse_results(text);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].code, "5901234123457");
    }

    #[test]
    fn numeric_codes_are_stringified() {
        let text = r#"[{"code": 5901234123457, "confidence": 0.5}]"#;
        let results = parse_results(text);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].code, "5901234123457");
        assert_eq!(results[0].symbology_guess, "UNKNOWN");
    }

    #[test]
    fn invalid_codes_are_kept_but_flagged() {
        // Bad checksum: kept in results, filtered later by valid_results().
        let text = r#"[{"code": "4006381333932", "symbologyGuess": "EAN-13", "confidence": 0.9}]"#;
        let results = parse_results(text);
        assert_eq!(results.len(), 1);
        assert!(!results[0].is_valid());
    }

    #[test]
    fn garbage_yields_nothing() {
        assert!(parse_results("I could not find any barcode.").is_empty());
        assert!(parse_results("").is_empty());
        assert!(parse_results("```json\nnot json\n```").is_empty());
    }
}
