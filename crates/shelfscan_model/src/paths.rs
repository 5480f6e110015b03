//! Blob namespace convention.
//!
//! The first path segment encodes pipeline stage:
//!
//! ```text
//! incoming/{batch}/{image_id}.{ext}
//! archived/{batch}/{image_id}.{ext}
//! preprocessed/{batch}/{image_id}_norm.{ext}
//! processed/{batch}/{image_id}.{ext}
//! manual-review/{batch}/{image_id}.{ext}
//! failed/{batch}/{image_id}.{ext}
//! ```

use thiserror::Error;

pub const INCOMING: &str = "incoming";
pub const ARCHIVED: &str = "archived";
pub const PREPROCESSED: &str = "preprocessed";
pub const PROCESSED: &str = "processed";
pub const MANUAL_REVIEW: &str = "manual-review";
pub const FAILED: &str = "failed";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("invalid blob path format: {0}")]
    InvalidFormat(String),
}

pub fn incoming(batch_id: &str, image_id: &str, extension: &str) -> String {
    format!("{INCOMING}/{batch_id}/{image_id}.{extension}")
}

pub fn archived(batch_id: &str, image_id: &str, extension: &str) -> String {
    format!("{ARCHIVED}/{batch_id}/{image_id}.{extension}")
}

/// Normalised artifacts carry a `_norm` suffix before the extension.
pub fn preprocessed(batch_id: &str, image_id: &str, extension: &str) -> String {
    format!("{PREPROCESSED}/{batch_id}/{image_id}_norm.{extension}")
}

pub fn processed(batch_id: &str, image_id: &str, extension: &str) -> String {
    format!("{PROCESSED}/{batch_id}/{image_id}.{extension}")
}

pub fn manual_review(batch_id: &str, image_id: &str, extension: &str) -> String {
    format!("{MANUAL_REVIEW}/{batch_id}/{image_id}.{extension}")
}

pub fn failed(batch_id: &str, image_id: &str, extension: &str) -> String {
    format!("{FAILED}/{batch_id}/{image_id}.{extension}")
}

/// Extract `(batch_id, image_id)` from any stage path: segments 2 and 3,
/// extension stripped, trailing `_norm` stripped.
pub fn extract_batch_and_image_id(path: &str) -> Result<(String, String), PathError> {
    let mut parts = path.split('/');
    let _folder = parts.next();
    let batch_id = parts.next();
    let filename = parts.next();
    match (batch_id, filename) {
        (Some(batch_id), Some(filename)) if !batch_id.is_empty() && !filename.is_empty() => {
            let stem = match filename.rsplit_once('.') {
                Some((stem, _ext)) => stem,
                None => filename,
            };
            let image_id = stem.strip_suffix("_norm").unwrap_or(stem);
            Ok((batch_id.to_string(), image_id.to_string()))
        }
        _ => Err(PathError::InvalidFormat(path.to_string())),
    }
}

/// First path segment.
pub fn folder_of(path: &str) -> &str {
    path.split('/').next().unwrap_or("")
}

/// File extension, empty when there is none.
pub fn extension_of(path: &str) -> &str {
    match path.rsplit_once('.') {
        Some((_, ext)) => ext,
        None => "",
    }
}

/// Replace the folder segment, keeping the rest of the path.
pub fn change_folder(path: &str, new_folder: &str) -> Result<String, PathError> {
    match path.split_once('/') {
        Some((_, rest)) if !rest.is_empty() => Ok(format!("{new_folder}/{rest}")),
        _ => Err(PathError::InvalidFormat(path.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_stage_paths() {
        assert_eq!(incoming("b1", "img", "jpg"), "incoming/b1/img.jpg");
        assert_eq!(archived("b1", "img", "png"), "archived/b1/img.png");
        assert_eq!(
            preprocessed("b1", "img", "jpg"),
            "preprocessed/b1/img_norm.jpg"
        );
        assert_eq!(processed("b1", "img", "jpg"), "processed/b1/img.jpg");
        assert_eq!(
            manual_review("b1", "img", "jpg"),
            "manual-review/b1/img.jpg"
        );
        assert_eq!(failed("b1", "img", "jpg"), "failed/b1/img.jpg");
    }

    #[test]
    fn extracts_ids_from_any_stage() {
        assert_eq!(
            extract_batch_and_image_id("incoming/batch1/abc123.jpg").unwrap(),
            ("batch1".to_string(), "abc123".to_string())
        );
        assert_eq!(
            extract_batch_and_image_id("preprocessed/batch1/abc123_norm.jpg").unwrap(),
            ("batch1".to_string(), "abc123".to_string())
        );
        assert_eq!(
            extract_batch_and_image_id("failed/b/x").unwrap(),
            ("b".to_string(), "x".to_string())
        );
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(extract_batch_and_image_id("no-folder.jpg").is_err());
        assert!(extract_batch_and_image_id("incoming/only-batch").is_err());
        assert!(change_folder("bare", PROCESSED).is_err());
    }

    #[test]
    fn folder_and_extension_helpers() {
        assert_eq!(folder_of("processed/b/x.jpg"), "processed");
        assert_eq!(extension_of("processed/b/x.jpg"), "jpg");
        assert_eq!(extension_of("processed/b/x"), "");
        assert_eq!(
            change_folder("preprocessed/b/x_norm.jpg", FAILED).unwrap(),
            "failed/b/x_norm.jpg"
        );
    }
}
