//! Blob storage capability.
//!
//! The pipeline addresses blobs by container-relative paths whose first
//! segment encodes the stage (incoming/, preprocessed/, processed/, ...).
//! Workers only ever see the [`BlobStore`] trait; the bundled backend keeps
//! blobs on the local filesystem. Moves are copy-then-delete and must
//! tolerate partial completion: a retry that finds the destination already
//! present proceeds as success, and an orphaned source is left for
//! retention to clean up.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("invalid blob path: {0}")]
    InvalidPath(String),
    #[error("blob i/o error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl BlobError {
    fn io(path: &str, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            source,
        }
    }
}

/// Capability interface over the object store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload, overwriting any existing blob at `path`.
    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
        metadata: Option<&HashMap<String, String>>,
    ) -> Result<(), BlobError>;

    async fn get(&self, path: &str) -> Result<Vec<u8>, BlobError>;

    async fn exists(&self, path: &str) -> Result<bool, BlobError>;

    /// Delete; missing blobs report `false` rather than an error.
    async fn delete(&self, path: &str) -> Result<bool, BlobError>;

    /// Copy, waiting for completion.
    async fn copy(&self, src: &str, dst: &str) -> Result<(), BlobError>;

    /// Copy then delete. Partial completion is tolerated on retry.
    async fn r#move(&self, src: &str, dst: &str) -> Result<(), BlobError> {
        self.copy(src, dst).await?;
        if !self.delete(src).await? {
            debug!(src, "move: source already gone");
        }
        Ok(())
    }

    /// List blob paths under a prefix, lexicographically ordered.
    async fn list(&self, prefix: &str, max: Option<usize>) -> Result<Vec<String>, BlobError>;

    /// A URL a reader outside the pipeline can fetch the blob from.
    async fn presigned_url(
        &self,
        path: &str,
        ttl: Duration,
        read_only: bool,
    ) -> Result<String, BlobError>;
}

/// Filesystem-backed blob store rooted at `<root>/<container>`.
pub struct FsBlobStore {
    container_dir: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, container: &str) -> Self {
        Self {
            container_dir: root.into().join(container),
        }
    }

    /// Resolve a container-relative blob path, refusing traversal segments.
    fn resolve(&self, path: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(path);
        let clean = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if path.is_empty() || !clean {
            return Err(BlobError::InvalidPath(path.to_string()));
        }
        Ok(self.container_dir.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        _content_type: &str,
        _metadata: Option<&HashMap<String, String>>,
    ) -> Result<(), BlobError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobError::io(path, e))?;
        }
        tokio::fs::write(&full, bytes)
            .await
            .map_err(|e| BlobError::io(path, e))
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(path.to_string()))
            }
            Err(e) => Err(BlobError::io(path, e)),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, BlobError> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&full)
            .await
            .map_err(|e| BlobError::io(path, e))?)
    }

    async fn delete(&self, path: &str) -> Result<bool, BlobError> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BlobError::io(path, e)),
        }
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<(), BlobError> {
        let src_full = self.resolve(src)?;
        let dst_full = self.resolve(dst)?;
        if let Some(parent) = dst_full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobError::io(dst, e))?;
        }
        match tokio::fs::copy(&src_full, &dst_full).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // A previous partially-completed move may have already
                // placed the destination; treat that as done.
                if tokio::fs::try_exists(&dst_full)
                    .await
                    .map_err(|e| BlobError::io(dst, e))?
                {
                    warn!(src, dst, "copy: source missing but destination present");
                    Ok(())
                } else {
                    Err(BlobError::NotFound(src.to_string()))
                }
            }
            Err(e) => Err(BlobError::io(src, e)),
        }
    }

    async fn list(&self, prefix: &str, max: Option<usize>) -> Result<Vec<String>, BlobError> {
        let mut found = Vec::new();
        let mut stack = vec![self.container_dir.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(BlobError::io(prefix, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| BlobError::io(prefix, e))?
            {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.container_dir) {
                    let rel = rel.to_string_lossy().replace('\\', "/");
                    if rel.starts_with(prefix) {
                        found.push(rel);
                    }
                }
            }
        }
        found.sort();
        if let Some(max) = max {
            found.truncate(max);
        }
        Ok(found)
    }

    async fn presigned_url(
        &self,
        path: &str,
        _ttl: Duration,
        _read_only: bool,
    ) -> Result<String, BlobError> {
        let full = self.resolve(path)?;
        Ok(format!("file://{}", full.display()))
    }
}
