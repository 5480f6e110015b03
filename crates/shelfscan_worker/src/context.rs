//! Shared worker dependencies.
//!
//! Clients are built once per process and passed in explicitly; nothing in
//! the workers reaches for process-wide state.

use std::sync::Arc;

use shelfscan_blob::BlobStore;
use shelfscan_model::Settings;
use shelfscan_store::Store;

#[derive(Clone)]
pub struct WorkerContext {
    pub store: Store,
    pub blobs: Arc<dyn BlobStore>,
    pub settings: Settings,
}

impl WorkerContext {
    pub fn new(store: Store, blobs: Arc<dyn BlobStore>, settings: Settings) -> Self {
        Self {
            store,
            blobs,
            settings,
        }
    }

    /// Worker instance id, unique per process.
    pub fn worker_id(kind: &str) -> String {
        let suffix = uuid::Uuid::new_v4().to_string();
        let short = suffix.split('-').next().unwrap_or("0");
        format!("{kind}-{short}")
    }
}
