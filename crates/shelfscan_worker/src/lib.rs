//! Pipeline workers.
//!
//! Each worker is an independent process: it claims work (from the job
//! queue, or for the retry worker straight from the image store), runs one
//! image at a time, and coordinates with the other workers only through
//! store state. Exceptions are caught at the per-image boundary so one bad
//! image cannot stall a batch.

pub mod context;
pub mod decode_failed;
pub mod decode_fallback;
pub mod decode_primary;
pub mod dispatcher;
pub mod poll;
pub mod preprocess;
pub mod review;
pub mod scanner;

pub use context::WorkerContext;
pub use decode_failed::{RetryWorker, MAX_AI_ATTEMPTS};
pub use decode_fallback::FallbackDecodeWorker;
pub use decode_primary::PrimaryDecodeWorker;
pub use dispatcher::{DispatchCounts, Dispatcher};
pub use poll::{run_poll_loop, PollOptions};
pub use preprocess::{PassthroughPreprocessor, PreprocessWorker, Preprocessor};
pub use review::{apply_review_decision, ReviewAction, ReviewDecision};
pub use scanner::{BarcodeScanner, NullScanner, ScanResult};

/// How long one claimed job stays exclusively leased to a worker.
pub const DEFAULT_LEASE_SECS: i64 = 300;
