//! Domain model for the Shelfscan pipeline.
//!
//! Records mirror the persisted documents (images, detections, jobs,
//! products); the [`status`] module owns the image state machine every
//! worker mutates status through, and [`paths`] owns the blob namespace
//! convention that encodes pipeline stage in object paths.

pub mod config;
pub mod detection;
pub mod image;
pub mod job;
pub mod paths;
pub mod product;
pub mod status;

pub use config::{LogFormat, Settings, SettingsError};
pub use detection::{DetectionRecord, DetectionSource};
pub use image::{DecoderAttempt, ImageRecord, PreprocessingInfo, ProcessingError, ProcessingInfo};
pub use job::{JobRecord, JobStatus, JobType};
pub use product::ProductRecord;
pub use status::{ImageStatus, TransitionError};
