//! State store for the Shelfscan pipeline.
//!
//! SQLite is the coordination substrate: workers never talk to each other,
//! they read and write image, detection, product, and job rows here. The
//! job queue lives in [`queue`] and is the only place with claim semantics;
//! the repositories are plain CRUD with state-machine-checked status writes.

pub mod detections;
pub mod error;
pub mod images;
pub mod products;
pub mod queue;
mod schema;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

pub use detections::DetectionRepository;
pub use error::StoreError;
pub use images::ImageRepository;
pub use products::ProductRepository;
pub use queue::{JobQueue, QueueStatRow};

/// Handle to the state store. Cheap to clone; all repositories borrow the
/// same connection pool.
#[derive(Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
}

impl Store {
    /// Open (and create if missing) the store at `url`, e.g.
    /// `sqlite:shelfscan.db`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(StoreError::from)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Ok(Self { pool })
    }

    /// In-memory store for tests. Single connection: an in-memory SQLite
    /// database is per-connection.
    pub async fn connect_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    /// Create tables and single-field indexes.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        schema::init(&self.pool).await
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub fn images(&self) -> ImageRepository<'_> {
        ImageRepository::new(&self.pool)
    }

    pub fn detections(&self) -> DetectionRepository<'_> {
        DetectionRepository::new(&self.pool)
    }

    pub fn products(&self) -> ProductRepository<'_> {
        ProductRepository::new(&self.pool)
    }

    pub fn jobs(&self) -> JobQueue<'_> {
        JobQueue::new(&self.pool)
    }
}
