use shelfscan_model::TransitionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("stored document is malformed: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },
}

impl StoreError {
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            id: id.into(),
        }
    }
}
