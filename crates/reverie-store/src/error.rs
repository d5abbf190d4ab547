use reverie_core::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Vector-index write failed inside the analysis commit protocol; the
    /// relational transaction was rolled back.
    #[error("vector index write failed: {0}")]
    IndexWrite(String),

    #[error("session is closed: {0}")]
    SessionClosed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Database(_)
            | StoreError::Serialization(_)
            | StoreError::IndexWrite(_) => ErrorKind::StoreFault,
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Conflict(_) => ErrorKind::Conflict,
            StoreError::SessionClosed(_) | StoreError::InvalidInput(_) => ErrorKind::InputInvalid,
        }
    }

    /// True when the underlying SQLite error is a uniqueness violation.
    pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}
