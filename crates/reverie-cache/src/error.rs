use reverie_core::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("shared cache storage error: {0}")]
    Storage(String),

    #[error("cache codec error: {0}")]
    Codec(String),
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::StoreFault
    }
}

impl From<redb::Error> for CacheError {
    fn from(e: redb::Error) -> Self {
        CacheError::Storage(e.to_string())
    }
}

impl From<redb::DatabaseError> for CacheError {
    fn from(e: redb::DatabaseError) -> Self {
        CacheError::Storage(e.to_string())
    }
}

impl From<redb::TransactionError> for CacheError {
    fn from(e: redb::TransactionError) -> Self {
        CacheError::Storage(e.to_string())
    }
}

impl From<redb::TableError> for CacheError {
    fn from(e: redb::TableError) -> Self {
        CacheError::Storage(e.to_string())
    }
}

impl From<redb::StorageError> for CacheError {
    fn from(e: redb::StorageError) -> Self {
        CacheError::Storage(e.to_string())
    }
}

impl From<redb::CommitError> for CacheError {
    fn from(e: redb::CommitError) -> Self {
        CacheError::Storage(e.to_string())
    }
}
