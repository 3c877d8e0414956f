use std::io;

use rusqlite::{self, ErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("account {0} not found")]
    AccountNotFound(String),
    #[error("account {0} already exists")]
    AccountExists(String),
    #[error("quota limit {requested} is below committed credits {committed}")]
    QuotaBelowCommitted { requested: u64, committed: u64 },
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("connection poisoned")]
    ConnectionPoisoned,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// True for SQLITE_BUSY/SQLITE_LOCKED, the only failures worth a
    /// fresh read-validate-write attempt.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            StorageError::Database(rusqlite::Error::SqliteFailure(err, _))
                if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        )
    }
}
