use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("organization has {available} unallocated credits available")]
    InsufficientOrgCredits { available: u64 },
    #[error("student has {available} unused credits available to reclaim")]
    InsufficientUnusedCredits { available: u64 },
    #[error("no credits remaining")]
    NoCreditsRemaining,
    #[error("account {0} not found")]
    AccountNotFound(String),
    #[error("transaction conflict after {attempts} attempts")]
    TransactionConflict { attempts: u32 },
    #[error("invalid amount: {0}")]
    InvalidAmount(i64),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl LedgerError {
    /// Transient write contention worth another read-validate-write pass.
    /// Capacity and input errors are final and must never be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Storage(err) if err.is_busy())
    }
}
