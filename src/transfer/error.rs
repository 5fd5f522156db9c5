//! Transfer Error Types
//!
//! Taxonomy shared by both backends and the batch executor.
//! Transient store errors never show up here: they are absorbed by the
//! retry loop and only surface as [`TransferError::RetryExhausted`].

use thiserror::Error;

use crate::core_types::AccountId;

/// Transfer error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    // === Store Errors ===
    #[error("Store rejected request: {0}")]
    Store(String),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Remote procedure rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    // === Retry Errors ===
    #[error("{operation} failed after {attempts} attempts: {last_cause}")]
    RetryExhausted {
        operation: &'static str,
        attempts: u32,
        last_cause: String,
    },

    // === Resource / Transport Errors ===
    #[error("Resource unavailable: {0}")]
    Resource(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Worker terminated abnormally: {0}")]
    Join(String),
}

impl TransferError {
    /// Get the error code for logs and reports
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::Store(_) => "STORE_ERROR",
            TransferError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            TransferError::Rejected { .. } => "REJECTED",
            TransferError::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            TransferError::Resource(_) => "RESOURCE_UNAVAILABLE",
            TransferError::Transport(_) => "TRANSPORT_ERROR",
            TransferError::Join(_) => "WORKER_FAILED",
        }
    }

    /// Permanent failure reached by spending the whole retry budget
    #[inline]
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, TransferError::RetryExhausted { .. })
    }

    /// Resource or transport problem surfaced without any retry
    #[inline]
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            TransferError::Resource(_) | TransferError::Transport(_)
        )
    }
}

impl From<sqlx::Error> for TransferError {
    fn from(e: sqlx::Error) -> Self {
        TransferError::Store(e.to_string())
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(e: reqwest::Error) -> Self {
        TransferError::Transport(e.to_string())
    }
}

impl From<tokio::task::JoinError> for TransferError {
    fn from(e: tokio::task::JoinError) -> Self {
        TransferError::Join(e.to_string())
    }
}
