//! Transfer Backend Interface
//!
//! The capability set the batch executor drives. Both backends retry
//! internally; a returned error is always final.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use super::error::TransferError;
use crate::models::{Account, Transaction};

/// Backend kind tag carried alongside each backend instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local transactions against a shared PostgreSQL pool
    Direct,
    /// HTTP calls to remote stored procedures
    Remote,
}

impl BackendKind {
    /// Map an implementation selector (`postgrest`, `remote`, `sql`, ...) to a kind.
    /// Anything not naming the remote backend selects the direct one.
    pub fn from_selector(selector: &str) -> Self {
        match selector.trim().to_ascii_lowercase().as_str() {
            "postgrest" | "remote" | "rpc" => BackendKind::Remote,
            _ => BackendKind::Direct,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Direct => "direct",
            BackendKind::Remote => "remote",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities a backend reports to the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub kind: BackendKind,
    /// Factor applied to the configured concurrency limit.
    /// Pool acquisition is cheaper than a network round trip, so the
    /// direct backend sustains a larger factor.
    pub concurrency_multiplier: usize,
}

impl BackendCapabilities {
    /// Number of units admitted at once for a configured `limit`,
    /// capped at what a semaphore can hold
    #[inline]
    pub fn effective_limit(&self, limit: usize) -> usize {
        limit
            .saturating_mul(self.concurrency_multiplier)
            .clamp(1, Semaphore::MAX_PERMITS)
    }
}

/// Transfer execution backend
///
/// Implementations must be safe to share across many concurrent workers.
#[async_trait]
pub trait TransferBackend: Send + Sync {
    /// Kind tag and concurrency sizing for the executor
    fn capabilities(&self) -> BackendCapabilities;

    /// Insert a single account. Fails with [`TransferError::Store`] if the
    /// store rejects it (duplicate id, constraint violation).
    async fn create_account(&self, account: &Account) -> Result<(), TransferError>;

    /// Remove every account. Idempotent; retried against transient errors.
    async fn delete_all_accounts(&self) -> Result<(), TransferError>;

    /// Move `transaction.amount` from `from` to `to` atomically.
    ///
    /// `delay` holds the operation open after both rows are locked to widen
    /// the contention window. Pass [`Duration::ZERO`] for none.
    async fn transfer_balance(
        &self,
        transaction: &Transaction,
        delay: Duration,
    ) -> Result<(), TransferError>;
}
