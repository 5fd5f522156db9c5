//! Direct Ledger Backend
//!
//! Executes each transfer as one local PostgreSQL transaction on a shared pool.
//!
//! # Attempt State Machine
//!
//! ```text
//! BEGIN → LOCK-LOW → LOCK-HIGH → (DELAY) → DEBIT → CREDIT → COMMIT
//!           ↓           ↓           ↓        ↓       ↓        ↓
//!                          ROLLBACK → backoff → BEGIN
//! ```
//!
//! # Invariants
//!
//! 1. **Global lock order**: both rows are locked `FOR UPDATE` in ascending id
//!    order whatever the transfer direction, so no two transfers can wait on
//!    each other in a cycle.
//! 2. **No partial state**: every failed step rolls back before the next attempt.
//! 3. **BEGIN is not retried**: a pool or connection failure surfaces at once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::{Postgres, Row};
use tracing::{debug, error, warn};

use super::backend::{BackendCapabilities, BackendKind, TransferBackend};
use super::error::TransferError;
use super::retry::{AttemptError, RetryPolicy};
use crate::core_types::Amount;
use crate::models::{Account, Transaction};

/// Default factor applied to the executor's concurrency limit
pub const DEFAULT_DIRECT_MULTIPLIER: usize = 8;

/// PostgreSQL-backed transfer execution
pub struct DirectLedgerBackend {
    pool: PgPool,
    retry: Arc<RetryPolicy>,
    concurrency_multiplier: usize,
}

impl DirectLedgerBackend {
    pub fn new(pool: PgPool, retry: Arc<RetryPolicy>) -> Self {
        Self {
            pool,
            retry,
            concurrency_multiplier: DEFAULT_DIRECT_MULTIPLIER,
        }
    }

    pub fn with_concurrency_multiplier(mut self, multiplier: usize) -> Self {
        self.concurrency_multiplier = multiplier;
        self
    }

    /// All accounts as currently stored, ordered by id
    pub async fn balances(&self) -> Result<Vec<Account>, TransferError> {
        let rows = sqlx::query("SELECT id, balance FROM account ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let mut accounts = Vec::with_capacity(rows.len());
        for row in rows {
            accounts.push(Account {
                id: row.try_get("id")?,
                balance: row.try_get("balance")?,
            });
        }
        Ok(accounts)
    }

    /// Sum of all balances in the store
    pub async fn total_balance(&self) -> Result<Amount, TransferError> {
        let total: Amount = sqlx::query_scalar("SELECT COALESCE(SUM(balance), 0) FROM account")
            .fetch_one(&self.pool)
            .await?;
        Ok(total)
    }

    /// One pass through the attempt state machine
    async fn attempt_transfer(
        &self,
        transaction: &Transaction,
        delay: Duration,
        attempt: u32,
    ) -> Result<(), AttemptError> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!(attempt, error = %e, "Failed to begin transaction");
            AttemptError::Fatal(classify(e))
        })?;

        let (low, high) = transaction.lock_order();
        for id in [low, high] {
            match lock_row(&mut *tx, id).await {
                Ok(true) => {}
                Ok(false) => {
                    let _ = tx.rollback().await;
                    return Err(AttemptError::Fatal(TransferError::AccountNotFound(
                        id.to_string(),
                    )));
                }
                Err(e) => return Err(abort(tx, "lock", e).await),
            }
        }

        if !delay.is_zero() {
            if let Err(e) = sqlx::query("SELECT pg_sleep($1)")
                .bind(delay.as_secs_f64())
                .execute(&mut *tx)
                .await
            {
                let _ = tx.rollback().await;
                return Err(AttemptError::Fatal(TransferError::Store(format!(
                    "error during pg_sleep: {}",
                    e
                ))));
            }
        }

        if let Err(e) = apply_delta(&mut *tx, &transaction.from, -transaction.amount).await {
            return Err(abort(tx, "debit", e).await);
        }
        if let Err(e) = apply_delta(&mut *tx, &transaction.to, transaction.amount).await {
            return Err(abort(tx, "credit", e).await);
        }

        // a failed COMMIT leaves nothing applied
        tx.commit()
            .await
            .map_err(|e| AttemptError::Retryable(format!("commit: {}", e)))?;

        debug!(attempt, transfer = %transaction, "Transfer committed");
        Ok(())
    }
}

#[async_trait]
impl TransferBackend for DirectLedgerBackend {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            kind: BackendKind::Direct,
            concurrency_multiplier: self.concurrency_multiplier,
        }
    }

    async fn create_account(&self, account: &Account) -> Result<(), TransferError> {
        sqlx::query("INSERT INTO account (id, balance) VALUES ($1, $2)")
            .bind(&account.id)
            .bind(account.balance)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                warn!(account_id = %account.id, error = %e, "Failed to create account");
                classify(e)
            })?;
        Ok(())
    }

    async fn delete_all_accounts(&self) -> Result<(), TransferError> {
        let pool = &self.pool;
        self.retry
            .run("delete_all_accounts", |_| async move {
                sqlx::query("DELETE FROM account")
                    .execute(pool)
                    .await
                    .map(|_| ())
                    .map_err(|e| AttemptError::Retryable(e.to_string()))
            })
            .await
    }

    async fn transfer_balance(
        &self,
        transaction: &Transaction,
        delay: Duration,
    ) -> Result<(), TransferError> {
        self.retry
            .run("transfer_balance", |attempt| {
                self.attempt_transfer(transaction, delay, attempt)
            })
            .await
    }
}

/// Pool and connection problems are resource errors, everything else is the store's verdict
fn classify(e: sqlx::Error) -> TransferError {
    match e {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => TransferError::Resource(e.to_string()),
        other => TransferError::Store(other.to_string()),
    }
}

/// Returns `false` if there is no row to lock
async fn lock_row(conn: &mut PgConnection, id: &str) -> Result<bool, sqlx::Error> {
    let row = sqlx::query("SELECT 1 FROM account WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

async fn apply_delta(conn: &mut PgConnection, id: &str, delta: Amount) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE account SET balance = balance + $1 WHERE id = $2")
        .bind(delta)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn abort(tx: sqlx::Transaction<'_, Postgres>, step: &str, e: sqlx::Error) -> AttemptError {
    let _ = tx.rollback().await;
    AttemptError::Retryable(format!("{}: {}", step, e))
}
