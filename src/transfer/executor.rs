//! Batch Executor
//!
//! Drives a batch of transactions through a [`TransferBackend`].
//!
//! - **Sequential**: one transfer at a time, the first failure aborts the batch.
//! - **Concurrent**: one worker per transaction, admitted through a counting
//!   semaphore. Failures are logged and counted, never raised. Returns only
//!   after every dispatched worker has finished.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use super::backend::TransferBackend;
use super::error::TransferError;
use crate::config::ExecutionMode;
use crate::models::{Account, Transaction};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Base number of transfers in flight; scaled by the backend's multiplier
    pub concurrency_limit: usize,
    /// Hold injected into every transfer after its row locks are taken
    pub transfer_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 10,
            transfer_delay: Duration::ZERO,
        }
    }
}

/// Aggregate outcome of one batch run.
///
/// Only counts are reported; which transactions failed is visible in the
/// logs alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl BatchReport {
    /// Transfers completed per second, failures included
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.succeeded + self.failed) as f64 / secs
        } else {
            0.0
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.succeeded == self.total
    }
}

pub struct BatchExecutor {
    backend: Arc<dyn TransferBackend>,
    config: ExecutorConfig,
}

impl BatchExecutor {
    pub fn new(backend: Arc<dyn TransferBackend>, config: ExecutorConfig) -> Self {
        Self { backend, config }
    }

    /// Concurrency limit after applying the backend-reported multiplier
    pub fn effective_limit(&self) -> usize {
        self.backend
            .capabilities()
            .effective_limit(self.config.concurrency_limit)
    }

    /// Empty the ledger, then create `accounts` one by one. Fail-fast.
    pub async fn reset_ledger(&self, accounts: &[Account]) -> Result<(), TransferError> {
        self.backend.delete_all_accounts().await?;
        for account in accounts {
            self.backend.create_account(account).await.map_err(|e| {
                error!(account_id = %account.id, error = %e, "Error creating account");
                e
            })?;
        }
        info!(accounts = accounts.len(), "Ledger reset");
        Ok(())
    }

    pub async fn run(
        &self,
        mode: ExecutionMode,
        transactions: Vec<Transaction>,
    ) -> Result<BatchReport, TransferError> {
        match mode {
            ExecutionMode::Sequential => self.run_sequential(&transactions).await,
            ExecutionMode::Concurrent => Ok(self.run_concurrent(transactions).await),
        }
    }

    /// Execute in order; abort on the first failure
    pub async fn run_sequential(
        &self,
        transactions: &[Transaction],
    ) -> Result<BatchReport, TransferError> {
        let span = info_span!(
            "batch",
            run_id = %Uuid::new_v4(),
            mode = "sequential",
            backend = %self.backend.capabilities().kind,
        );

        async {
            let started = Instant::now();
            for (index, transaction) in transactions.iter().enumerate() {
                if let Err(e) = self
                    .backend
                    .transfer_balance(transaction, self.config.transfer_delay)
                    .await
                {
                    error!(
                        index,
                        transfer = %transaction,
                        code = e.code(),
                        error = %e,
                        "Error transferring balance, aborting batch"
                    );
                    return Err(e);
                }
            }

            let report = BatchReport {
                total: transactions.len(),
                succeeded: transactions.len(),
                failed: 0,
                elapsed: started.elapsed(),
            };
            info!(
                total = report.total,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Batch completed"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Execute under bounded concurrency; failures are logged and counted
    pub async fn run_concurrent(&self, transactions: Vec<Transaction>) -> BatchReport {
        let limit = self.effective_limit();
        let span = info_span!(
            "batch",
            run_id = %Uuid::new_v4(),
            mode = "concurrent",
            backend = %self.backend.capabilities().kind,
            limit,
        );

        async {
            let started = Instant::now();
            let total = transactions.len();
            let semaphore = Arc::new(Semaphore::new(limit));
            let mut workers = JoinSet::new();
            let mut tally = Tally::default();

            for (index, transaction) in transactions.into_iter().enumerate() {
                // blocks dispatch while every slot is taken
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    // never closed
                    break;
                };

                let backend = self.backend.clone();
                let delay = self.config.transfer_delay;
                workers.spawn(
                    async move {
                        // released on every exit path, panics included
                        let _permit = permit;
                        let result = backend.transfer_balance(&transaction, delay).await;
                        if let Err(e) = &result {
                            error!(
                                index,
                                transfer = %transaction,
                                code = e.code(),
                                error = %e,
                                "Error transferring balance"
                            );
                        }
                        result
                    }
                    .in_current_span(),
                );

                while let Some(joined) = workers.try_join_next() {
                    tally.record(joined);
                }
            }

            // join barrier over all outstanding workers
            while let Some(joined) = workers.join_next().await {
                tally.record(joined);
            }

            let report = BatchReport {
                total,
                succeeded: tally.succeeded,
                failed: tally.failed,
                elapsed: started.elapsed(),
            };
            info!(
                total = report.total,
                succeeded = report.succeeded,
                failed = report.failed,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Batch completed"
            );
            report
        }
        .instrument(span)
        .await
    }
}

#[derive(Default)]
struct Tally {
    succeeded: usize,
    failed: usize,
}

impl Tally {
    fn record(&mut self, joined: Result<Result<(), TransferError>, JoinError>) {
        match joined {
            Ok(Ok(())) => self.succeeded += 1,
            Ok(Err(_)) => self.failed += 1,
            Err(e) => {
                error!(error = %TransferError::from(e), "Transfer worker terminated abnormally");
                self.failed += 1;
            }
        }
    }
}
