//! Concurrent Transfer Execution Engine
//!
//! Executes batches of funds transfers against one of two ledger backends
//! and keeps the ledger consistent under heavy contention.
//!
//! # Architecture
//!
//! ```text
//! Vec<Transaction> ──▶ BatchExecutor ──▶ dyn TransferBackend
//!                      (semaphore +          ├─ DirectLedgerBackend (PostgreSQL tx)
//!                       join barrier)        └─ RemoteLedgerBackend (HTTP stored procedures)
//!                                                      │
//!                                                 RetryPolicy
//!                                          (linear backoff + jitter)
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Conservation**: debit and credit commit together or not at all
//! 2. **Deadlock freedom**: row locks are always taken in ascending id order
//! 3. **Bounded retry**: an operation makes at most `max_attempts` attempts
//! 4. **No cached balances**: every operation goes to the store of record

pub mod backend;
pub mod direct;
pub mod error;
pub mod executor;
pub mod remote;
pub mod retry;


// Re-exports for convenience
pub use backend::{BackendCapabilities, BackendKind, TransferBackend};
pub use direct::DirectLedgerBackend;
pub use error::TransferError;
pub use executor::{BatchExecutor, BatchReport, ExecutorConfig};
pub use remote::RemoteLedgerBackend;
pub use retry::{AttemptError, RetryPolicy};
