//! Ledger Bench - Concurrent Funds-Transfer Benchmark
//!
//! Runs a batch of transfers against a ledger through one of two backends
//! and reports completion time and failure count.
//!
//! # Modules
//!
//! - [`core_types`] - Type aliases (AccountId, Amount)
//! - [`models`] - Account and Transaction
//! - [`config`] - YAML configuration with environment overrides
//! - [`logging`] - tracing subscriber setup
//! - [`db`] - PostgreSQL pool and schema
//! - [`csv_io`] - Account / transaction fixture import
//! - [`transfer`] - Retry policy, backends and batch executor

// Core types - must be first!
pub mod core_types;

pub mod config;
pub mod csv_io;
pub mod db;
pub mod logging;
pub mod models;
pub mod transfer;

// Convenient re-exports at crate root
pub use config::{AppConfig, ExecutionMode};
pub use core_types::{AccountId, Amount};
pub use models::{Account, Transaction};
pub use transfer::{
    BackendKind, BatchExecutor, BatchReport, DirectLedgerBackend, ExecutorConfig,
    RemoteLedgerBackend, RetryPolicy, TransferBackend, TransferError,
};
