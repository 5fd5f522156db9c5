//! Ledger Bench - transfer benchmark runner
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────────┐    ┌──────────────────┐
//! │  Config  │───▶│  Import  │───▶│ Reset ledger │───▶│ BatchExecutor    │
//! │  (YAML)  │    │  (files) │    │ (delete+load)│    │ (seq/concurrent) │
//! └──────────┘    └──────────┘    └──────────────┘    └──────────────────┘
//! ```
//!
//! Flags: `--env/-e <name>`, `--backend <direct|remote>`, `--sequential`,
//! `--concurrent`, `--accounts <file>`, `--transactions <file>`,
//! `--limit <n>`, `--delay-ms <ms>`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info};

use ledger_bench::config::{AppConfig, ExecutionMode};
use ledger_bench::csv_io::{load_accounts, load_transactions};
use ledger_bench::db::Database;
use ledger_bench::logging::init_logging;
use ledger_bench::transfer::{
    BackendKind, BatchExecutor, DirectLedgerBackend, ExecutorConfig, RemoteLedgerBackend,
    RetryPolicy, TransferBackend,
};

// ============================================================
// COMMAND LINE
// ============================================================

fn get_arg_value(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn has_flag(name: &str) -> bool {
    std::env::args().any(|a| a == name)
}

fn get_env() -> String {
    get_arg_value(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

fn apply_cli_overrides(config: &mut AppConfig) -> Result<()> {
    if let Some(backend) = get_arg_value(&["--backend"]) {
        config.bench.backend = BackendKind::from_selector(&backend);
    }
    if has_flag("--sequential") {
        config.bench.mode = ExecutionMode::Sequential;
    } else if has_flag("--concurrent") {
        config.bench.mode = ExecutionMode::Concurrent;
    }
    if let Some(path) = get_arg_value(&["--accounts"]) {
        config.bench.accounts_file = PathBuf::from(path);
    }
    if let Some(path) = get_arg_value(&["--transactions"]) {
        config.bench.transactions_file = PathBuf::from(path);
    }
    if let Some(limit) = get_arg_value(&["--limit"]) {
        config.bench.concurrency_limit = limit
            .parse()
            .with_context(|| format!("Invalid --limit: {}", limit))?;
    }
    if let Some(delay) = get_arg_value(&["--delay-ms"]) {
        config.bench.transfer_delay_ms = delay
            .parse()
            .with_context(|| format!("Invalid --delay-ms: {}", delay))?;
    }
    Ok(())
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    let env = get_env();
    let mut config = AppConfig::load(&env)?;
    apply_cli_overrides(&mut config)?;
    let _log_guard = init_logging(&config);

    let kind = config.bench.backend;
    info!(
        backend = %kind,
        mode = ?config.bench.mode,
        limit = config.bench.concurrency_limit,
        "Starting ledger_bench in {} environment",
        env
    );

    let retry = Arc::new(RetryPolicy::from_config(&config.retry));
    let multiplier = config.bench.concurrency_multiplier(kind);

    // keep the concrete handle for balance verification
    let mut direct: Option<Arc<DirectLedgerBackend>> = None;
    let backend: Arc<dyn TransferBackend> = match kind {
        BackendKind::Direct => {
            let db = Database::connect(&config.postgres)
                .await
                .context("Unable to create connection pool")?;
            db.health_check().await.context("Database health check failed")?;
            db.ensure_schema().await.context("Unable to create schema")?;
            let backend = Arc::new(
                DirectLedgerBackend::new(db.pool().clone(), retry)
                    .with_concurrency_multiplier(multiplier),
            );
            direct = Some(backend.clone());
            backend
        }
        BackendKind::Remote => Arc::new(
            RemoteLedgerBackend::new(&config.remote, retry)?
                .with_concurrency_multiplier(multiplier),
        ),
    };

    let accounts = load_accounts(&config.bench.accounts_file)?;
    let transactions = load_transactions(&config.bench.transactions_file)?;

    let executor = BatchExecutor::new(
        backend,
        ExecutorConfig {
            concurrency_limit: config.bench.concurrency_limit,
            transfer_delay: Duration::from_millis(config.bench.transfer_delay_ms),
        },
    );

    executor
        .reset_ledger(&accounts)
        .await
        .context("Error preparing ledger")?;
    info!("File imported.");

    let total_before = match &direct {
        Some(d) => Some(d.total_balance().await?),
        None => None,
    };

    let report = match executor.run(config.bench.mode, transactions).await {
        Ok(report) => report,
        Err(e) if e.is_infrastructure() => {
            error!(code = e.code(), "Backend unavailable, batch aborted");
            return Err(anyhow::Error::new(e).context("Backend unavailable"));
        }
        Err(e) => return Err(anyhow::Error::new(e).context("Error transferring balance")),
    };

    info!(
        total = report.total,
        succeeded = report.succeeded,
        failed = report.failed,
        throughput = format!("{:.1}/s", report.throughput()),
        "Time: {:?}",
        report.elapsed
    );

    if let (Some(d), Some(before)) = (&direct, total_before) {
        let after = d.total_balance().await?;
        if after == before {
            info!(total = %after, "Total balance conserved");
        } else {
            error!(before = %before, after = %after, "Total balance changed during batch");
            anyhow::bail!("conservation violated: {} != {}", before, after);
        }
    }

    Ok(())
}
