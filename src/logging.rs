//! tracing subscriber setup
//!
//! Each backend logs to its own file (`ledger_bench.log` becomes
//! `ledger_bench-direct.log` / `ledger_bench-remote.log`), so runs against
//! both backends can be compared side by side.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;
use crate::transfer::BackendKind;

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process or buffered file output is lost.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let file_appender = RollingFileAppender::new(
        rotation(&config.rotation),
        &config.log_dir,
        log_file_name(&config.log_file, config.bench.backend),
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        let file_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(non_blocking)
            .with_ansi(false);
        registry.with(file_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_writer(non_blocking)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry.with(file_layer).with(stdout_layer).init();
    }

    guard
}

fn rotation(name: &str) -> Rotation {
    match name {
        "minutely" => Rotation::MINUTELY,
        "hourly" => Rotation::HOURLY,
        "daily" => Rotation::DAILY,
        _ => Rotation::NEVER,
    }
}

/// Crate level plus a separate level for the store clients.
/// sqlx logs every statement and reqwest every request at info.
pub fn filter_directives(config: &AppConfig) -> String {
    format!(
        "{level},sqlx={client},reqwest={client},hyper_util={client}",
        level = config.log_level,
        client = config.client_log_level
    )
}

/// `ledger_bench.log` + remote → `ledger_bench-remote.log`
pub fn log_file_name(base: &str, backend: BackendKind) -> String {
    let path = Path::new(base);
    let stem = path.file_stem().and_then(|s| s.to_str());
    let ext = path.extension().and_then(|e| e.to_str());
    match (stem, ext) {
        (Some(stem), Some(ext)) => format!("{}-{}.{}", stem, backend, ext),
        _ => format!("{}-{}", base, backend),
    }
}
