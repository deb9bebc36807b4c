//! Logging setup.
//!
//! The long-running `controller` subcommand logs JSON to a daily-rotated file
//! and text to stderr ([`init_production`]). One-shot subcommands log to
//! stderr only ([`init_cli`]). Both honour `RUST_LOG`, defaulting to `info`.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Keeps the file writer alive; dropping it flushes buffered entries.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Log JSON to `{logs_dir}/straylight.log.YYYY-MM-DD` and text to stderr.
///
/// Hold the returned guard until the process exits.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created or a global
/// logger is already installed.
pub fn init_production(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, "straylight.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking);

    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(json_layer)
        .with(console_layer)
        .try_init()
        .context("a global logger is already installed")?;

    Ok(LoggingGuard { _guard: guard })
}

/// Log text to stderr. Safe to call more than once; later calls are no-ops.
pub fn init_cli() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init();
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
