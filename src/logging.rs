use anyhow::{Context, Result};
use camino::Utf8Path;
use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default directory for the control center's own diagnostics
pub const DEFAULT_LOG_DIR: &str = "logs";

/// File prefix of the diagnostics log, rotated daily
pub const DEFAULT_LOG_PREFIX: &str = "automdf";

/// Environment variable that overrides the level filter, e.g. `automdf=trace`
pub const LOG_FILTER_ENV: &str = "AUTOMDF_LOG";

/// Set up application diagnostics with a daily rotating file.
///
/// These are the control center's own logs. Worker output goes to per-run
/// files through [`AsyncLogSink`](crate::services::AsyncLogSink) instead.
///
/// Hold the returned guard until exit or buffered lines are lost.
pub fn setup_logging(log_dir: &str, log_prefix: &str, debug_mode: bool) -> Result<WorkerGuard> {
    setup_logging_with_console(log_dir, log_prefix, debug_mode, false)
}

/// Like [`setup_logging`], optionally mirroring to the console.
pub fn setup_logging_with_console(
    log_dir: &str,
    log_prefix: &str,
    debug_mode: bool,
    console_output: bool,
) -> Result<WorkerGuard> {
    ensure_log_dir(Utf8Path::new(log_dir))?;

    let file_appender = rolling::daily(log_dir, log_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    // Console layer is optional; Option<Layer> is itself a layer
    let console_layer = console_output.then(|| {
        tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(build_filter(debug_mode))
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    tracing::info!(
        "Logging initialized: dir={}, prefix={}, debug={}, console={}",
        log_dir,
        log_prefix,
        debug_mode,
        console_output
    );

    Ok(guard)
}

/// `AUTOMDF_LOG` wins when set and valid, otherwise `info` or `debug`.
fn build_filter(debug_mode: bool) -> EnvFilter {
    let fallback = if debug_mode { "debug" } else { "info" };
    EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(fallback))
}

fn ensure_log_dir(log_dir: &Utf8Path) -> Result<()> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir))?;
    }
    Ok(())
}
