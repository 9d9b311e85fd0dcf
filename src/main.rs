//! AutoMDF Control Center
//!
//! Main entry point for the GUI application.
//!
//! # Overview
//!
//! The control center runs browser automation scripts as supervised worker
//! processes, answers their dialog requests through the Slint panel, keeps
//! per-run logs, and keeps the automated browser window focused. Startup:
//!
//! 1. Load `automdf.yaml` (defaults, file, then `AUTOMDF__*` overrides)
//! 2. Initialize diagnostics logging → `logs/automdf.<date>`
//! 3. Create the tokio runtime used by the supervisor, relay and watchers
//! 4. Probe the desktop backend and build the [`FocusController`]
//! 5. Build the [`AutomationService`] and the [`GuiController`]
//! 6. Run the Slint event loop until the window closes
//! 7. Stop any worker, reset the progress file, drain the run log, report metrics
//!
//! # Threads
//!
//! - **Main thread**: the Slint event loop
//! - **Tokio workers**: worker I/O, event relay, progress polling
//! - **Helper threads**: log sink consumer, UI bridge, state listener, focus retries

use anyhow::{Context, Result};
use automdf::config::ConfigManager;
use automdf::logging::{DEFAULT_LOG_DIR, DEFAULT_LOG_PREFIX};
use automdf::services::focus::FocusController;
use automdf::services::windowing::{CapabilityCache, platform_backends};
use automdf::services::AutomationService;
use automdf::ui::GuiController;
use automdf::{APP_NAME, Metrics, StateManager, VERSION};
use std::sync::Arc;
use std::time::Duration;

/// Where `automdf.yaml` lives unless overridden
const DEFAULT_CONFIG_DIR: &str = "config";
const CONFIG_DIR_ENV: &str = "AUTOMDF_CONFIG_DIR";
/// Set to 1/true to log at debug level
const DEBUG_ENV: &str = "AUTOMDF_DEBUG";

/// How long a running worker gets to exit when the window closes
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(1500);

const WORKER_THREADS: usize = 4;

fn main() -> Result<()> {
    let debug_mode = std::env::var(DEBUG_ENV)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    let _log_guard = automdf::logging::setup_logging_with_console(
        DEFAULT_LOG_DIR,
        DEFAULT_LOG_PREFIX,
        debug_mode,
        true,
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let config_dir =
        std::env::var(CONFIG_DIR_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_DIR.to_string());
    let config_manager = ConfigManager::new(&config_dir)?;
    let config = config_manager.load_config()?;
    tracing::info!(
        "Configuration loaded - scripts: {}, logs: {}, interpreter: {}",
        config.worker.scripts_dir,
        config.log_sink.logs_dir,
        config.worker.interpreter
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(WORKER_THREADS)
        .thread_name("automdf-worker")
        .build()
        .context("Failed to create tokio runtime")?;
    tracing::info!("Tokio runtime initialized with {} worker threads", WORKER_THREADS);

    let metrics = Arc::new(Metrics::new());

    let capabilities = Arc::new(CapabilityCache::new(Duration::from_secs(
        config.focus.probe_ttl_secs,
    )));
    let (enumerator, desktop) = platform_backends(capabilities);
    let focus = FocusController::new(enumerator, desktop, config.focus.clone());
    if !focus.can_enumerate() {
        tracing::warn!("Window enumeration unavailable - focus recovery is disabled");
    }

    let automation = Arc::new(AutomationService::new(
        &config,
        focus,
        runtime.handle().clone(),
        Arc::clone(&metrics),
        Some(config_manager),
    ));

    let state_manager = Arc::new(StateManager::new());
    let gui_controller = GuiController::new(
        Arc::clone(&state_manager),
        Arc::clone(&automation),
        &config,
        runtime.handle().clone(),
    )?;

    tracing::info!("GUI controller initialized, launching window");
    let result = gui_controller.run();

    tracing::info!("GUI closed, shutting down");
    if automation.is_running() {
        tracing::warn!("Window closed during a run - stopping worker");
    }
    automation.shutdown(SHUTDOWN_TIMEOUT);
    metrics.log_summary();

    runtime.shutdown_timeout(Duration::from_secs(5));
    tracing::info!("Application shutdown complete");

    result.map_err(|e| {
        tracing::error!("GUI error: {}", e);
        anyhow::anyhow!("GUI error: {}", e)
    })
}
