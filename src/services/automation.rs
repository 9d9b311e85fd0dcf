//! Run orchestration for the control center.
//!
//! [`AutomationService`] ties the pieces of a run together: it opens the run
//! log, points the [`FocusController`] at the requested window, prepares the
//! worker environment, and hands the script to the [`ProcessSupervisor`].
//! Lifecycle events are mirrored into telemetry and metrics by a listener task
//! spawned on the service's runtime.
//!
//! # Focus retries
//!
//! Browsers launched from the taskbar take a while to come up, so a helper
//! thread retries focusing after a startup delay. The log sink is paused for
//! the duration so its writes do not steal focus.

use crate::config::ConfigManager;
use crate::metrics::Metrics;
use crate::models::{AutomationSettings, ControlCenterConfig, normalize_slot, normalize_tab};
use crate::services::focus::FocusController;
use crate::services::log_sink::AsyncLogSink;
use crate::services::progress::reset_snapshot;
use crate::services::supervisor::{
    ProcessSupervisor, SupervisorConfig, SupervisorEvent, WorkerState,
};
use crate::services::telemetry::{TelemetryRecorder, details};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde_json::{Value, json};
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;

pub const ENV_BROWSER_TAB: &str = "MDF_BROWSER_TAB";
pub const ENV_BROWSER_TASKBAR_SLOT: &str = "MDF_BROWSER_TASKBAR_SLOT";
/// Older worker scripts read the slot under this name
pub const ENV_EDGE_TASKBAR_SLOT: &str = "MDF_EDGE_TASKBAR_SLOT";
pub const ENV_BROWSER_TITLE_HINT: &str = "MDF_BROWSER_TITLE_HINT";

/// Lower bound of the pause between focus retries
const MIN_FOCUS_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("An automation is already running")]
    AlreadyRunning,

    #[error("Script not found: {0}")]
    ScriptNotFound(Utf8PathBuf),

    #[error("Failed to open run log: {0}")]
    LogSession(#[source] io::Error),
}

/// What to run and which window it drives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub script: Utf8PathBuf,
    /// Browser tab to select, 0 leaves it unchanged
    pub tab_index: i64,
    pub window_hint: String,
    pub taskbar_slot: i64,
}

impl RunRequest {
    pub fn new(script: impl Into<Utf8PathBuf>) -> Self {
        Self {
            script: script.into(),
            tab_index: 0,
            window_hint: String::new(),
            taskbar_slot: 1,
        }
    }

    fn script_name(&self) -> String {
        self.script
            .file_name()
            .unwrap_or(self.script.as_str())
            .to_string()
    }

    /// Worker environment describing the target window.
    pub fn to_environment(&self) -> IndexMap<String, String> {
        let tab = normalize_tab(self.tab_index).to_string();
        let slot = normalize_slot(self.taskbar_slot).to_string();
        let mut env = IndexMap::new();
        env.insert(ENV_BROWSER_TAB.to_string(), tab);
        env.insert(ENV_BROWSER_TASKBAR_SLOT.to_string(), slot.clone());
        env.insert(ENV_EDGE_TASKBAR_SLOT.to_string(), slot);
        let hint = self.window_hint.trim();
        if !hint.is_empty() {
            env.insert(ENV_BROWSER_TITLE_HINT.to_string(), hint.to_string());
        }
        env
    }
}

/// Timing of the post-start focus retries
#[derive(Debug, Clone, Copy)]
struct FocusRetryPlan {
    startup_delay: Duration,
    attempts: u32,
    interval: Duration,
}

pub struct AutomationService {
    supervisor: Arc<ProcessSupervisor>,
    sink: Arc<AsyncLogSink>,
    focus: Arc<Mutex<FocusController>>,
    telemetry: Arc<TelemetryRecorder>,
    metrics: Arc<Metrics>,
    settings: Mutex<AutomationSettings>,
    config_manager: Option<ConfigManager>,
    progress_file: Utf8PathBuf,
    startup_focus_delay: Duration,
    run_started: Arc<Mutex<Option<Instant>>>,
}

impl AutomationService {
    /// Build the service and start its lifecycle listener on `runtime`.
    pub fn new(
        config: &ControlCenterConfig,
        focus: FocusController,
        runtime: Handle,
        metrics: Arc<Metrics>,
        config_manager: Option<ConfigManager>,
    ) -> Self {
        let sink = Arc::new(AsyncLogSink::new(config.log_sink.clone()));
        let telemetry = Arc::new(TelemetryRecorder::new(&config.telemetry));
        Self::with_parts(
            config,
            SupervisorConfig::from_config(config),
            sink,
            focus,
            telemetry,
            runtime,
            metrics,
            config_manager,
        )
    }

    /// Build the service around an existing sink and telemetry recorder.
    #[allow(clippy::too_many_arguments)]
    pub fn with_parts(
        config: &ControlCenterConfig,
        supervisor_config: SupervisorConfig,
        sink: Arc<AsyncLogSink>,
        focus: FocusController,
        telemetry: Arc<TelemetryRecorder>,
        runtime: Handle,
        metrics: Arc<Metrics>,
        config_manager: Option<ConfigManager>,
    ) -> Self {
        let progress_file = supervisor_config
            .progress_file
            .clone()
            .unwrap_or_else(|| config.worker.progress_file.clone());
        let supervisor = Arc::new(ProcessSupervisor::new(
            supervisor_config,
            Arc::clone(&sink),
            runtime.clone(),
        ));

        let service = Self {
            supervisor,
            sink,
            focus: Arc::new(Mutex::new(focus)),
            telemetry,
            metrics,
            settings: Mutex::new(config.automation.clone()),
            config_manager,
            progress_file,
            startup_focus_delay: Duration::from_millis(config.worker.startup_focus_delay_ms),
            run_started: Arc::new(Mutex::new(None)),
        };
        service.spawn_lifecycle_listener(&runtime);
        service
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub fn sink(&self) -> &Arc<AsyncLogSink> {
        &self.sink
    }

    pub fn focus(&self) -> &Arc<Mutex<FocusController>> {
        &self.focus
    }

    pub fn telemetry(&self) -> &Arc<TelemetryRecorder> {
        &self.telemetry
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn progress_file(&self) -> &Utf8Path {
        &self.progress_file
    }

    pub fn settings(&self) -> AutomationSettings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    /// Start a run.
    ///
    /// A spawn failure is not an error here: it arrives as
    /// `SupervisorEvent::Finished { exit_code: -1 }` like any other end of run.
    pub fn start(&self, request: &RunRequest) -> Result<(), AutomationError> {
        if self.supervisor.is_running() {
            return Err(AutomationError::AlreadyRunning);
        }
        if !request.script.is_file() {
            return Err(AutomationError::ScriptNotFound(request.script.clone()));
        }

        let script_name = request.script_name();
        let session_name = request.script.file_stem().unwrap_or(&script_name);
        let log_path = self
            .sink
            .start_session(session_name)
            .map_err(AutomationError::LogSession)?;
        tracing::info!("Run log for {}: {}", script_name, log_path);

        self.prepare_focus(request, &script_name);

        if let Err(e) = reset_snapshot(&self.progress_file) {
            tracing::warn!("Could not reset progress file {}: {}", self.progress_file, e);
        }

        let mut env = request.to_environment();
        env.extend(self.settings().to_environment());

        if !self.supervisor.start(&request.script, &env) {
            self.sink.abort_session(true);
            return Err(AutomationError::AlreadyRunning);
        }

        self.telemetry.record_event(
            "automation_requested",
            details([
                ("script", json!(script_name)),
                ("tab_index", json!(normalize_tab(request.tab_index))),
                ("window_hint", json!(request.window_hint)),
            ]),
        );

        if self.supervisor.state() != WorkerState::Terminated(-1) {
            self.spawn_focus_retry(script_name);
        }
        Ok(())
    }

    /// Retarget focus for this run and try once to bring the window up.
    fn prepare_focus(&self, request: &RunRequest, script_name: &str) {
        let mut focus = self.focus.lock().unwrap_or_else(PoisonError::into_inner);
        let hint = Some(request.window_hint.as_str());
        focus.configure(request.tab_index, request.taskbar_slot, hint);
        focus.prepare_for_execution();

        let focused = focus.ensure_focus(true, true);
        self.metrics.record_focus_attempt(focused);
        let event = if focused { "focus_ready" } else { "focus_failure" };
        if !focused {
            tracing::warn!("Target window not focused before start of {}", script_name);
        }
        self.telemetry.record_event(
            event,
            details([
                ("script", json!(script_name)),
                ("window_hint", json!(request.window_hint)),
            ]),
        );
    }

    fn spawn_focus_retry(&self, script_name: String) {
        let settings = self.settings();
        let plan = FocusRetryPlan {
            startup_delay: self.startup_focus_delay,
            attempts: settings.focus_retry_attempts.max(1),
            interval: settings.focus_retry_interval().max(MIN_FOCUS_RETRY_DELAY),
        };
        let focus = Arc::clone(&self.focus);
        let sink = Arc::clone(&self.sink);
        let supervisor = Arc::clone(&self.supervisor);
        let telemetry = Arc::clone(&self.telemetry);
        let metrics = Arc::clone(&self.metrics);

        let spawned = thread::Builder::new()
            .name("automdf-focus-retry".to_string())
            .spawn(move || {
                thread::sleep(plan.startup_delay);
                if !supervisor.is_running() {
                    return;
                }

                let paused = sink.pause_guard();
                let mut focused = false;
                for attempt in 1..=plan.attempts {
                    focused = focus
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .ensure_focus(true, false);
                    metrics.record_focus_attempt(focused);
                    if focused || !supervisor.is_running() {
                        break;
                    }
                    tracing::debug!("Focus retry {} of {} failed", attempt, plan.attempts);
                    thread::sleep(plan.interval);
                }
                drop(paused);

                if !focused && supervisor.is_running() {
                    tracing::warn!("Could not focus the target window for {}", script_name);
                    telemetry.record_event(
                        "focus_retry_failed",
                        details([
                            ("script", json!(script_name)),
                            ("attempts", json!(plan.attempts)),
                        ]),
                    );
                }
            });
        if let Err(e) = spawned {
            tracing::warn!("Focus retry thread failed to start: {}", e);
        }
    }

    fn spawn_lifecycle_listener(&self, runtime: &Handle) {
        let mut events = self.supervisor.subscribe();
        let telemetry = Arc::clone(&self.telemetry);
        let metrics = Arc::clone(&self.metrics);
        let run_started = Arc::clone(&self.run_started);

        runtime.spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("Lifecycle listener skipped {} events", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                match event {
                    SupervisorEvent::Started { path } => {
                        metrics.record_run_started();
                        *run_started.lock().unwrap_or_else(PoisonError::into_inner) =
                            Some(Instant::now());
                        let script = path.file_name().unwrap_or(path.as_str()).to_string();
                        telemetry
                            .record_event("automation_started", details([("script", json!(script))]));
                    }
                    SupervisorEvent::Finished { exit_code } => {
                        let elapsed = run_started
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .take()
                            .map(|at| at.elapsed())
                            .unwrap_or_default();
                        metrics.record_run_finished(exit_code, elapsed);
                        telemetry.record_event(
                            "automation_finished",
                            details([("exit_code", json!(exit_code))]),
                        );
                    }
                    SupervisorEvent::Line(_) => metrics.record_line_logged(),
                    SupervisorEvent::ProtocolWarning(_) => metrics.record_protocol_error(),
                    SupervisorEvent::BridgeRequest(_) => {}
                }
            }
        });
    }

    /// Apply new timing settings to later runs, optionally saving them.
    pub fn update_settings(&self, mut settings: AutomationSettings, persist: bool) {
        settings.normalize();
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = settings.clone();

        let persist_error = match (&self.config_manager, persist) {
            (Some(manager), true) => manager.save_automation_settings(&settings).err(),
            _ => None,
        };

        let mut entry_details = match serde_json::to_value(&settings) {
            Ok(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        entry_details.insert(
            "persisted".to_string(),
            json!(persist && self.config_manager.is_some() && persist_error.is_none()),
        );
        self.telemetry.record_event("settings_updated", entry_details);

        if let Some(e) = persist_error {
            tracing::error!("Failed to persist automation settings: {:#}", e);
            self.telemetry.record_event(
                "settings_persist_failure",
                details([("error", json!(format!("{:#}", e)))]),
            );
        }
    }

    /// Request the running worker to stop. Idempotent.
    pub fn stop(&self) {
        self.supervisor.stop();
    }

    /// Block until the worker exits or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.supervisor.wait_blocking(timeout)
    }

    /// Stop the worker, clear the progress file and flush the log sink.
    pub fn shutdown(&self, timeout: Duration) {
        self.stop();
        if !self.wait(timeout) {
            tracing::warn!("Worker did not exit within {:?}", timeout);
        }
        if let Err(e) = reset_snapshot(&self.progress_file) {
            tracing::debug!("Could not remove progress file: {}", e);
        }
        if !self.sink.shutdown(timeout) {
            tracing::warn!("Log sink did not finish within {:?}", timeout);
        }
        self.metrics.set_lines_dropped(self.sink.dropped_lines());
    }
}
