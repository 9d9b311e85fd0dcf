// GUI Controller - Bridges the Slint control panel with the automation services
//
// This module contains the GuiController which coordinates between:
// - Slint UI (MainWindow)
// - StateManager (what the panel shows)
// - AutomationService (runs, log sink, focus)
// - GuiEventRelay (service events -> state and log view)
// - DialogMediator + SlintDialogPresenter (worker dialog requests)
//
// Data flows one way: services publish events, the relay folds them into the
// StateManager, and a subscription thread pushes each StateChange to the UI.

use super::bridge::{EventLoopBridge, EventLoopBridgeHandle, GuiEventRelay, RelayEvent};
use super::dialogs::SlintDialogPresenter;
use super::{LogLine, MainWindow};
use crate::models::{AppState, ControlCenterConfig, LogEntry, normalize_slot, normalize_tab};
use crate::services::automation::{AutomationService, RunRequest};
use crate::services::dialog::DialogMediator;
use crate::services::log_sink::SinkEvent;
use crate::services::progress::{ProgressEvent, ProgressWatcher};
use crate::services::scripts::{SCRIPT_EXTENSION, friendly_label, list_scripts};
use crate::services::supervisor::{PendingRequest, SupervisorEvent, WorkerState};
use crate::state::{StateChange, StateManager};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use slint::{ComponentHandle, Model, ModelRc, SharedString, VecModel};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Default file name offered by "Export log..."
const DEFAULT_EXPORT_NAME: &str = "automdf-log.txt";

/// Everything a callback needs, cloned into each closure
#[derive(Clone)]
struct ControllerContext {
    state: Arc<StateManager>,
    automation: Arc<AutomationService>,
    bridge: EventLoopBridgeHandle<MainWindow>,
    scripts_dir: Utf8PathBuf,
    /// Lines kept in the log view
    log_view_limit: usize,
}

/// Wires the control panel to state and services.
///
/// # Example
/// ```ignore
/// let controller = GuiController::new(state, automation, &config, runtime.handle().clone())?;
/// controller.run()?; // Blocks until the window is closed
/// ```
pub struct GuiController {
    ui: MainWindow,
    _bridge: EventLoopBridge<MainWindow>,
    _relay: GuiEventRelay,
    state_manager: Arc<StateManager>,
    progress: Arc<ProgressWatcher>,
}

impl GuiController {
    pub fn new(
        state_manager: Arc<StateManager>,
        automation: Arc<AutomationService>,
        config: &ControlCenterConfig,
        tokio_handle: tokio::runtime::Handle,
    ) -> Result<Self> {
        let ui = MainWindow::new().context("Failed to create Slint UI")?;
        let bridge = EventLoopBridge::new(
            &ui,
            tokio_handle.clone(),
            Some(Arc::clone(automation.metrics())),
        );

        let ctx = ControllerContext {
            state: Arc::clone(&state_manager),
            automation: Arc::clone(&automation),
            bridge: bridge.clone_handle(),
            scripts_dir: config.worker.scripts_dir.clone(),
            log_view_limit: config.log_sink.memory_entries.max(1),
        };

        let progress = Arc::new(ProgressWatcher::new(
            automation.progress_file(),
            Duration::from_millis(config.worker.progress_poll_ms),
        ));

        // Log view model lives on the GUI thread; updates downcast it back
        ui.set_log_lines(ModelRc::from(Rc::new(VecModel::<LogLine>::default())));

        state_manager.set_target(
            config.focus.target_tab,
            config.focus.taskbar_slot,
            config.focus.title_hint.as_deref().unwrap_or_default(),
        );
        if let Err(e) = ctx.reload_scripts() {
            tracing::warn!("Could not list scripts: {:#}", e);
        }
        Self::sync_ui_with_state(&ui, &state_manager.snapshot());

        let presenter = SlintDialogPresenter::install(&ui);
        let pending = Self::setup_dialog_mediation(&ui, &automation, presenter.clone());
        Self::setup_callbacks(&ui, &ctx);
        Self::setup_state_subscription(&ctx);

        let relay = GuiEventRelay::spawn(
            &tokio_handle,
            automation.supervisor().subscribe(),
            automation.sink().subscribe(),
            progress.subscribe(),
            Self::relay_handler(ctx, Arc::clone(&progress), presenter, pending, tokio_handle.clone()),
        );

        tracing::info!("GUI controller initialized");

        Ok(Self {
            ui,
            _bridge: bridge,
            _relay: relay,
            state_manager,
            progress,
        })
    }

    /// Run the GUI (blocks until window is closed)
    pub fn run(self) -> Result<(), slint::PlatformError> {
        tracing::info!("Starting GUI event loop");
        let result = self.ui.run();
        self.progress.stop();
        tracing::debug!(
            "Event loop ended with worker state {:?}",
            self.state_manager.read(|s| s.worker_state)
        );
        result
    }

    fn sync_ui_with_state(ui: &MainWindow, state: &AppState) {
        ui.set_script_labels(labels_model(&state.available_scripts));
        ui.set_selected_script_index(selected_index(state));
        ui.set_selected_script_path(path_text(state.selected_script.as_deref()));

        ui.set_target_tab(i32::from(state.target_tab));
        ui.set_taskbar_slot(i32::from(state.taskbar_slot));
        ui.set_window_hint(state.window_hint.as_str().into());

        ui.set_is_running(state.is_running());
        ui.set_can_start(state.can_start());
        ui.set_status_message(state.status_message.as_str().into());

        ui.set_progress_visible(state.progress.is_some());
        ui.set_progress_value(progress_value(state.progress));
        ui.set_progress_message(state.progress_message.as_str().into());

        ui.set_log_health(state.log_health_summary().into());
        ui.set_log_target(path_text(state.log_target.as_deref()));

        tracing::debug!("UI synchronized with initial state");
    }

    /// Route bridge requests to the mediator on the GUI thread.
    ///
    /// The mediator owns a presenter bound to the window, so it never leaves
    /// this thread; requests reach it through a queue drained by a callback.
    fn setup_dialog_mediation(
        ui: &MainWindow,
        automation: &AutomationService,
        presenter: SlintDialogPresenter,
    ) -> Arc<Mutex<VecDeque<PendingRequest>>> {
        let mediator = DialogMediator::new(Box::new(presenter), Arc::clone(automation.sink()))
            .with_focus(Arc::clone(automation.focus()))
            .with_metrics(Arc::clone(automation.metrics()));
        let pending: Arc<Mutex<VecDeque<PendingRequest>>> = Arc::default();

        let queue = Arc::clone(&pending);
        ui.on_bridge_request_ready(move || {
            loop {
                let next = queue
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_front();
                match next {
                    Some(request) => mediator.handle(request),
                    None => break,
                }
            }
        });

        pending
    }

    fn setup_callbacks(ui: &MainWindow, ctx: &ControllerContext) {
        let c = ctx.clone();
        ui.on_script_selected(move |index| {
            let script = c.state.read(|s| {
                usize::try_from(index)
                    .ok()
                    .and_then(|i| s.available_scripts.get(i).cloned())
            });
            tracing::debug!("Script selected: {:?}", script);
            c.state.select_script(script);
        });

        let c = ctx.clone();
        ui.on_browse_script(move || {
            tracing::debug!("Browse script clicked");
            if let Some(path) = show_file_picker("Select automation script", &c.scripts_dir) {
                tracing::info!("Script selected from disk: {}", path);
                c.state.update(|s| {
                    if !s.available_scripts.contains(&path) {
                        s.available_scripts.push(path.clone());
                    }
                    s.selected_script = Some(path);
                });
            }
        });

        let c = ctx.clone();
        let ui_weak = ui.as_weak();
        ui.on_refresh_scripts(move || {
            if let Err(e) = c.reload_scripts() {
                tracing::error!("Failed to refresh scripts: {:#}", e);
                show_error_dialog(
                    &ui_weak,
                    "Scripts unavailable",
                    format!("Could not read {}.", c.scripts_dir),
                    format!("{:#}", e),
                );
            }
        });

        let c = ctx.clone();
        let ui_weak = ui.as_weak();
        ui.on_target_changed(move || {
            if let Some(ui) = ui_weak.upgrade() {
                c.state.set_target(
                    normalize_tab(i64::from(ui.get_target_tab())),
                    normalize_slot(i64::from(ui.get_taskbar_slot())),
                    &ui.get_window_hint(),
                );
            }
        });

        let c = ctx.clone();
        let ui_weak = ui.as_weak();
        ui.on_start_automation(move || {
            let Some(request) = c.state.read(run_request) else {
                tracing::warn!("Start ignored: no script selected or a run is active");
                return;
            };
            tracing::info!("Starting automation: {}", request.script);

            if let Some(ui) = ui_weak.upgrade() {
                clear_log_view(&ui);
            }
            c.automation.sink().clear_memory();
            c.state.begin_run(request.script.clone(), None);
            c.start_in_background(request);
        });

        let c = ctx.clone();
        ui.on_stop_automation(move || {
            tracing::info!("Stop button clicked");
            c.state.request_stop();
            c.automation.stop();
        });

        let c = ctx.clone();
        let ui_weak = ui.as_weak();
        ui.on_export_log(move || {
            let default_name = c.state.read(|s| export_file_name(s.log_target.as_deref()));
            let Some(destination) = show_save_picker("Export run log", &default_name) else {
                return;
            };
            match c.automation.sink().export_to(&destination) {
                Ok(()) => {
                    tracing::info!("Run log exported to {}", destination);
                    c.state.set_status(format!("Log exported to {}", destination));
                }
                Err(e) => {
                    tracing::error!("Log export failed: {}", e);
                    show_error_dialog(
                        &ui_weak,
                        "Export failed",
                        format!("Could not write {}.", destination),
                        e.to_string(),
                    );
                }
            }
        });

        let c = ctx.clone();
        let ui_weak = ui.as_weak();
        ui.on_clear_log(move || {
            c.automation.sink().clear_memory();
            if let Some(ui) = ui_weak.upgrade() {
                clear_log_view(&ui);
            }
        });

        let ui_weak = ui.as_weak();
        ui.on_error_dialog_dismissed(move || {
            if let Some(ui) = ui_weak.upgrade() {
                ui.set_show_error_dialog(false);
            }
        });

        let c = ctx.clone();
        let ui_weak = ui.as_weak();
        ui.on_close_confirmation_proceed(move || {
            tracing::info!("User confirmed exit during a run - stopping worker");
            c.state.request_stop();
            c.automation.stop();
            if let Some(ui) = ui_weak.upgrade() {
                ui.set_show_close_confirmation(false);
                ui.window().hide().ok();
            }
        });

        let ui_weak = ui.as_weak();
        ui.on_close_confirmation_cancelled(move || {
            tracing::info!("User cancelled exit - run continues");
            if let Some(ui) = ui_weak.upgrade() {
                ui.set_show_close_confirmation(false);
            }
        });

        let state = Arc::clone(&ctx.state);
        let ui_weak = ui.as_weak();
        ui.window().on_close_requested(move || {
            if state.read(|s| s.is_running()) {
                tracing::info!("Close requested during a run - asking for confirmation");
                if let Some(ui) = ui_weak.upgrade() {
                    ui.set_show_close_confirmation(true);
                }
                slint::CloseRequestResponse::KeepWindowShown
            } else {
                tracing::info!("Close requested - allowing window to close");
                slint::CloseRequestResponse::HideWindow
            }
        });

        tracing::debug!("UI callbacks configured");
    }

    /// Push every StateChange to the window.
    ///
    /// Runs on its own thread like any other subscriber; UI work is marshalled
    /// through the bridge.
    fn setup_state_subscription(ctx: &ControllerContext) {
        let bridge = ctx.bridge.clone();
        let state_manager = Arc::clone(&ctx.state);
        let mut rx = ctx.state.subscribe();

        let spawned = std::thread::Builder::new()
            .name("automdf-state-listener".to_string())
            .spawn(move || {
                tracing::debug!("State subscription thread started");
                loop {
                    match rx.blocking_recv() {
                        Ok(change) => {
                            tracing::trace!("State change received: {:?}", change);
                            apply_state_change(&bridge, &state_manager.snapshot(), change);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            // Resync everything rather than replaying
                            tracing::warn!("State listener lagged by {} changes, resyncing", skipped);
                            let snapshot = state_manager.snapshot();
                            bridge.update_ui(move |ui| Self::sync_ui_with_state(ui, &snapshot));
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                tracing::debug!("State subscription thread terminated gracefully");
            });
        if let Err(e) = spawned {
            tracing::error!("Failed to spawn state listener: {}", e);
        }
    }

    /// Fold relayed service events into state and the log view.
    fn relay_handler(
        ctx: ControllerContext,
        progress: Arc<ProgressWatcher>,
        presenter: SlintDialogPresenter,
        pending: Arc<Mutex<VecDeque<PendingRequest>>>,
        runtime: tokio::runtime::Handle,
    ) -> impl Fn(RelayEvent) + Send + Sync + 'static {
        move |event| match event {
            RelayEvent::Lines(entries) => ctx.append_log_lines(entries),
            RelayEvent::Supervisor(event) => match event {
                SupervisorEvent::Started { path } => {
                    ctx.state.update(|s| {
                        s.worker_state = WorkerState::Running;
                        s.status_message = format!("Running {}", friendly_label(&path));
                    });
                    progress.start(&runtime);
                }
                SupervisorEvent::Line(entry) => ctx.append_log_lines(vec![entry]),
                SupervisorEvent::BridgeRequest(request) => {
                    tracing::debug!("Bridge request queued: {}", request.request.kind.as_str());
                    pending
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push_back(request);
                    // Must not be dropped: the worker is blocked until answered
                    ctx.bridge
                        .update_ui_reliably(|ui| ui.invoke_bridge_request_ready());
                }
                SupervisorEvent::ProtocolWarning(message) => {
                    tracing::debug!("Worker protocol warning: {}", message);
                }
                SupervisorEvent::Finished { exit_code } => {
                    progress.stop();
                    let never_started =
                        ctx.state.read(|s| s.worker_state == WorkerState::Starting);
                    ctx.state.finish_run(exit_code);

                    let presenter = presenter.clone();
                    ctx.bridge.update_ui_reliably(move |_| {
                        if presenter.is_open() {
                            presenter.abandon();
                        }
                    });

                    if never_started && exit_code == -1 {
                        let details = ctx.automation.sink().raw_lines().join("\n");
                        show_error_dialog(
                            ctx.bridge.ui_weak(),
                            "Automation failed to start",
                            "The worker process could not be launched.",
                            details,
                        );
                    }
                }
            },
            RelayEvent::Sink(event) => match event {
                SinkEvent::SessionStarted(path) => {
                    ctx.state.set_log_target(Some(path));
                }
                SinkEvent::LinesDropped { dropped_so_far } => {
                    ctx.state.set_lines_dropped(dropped_so_far);
                }
                SinkEvent::WriteFailed(message) => {
                    tracing::warn!("Run log write failed: {}", message);
                    ctx.state.set_log_write_failed(true);
                }
                SinkEvent::WriteRecovered => {
                    ctx.state.set_log_write_failed(false);
                }
                SinkEvent::SessionAborted => {
                    ctx.state.set_log_target(None);
                }
            },
            RelayEvent::Progress(ProgressEvent::Updated(snapshot)) => {
                ctx.state
                    .set_progress(Some(snapshot.percent()), snapshot.overlay_message());
            }
            RelayEvent::Progress(ProgressEvent::Missing) => {
                // Keep the final value visible once the run is over
                if ctx.state.read(|s| s.is_running()) {
                    ctx.state.set_progress(None, "");
                }
            }
        }
    }
}

impl ControllerContext {
    fn reload_scripts(&self) -> Result<()> {
        let scripts = list_scripts(&self.scripts_dir)?;
        tracing::info!("Found {} scripts in {}", scripts.len(), self.scripts_dir);
        self.state.set_scripts(scripts);
        Ok(())
    }

    /// `AutomationService::start` blocks on focus work, so it runs off the GUI thread.
    fn start_in_background(&self, request: RunRequest) {
        let ctx = self.clone();
        self.bridge.spawn_async(move || async move {
            let automation = Arc::clone(&ctx.automation);
            let result = tokio::task::spawn_blocking(move || automation.start(&request)).await;
            let message = match result {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e.to_string(),
                Err(e) => format!("Start task failed: {}", e),
            };

            tracing::error!("Automation did not start: {}", message);
            ctx.state.update(|s| {
                s.worker_state = WorkerState::Idle;
                s.current_script = None;
                s.status_message = format!("Could not start: {}", message);
            });
            show_error_dialog(
                ctx.bridge.ui_weak(),
                "Could not start automation",
                message,
                "",
            );
        });
    }

    fn append_log_lines(&self, entries: Vec<LogEntry>) {
        let lines: Vec<LogLine> = entries.iter().map(log_line).collect();
        let limit = self.log_view_limit;
        self.bridge.update_ui(move |ui| {
            let model = ui.get_log_lines();
            let Some(model) = model.as_any().downcast_ref::<VecModel<LogLine>>() else {
                return;
            };
            model.extend(lines);
            let overflow = model.row_count().saturating_sub(limit);
            for _ in 0..overflow {
                model.remove(0);
            }
        });
    }
}

fn apply_state_change(
    bridge: &EventLoopBridgeHandle<MainWindow>,
    snapshot: &AppState,
    change: StateChange,
) {
    match change {
        StateChange::ScriptsChanged { count } => {
            tracing::debug!("Script catalogue now has {} entries", count);
            let labels: Vec<SharedString> = snapshot
                .available_scripts
                .iter()
                .map(|p| SharedString::from(friendly_label(p)))
                .collect();
            let index = selected_index(snapshot);
            bridge.update_ui(move |ui| {
                ui.set_script_labels(ModelRc::new(VecModel::from(labels)));
                ui.set_selected_script_index(index);
            });
        }
        StateChange::SelectionChanged { script, can_start } => {
            let index = selected_index(snapshot);
            let path = path_text(script.as_deref());
            bridge.update_ui(move |ui| {
                ui.set_selected_script_index(index);
                ui.set_selected_script_path(path);
                ui.set_can_start(can_start);
            });
        }
        StateChange::TargetChanged => {
            let (tab, slot) = (i32::from(snapshot.target_tab), i32::from(snapshot.taskbar_slot));
            let hint = SharedString::from(snapshot.window_hint.as_str());
            bridge.update_ui(move |ui| {
                ui.set_target_tab(tab);
                ui.set_taskbar_slot(slot);
                if ui.get_window_hint().trim() != hint.as_str() {
                    ui.set_window_hint(hint);
                }
            });
        }
        StateChange::WorkerStateChanged(worker_state) => {
            let can_start = snapshot.can_start();
            bridge.update_ui(move |ui| {
                ui.set_is_running(worker_state.is_active());
                ui.set_can_start(can_start);
            });
        }
        StateChange::RunStarted { script } => {
            tracing::info!("Run started: {}", script);
        }
        StateChange::RunFinished {
            exit_code,
            stopped_by_user,
        } => {
            tracing::info!(
                "Run finished with exit code {} (stopped by user: {})",
                exit_code,
                stopped_by_user
            );
        }
        StateChange::StatusChanged(message) => {
            bridge.update_ui(move |ui| ui.set_status_message(message.into()));
        }
        StateChange::ProgressUpdated { percent, message } => {
            bridge.update_ui(move |ui| {
                ui.set_progress_visible(percent.is_some());
                ui.set_progress_value(progress_value(percent));
                ui.set_progress_message(message.into());
            });
        }
        StateChange::LogHealthChanged { .. } => {
            let summary = SharedString::from(snapshot.log_health_summary());
            bridge.update_ui(move |ui| ui.set_log_health(summary));
        }
        StateChange::LogTargetChanged(target) => {
            let text = path_text(target.as_deref());
            bridge.update_ui(move |ui| ui.set_log_target(text));
        }
    }
}

/// Run request for the current selection, if a run may start.
fn run_request(state: &AppState) -> Option<RunRequest> {
    if !state.can_start() {
        return None;
    }
    let script = state.selected_script.clone()?;
    Some(RunRequest {
        script,
        tab_index: i64::from(state.target_tab),
        window_hint: state.window_hint.clone(),
        taskbar_slot: i64::from(state.taskbar_slot),
    })
}

fn selected_index(state: &AppState) -> i32 {
    state
        .selected_script
        .as_ref()
        .and_then(|selected| state.available_scripts.iter().position(|p| p == selected))
        .and_then(|i| i32::try_from(i).ok())
        .unwrap_or(-1)
}

fn labels_model(scripts: &[Utf8PathBuf]) -> ModelRc<SharedString> {
    let labels: Vec<SharedString> = scripts
        .iter()
        .map(|p| SharedString::from(friendly_label(p)))
        .collect();
    ModelRc::new(VecModel::from(labels))
}

fn path_text(path: Option<&Utf8Path>) -> SharedString {
    path.map(Utf8Path::as_str).unwrap_or_default().into()
}

fn progress_value(percent: Option<u8>) -> f32 {
    f32::from(percent.unwrap_or(0).min(100)) / 100.0
}

/// Level used by the log view for coloring
fn severity(entry: &LogEntry) -> &'static str {
    if entry.is_error() {
        "ERROR"
    } else if entry.is_warning() {
        "WARNING"
    } else {
        "INFO"
    }
}

fn log_line(entry: &LogEntry) -> LogLine {
    LogLine {
        text: entry.display.as_str().into(),
        level: severity(entry).into(),
    }
}

/// Export name derived from the run log, e.g. `20250101-120000-run.log`.
fn export_file_name(log_target: Option<&Utf8Path>) -> String {
    log_target
        .and_then(Utf8Path::file_name)
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_EXPORT_NAME.to_string())
}

fn clear_log_view(ui: &MainWindow) {
    let model = ui.get_log_lines();
    if let Some(model) = model.as_any().downcast_ref::<VecModel<LogLine>>() {
        model.clear();
    }
}

fn show_error_dialog(
    ui_weak: &slint::Weak<MainWindow>,
    title: impl Into<SharedString>,
    message: impl Into<SharedString>,
    details: impl Into<SharedString>,
) {
    let (title, message, details) = (title.into(), message.into(), details.into());
    // Callers may be on any thread
    let result = ui_weak.upgrade_in_event_loop(move |ui| {
        ui.set_error_title(title);
        ui.set_error_message(message);
        ui.set_error_details(details);
        ui.set_show_error_dialog(true);
    });
    if let Err(e) = result {
        tracing::warn!("Could not show error dialog: {:?}", e);
    }
}

/// Native picker for a worker script
fn show_file_picker(title: &str, start_dir: &Utf8Path) -> Option<Utf8PathBuf> {
    let mut dialog = rfd::FileDialog::new()
        .set_title(title)
        .add_filter("Python scripts", &[SCRIPT_EXTENSION]);
    if start_dir.is_dir() {
        dialog = dialog.set_directory(start_dir);
    }
    dialog.pick_file().and_then(to_utf8)
}

fn show_save_picker(title: &str, file_name: &str) -> Option<Utf8PathBuf> {
    rfd::FileDialog::new()
        .set_title(title)
        .set_file_name(file_name)
        .save_file()
        .and_then(to_utf8)
}

fn to_utf8(path: std::path::PathBuf) -> Option<Utf8PathBuf> {
    Utf8PathBuf::try_from(path)
        .map_err(|e| tracing::error!("Failed to convert path to UTF-8: {}", e))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_scripts() -> AppState {
        AppState {
            available_scripts: vec![
                Utf8PathBuf::from("scripts/alpha_run.py"),
                Utf8PathBuf::from("scripts/beta.py"),
            ],
            selected_script: Some(Utf8PathBuf::from("scripts/beta.py")),
            target_tab: 3,
            taskbar_slot: 2,
            window_hint: "Portal".to_string(),
            ..AppState::default()
        }
    }

    #[test]
    fn test_selected_index() {
        let mut state = state_with_scripts();
        assert_eq!(selected_index(&state), 1);

        state.selected_script = Some(Utf8PathBuf::from("elsewhere/other.py"));
        assert_eq!(selected_index(&state), -1);

        state.selected_script = None;
        assert_eq!(selected_index(&state), -1);
    }

    #[test]
    fn test_run_request_from_state() {
        let state = state_with_scripts();
        let request = run_request(&state).unwrap();
        assert_eq!(request.script, Utf8PathBuf::from("scripts/beta.py"));
        assert_eq!(request.tab_index, 3);
        assert_eq!(request.taskbar_slot, 2);
        assert_eq!(request.window_hint, "Portal");
    }

    #[test]
    fn test_no_run_request_while_running() {
        let mut state = state_with_scripts();
        state.worker_state = WorkerState::Running;
        assert!(run_request(&state).is_none());
    }

    #[test]
    fn test_progress_value() {
        assert_eq!(progress_value(None), 0.0);
        assert_eq!(progress_value(Some(50)), 0.5);
        assert_eq!(progress_value(Some(100)), 1.0);
    }

    #[test]
    fn test_severity_of_log_entries() {
        assert_eq!(severity(&LogEntry::parse("[ERROR] broken")), "ERROR");
        assert_eq!(severity(&LogEntry::parse("plain output")), "INFO");
    }

    #[test]
    fn test_export_file_name() {
        assert_eq!(export_file_name(None), DEFAULT_EXPORT_NAME);
        assert_eq!(
            export_file_name(Some(Utf8Path::new("logs/runs/20250101-120000-run.log"))),
            "20250101-120000-run.log"
        );
    }
}
