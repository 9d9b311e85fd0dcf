// State management module
//
// StateManager wraps the control panel's AppState behind Arc<RwLock<T>> and
// broadcasts a StateChange for every field group an update touches.

use crate::models::AppState;
use crate::services::supervisor::WorkerState;
use camino::Utf8PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

/// Change events emitted when state is modified
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// The script catalogue was refreshed
    ScriptsChanged { count: usize },

    /// Selected script changed, or whether a run can start
    SelectionChanged {
        script: Option<Utf8PathBuf>,
        can_start: bool,
    },

    /// Tab, taskbar slot or window hint changed
    TargetChanged,

    WorkerStateChanged(WorkerState),

    /// A worker run started
    RunStarted { script: Utf8PathBuf },

    /// The worker exited
    RunFinished {
        exit_code: i32,
        stopped_by_user: bool,
    },

    StatusChanged(String),

    ProgressUpdated {
        percent: Option<u8>,
        message: String,
    },

    LogHealthChanged {
        write_failed: bool,
        lines_dropped: u64,
    },

    /// A new run log file was opened
    LogTargetChanged(Option<Utf8PathBuf>),
}

/// Thread-safe state manager with event emission
///
/// - [`read()`](Self::read) / [`snapshot()`](Self::snapshot) for reading
/// - [`update()`](Self::update) for mutations; returns the emitted changes
/// - [`subscribe()`](Self::subscribe) for listening
pub struct StateManager {
    state: Arc<RwLock<AppState>>,
    state_tx: broadcast::Sender<StateChange>,
}

impl StateManager {
    /// Create a new StateManager with a broadcast buffer of 100 events
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(AppState::default())),
            state_tx,
        }
    }

    pub fn snapshot(&self) -> AppState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Execute a function with read access to the state
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&AppState) -> R,
    {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Apply `update_fn`, then emit one event per changed field group.
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut AppState),
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let old_state = state.clone();

        update_fn(&mut state);

        let changes = detect_changes(&old_state, &state);
        for change in &changes {
            // No listeners is fine
            let _ = self.state_tx.send(change.clone());
        }
        changes
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    // Convenience methods for common state updates

    /// Replace the catalogue, keeping the selection when it is still listed.
    pub fn set_scripts(&self, scripts: Vec<Utf8PathBuf>) -> Vec<StateChange> {
        self.update(|state| {
            let keep = state
                .selected_script
                .as_ref()
                .is_some_and(|s| scripts.contains(s));
            if !keep {
                state.selected_script = scripts.first().cloned();
            }
            state.available_scripts = scripts;
        })
    }

    pub fn select_script(&self, script: Option<Utf8PathBuf>) -> Vec<StateChange> {
        self.update(|state| state.selected_script = script)
    }

    pub fn set_target(&self, tab: u8, slot: u8, hint: &str) -> Vec<StateChange> {
        self.update(|state| {
            state.target_tab = tab;
            state.taskbar_slot = slot;
            state.window_hint = hint.trim().to_string();
        })
    }

    /// Record that `script` is being launched.
    pub fn begin_run(&self, script: Utf8PathBuf, log_target: Option<Utf8PathBuf>) -> Vec<StateChange> {
        self.update(|state| {
            state.reset_run_state();
            state.status_message = format!("Starting {}...", friendly_name(&script));
            state.current_script = Some(script);
            state.worker_state = WorkerState::Starting;
            state.log_target = log_target;
        })
    }

    pub fn set_worker_state(&self, worker_state: WorkerState) -> Vec<StateChange> {
        self.update(|state| state.worker_state = worker_state)
    }

    /// The operator asked the run to stop
    pub fn request_stop(&self) -> Vec<StateChange> {
        self.update(|state| {
            if state.is_running() {
                state.stop_requested = true;
                state.status_message = "Stopping automation...".to_string();
            }
        })
    }

    pub fn finish_run(&self, exit_code: i32) -> Vec<StateChange> {
        self.update(|state| {
            state.worker_state = WorkerState::Terminated(exit_code);
            state.last_exit_code = Some(exit_code);
            state.status_message = state.finish_message();
            if exit_code == 0 && !state.stop_requested {
                state.progress = Some(100);
            }
        })
    }

    pub fn set_status(&self, message: impl Into<String>) -> Vec<StateChange> {
        let message = message.into();
        self.update(|state| state.status_message = message)
    }

    pub fn set_progress(&self, percent: Option<u8>, message: impl Into<String>) -> Vec<StateChange> {
        let message = message.into();
        self.update(|state| {
            state.progress = percent.map(|p| p.min(100));
            state.progress_message = message;
        })
    }

    pub fn set_log_write_failed(&self, failed: bool) -> Vec<StateChange> {
        self.update(|state| state.log_write_failed = failed)
    }

    pub fn set_lines_dropped(&self, total: u64) -> Vec<StateChange> {
        self.update(|state| state.lines_dropped = state.lines_dropped.max(total))
    }

    pub fn set_log_target(&self, target: Option<Utf8PathBuf>) -> Vec<StateChange> {
        self.update(|state| state.log_target = target)
    }

    pub fn state_arc(&self) -> Arc<RwLock<AppState>> {
        Arc::clone(&self.state)
    }
}

fn friendly_name(script: &Utf8PathBuf) -> String {
    crate::services::scripts::friendly_label(script)
}

/// Events describing what differs between `old` and `new`.
fn detect_changes(old: &AppState, new: &AppState) -> Vec<StateChange> {
    let mut changes = Vec::new();

    if old.available_scripts != new.available_scripts {
        changes.push(StateChange::ScriptsChanged {
            count: new.available_scripts.len(),
        });
    }

    if old.selected_script != new.selected_script || old.can_start() != new.can_start() {
        changes.push(StateChange::SelectionChanged {
            script: new.selected_script.clone(),
            can_start: new.can_start(),
        });
    }

    if old.target_tab != new.target_tab
        || old.taskbar_slot != new.taskbar_slot
        || old.window_hint != new.window_hint
    {
        changes.push(StateChange::TargetChanged);
    }

    if old.worker_state != new.worker_state {
        changes.push(StateChange::WorkerStateChanged(new.worker_state));
    }

    if old.current_script != new.current_script
        && let Some(script) = &new.current_script
    {
        changes.push(StateChange::RunStarted {
            script: script.clone(),
        });
    }

    if old.last_exit_code != new.last_exit_code
        && let Some(exit_code) = new.last_exit_code
    {
        changes.push(StateChange::RunFinished {
            exit_code,
            stopped_by_user: new.stop_requested,
        });
    }

    if old.status_message != new.status_message {
        changes.push(StateChange::StatusChanged(new.status_message.clone()));
    }

    if old.progress != new.progress || old.progress_message != new.progress_message {
        changes.push(StateChange::ProgressUpdated {
            percent: new.progress,
            message: new.progress_message.clone(),
        });
    }

    if old.log_write_failed != new.log_write_failed || old.lines_dropped != new.lines_dropped {
        changes.push(StateChange::LogHealthChanged {
            write_failed: new.log_write_failed,
            lines_dropped: new.lines_dropped,
        });
    }

    if old.log_target != new.log_target {
        changes.push(StateChange::LogTargetChanged(new.log_target.clone()));
    }

    changes
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

// Clones share the same state and channel
impl Clone for StateManager {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: self.state_tx.clone(),
        }
    }
}
