use crate::services::supervisor::WorkerState;
use camino::Utf8PathBuf;

/// Everything the control panel displays.
///
/// `AppState` is wrapped in `Arc<RwLock<AppState>>` by [`crate::state::StateManager`];
/// mutate it only through [`StateManager::update`](crate::state::StateManager::update)
/// so subscribers see a [`StateChange`](crate::state::StateChange) for every edit.
#[derive(Clone, Debug, PartialEq)]
pub struct AppState {
    // Script selection
    pub available_scripts: Vec<Utf8PathBuf>,
    pub selected_script: Option<Utf8PathBuf>,

    // Target window
    pub target_tab: u8,
    pub taskbar_slot: u8,
    pub window_hint: String,

    // Runtime state
    pub worker_state: WorkerState,
    pub current_script: Option<Utf8PathBuf>,
    pub status_message: String,
    pub stop_requested: bool,
    pub last_exit_code: Option<i32>,

    // Progress: None while the worker has not written a snapshot yet
    pub progress: Option<u8>,
    pub progress_message: String,

    // Run log health
    pub log_target: Option<Utf8PathBuf>,
    pub log_write_failed: bool,
    pub lines_dropped: u64,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            available_scripts: Vec::new(),
            selected_script: None,

            target_tab: 0,
            taskbar_slot: 1,
            window_hint: String::new(),

            worker_state: WorkerState::Idle,
            current_script: None,
            status_message: "Ready".to_string(),
            stop_requested: false,
            last_exit_code: None,

            progress: None,
            progress_message: String::new(),

            log_target: None,
            log_write_failed: false,
            lines_dropped: 0,
        }
    }
}

impl AppState {
    pub fn is_running(&self) -> bool {
        self.worker_state.is_active()
    }

    /// Whether the Run button should be enabled.
    pub fn can_start(&self) -> bool {
        !self.is_running() && self.selected_script.is_some()
    }

    /// Status line for a finished run.
    pub fn finish_message(&self) -> String {
        match self.last_exit_code {
            None => "Ready".to_string(),
            Some(_) if self.stop_requested => "Automation stopped".to_string(),
            Some(0) => "Automation finished".to_string(),
            Some(-1) => "Automation failed to start".to_string(),
            Some(code) => format!("Automation failed (exit code {})", code),
        }
    }

    /// Short description of the run log's state for the status bar.
    pub fn log_health_summary(&self) -> String {
        let mut parts = Vec::new();
        if self.log_write_failed {
            parts.push("log writes failing".to_string());
        }
        if self.lines_dropped > 0 {
            parts.push(format!("{} lines dropped", self.lines_dropped));
        }
        parts.join(", ")
    }

    /// Clear per-run fields before a new run.
    pub fn reset_run_state(&mut self) {
        self.current_script = None;
        self.stop_requested = false;
        self.last_exit_code = None;
        self.progress = None;
        self.progress_message.clear();
        self.log_target = None;
        self.log_write_failed = false;
        self.lines_dropped = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        let state = AppState::default();
        assert!(!state.is_running());
        assert!(!state.can_start());
        assert_eq!(state.finish_message(), "Ready");
        assert!(state.log_health_summary().is_empty());
    }

    #[test]
    fn test_can_start_requires_selection_and_idle_worker() {
        let mut state = AppState {
            selected_script: Some(Utf8PathBuf::from("scripts/run.py")),
            ..AppState::default()
        };
        assert!(state.can_start());

        state.worker_state = WorkerState::Running;
        assert!(!state.can_start());

        state.worker_state = WorkerState::Terminated(0);
        assert!(state.can_start());
    }

    #[test]
    fn test_finish_messages() {
        let mut state = AppState::default();
        state.last_exit_code = Some(0);
        assert_eq!(state.finish_message(), "Automation finished");
        state.last_exit_code = Some(-1);
        assert_eq!(state.finish_message(), "Automation failed to start");
        state.last_exit_code = Some(3);
        assert_eq!(state.finish_message(), "Automation failed (exit code 3)");
        state.stop_requested = true;
        assert_eq!(state.finish_message(), "Automation stopped");
    }

    #[test]
    fn test_reset_run_state_keeps_selection() {
        let mut state = AppState {
            selected_script: Some(Utf8PathBuf::from("a.py")),
            lines_dropped: 4,
            log_write_failed: true,
            last_exit_code: Some(1),
            progress: Some(50),
            ..AppState::default()
        };
        state.reset_run_state();
        assert_eq!(state.selected_script, Some(Utf8PathBuf::from("a.py")));
        assert_eq!(state.lines_dropped, 0);
        assert!(!state.log_write_failed);
        assert_eq!(state.last_exit_code, None);
        assert_eq!(state.progress, None);
    }
}
