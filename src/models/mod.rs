//! Data models for the AutoMDF control center.
//!
//! - [`AppState`]: what the control panel displays, owned by [`StateManager`](crate::state::StateManager)
//! - [`ControlCenterConfig`]: the layered `automdf.yaml` configuration and its sections
//! - [`LogEntry`]: one parsed line of worker output

pub mod app_state;
pub mod config;
pub mod log_entry;

pub use app_state::AppState;
pub use config::{
    AutomationSettings, ControlCenterConfig, FocusConfig, LogSinkConfig, MAX_TARGET_TAB,
    MAX_TASKBAR_SLOT, PersistFormat, SETTINGS_ENV_VARS, TelemetryConfig, WorkerConfig,
    normalize_slot, normalize_tab,
};
pub use log_entry::LogEntry;
