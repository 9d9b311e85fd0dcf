use crate::services::bridge::BridgeTokens;
use camino::Utf8PathBuf;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variables exported to workers when custom timers are enabled.
pub const SETTINGS_ENV_VARS: [&str; 7] = [
    "MDF_PYAUTOGUI_PAUSE",
    "MDF_PYAUTOGUI_MIN_SLEEP",
    "MDF_SLEEP_THRESHOLD_SHORT",
    "MDF_SLEEP_THRESHOLD_MEDIUM",
    "MDF_SLEEP_SCALE_SHORT",
    "MDF_SLEEP_SCALE_MEDIUM",
    "MDF_SLEEP_SCALE_LONG",
];

/// Highest browser tab reachable with Ctrl+N
pub const MAX_TARGET_TAB: u8 = 9;

/// Highest taskbar slot reachable with Super+N
pub const MAX_TASKBAR_SLOT: u8 = 9;

/// Top-level configuration from `automdf.yaml`
///
/// Every section has defaults, so an empty or partial file is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlCenterConfig {
    pub automation: AutomationSettings,
    pub worker: WorkerConfig,
    pub bridge: BridgeTokens,
    pub log_sink: LogSinkConfig,
    pub focus: FocusConfig,
    pub telemetry: TelemetryConfig,
}

impl ControlCenterConfig {
    /// Clamp values that have hard ranges.
    pub fn normalize(&mut self) {
        self.automation.normalize();
        self.focus.normalize();
        self.log_sink.max_queue_size = self.log_sink.max_queue_size.max(1);
        self.log_sink.flush_batch = self.log_sink.flush_batch.max(1);
    }
}

/// Timing knobs handed to the worker scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationSettings {
    pub pyautogui_pause: f64,
    pub pyautogui_failsafe: bool,
    pub focus_retry_seconds: f64,
    pub focus_retry_attempts: u32,
    pub pyautogui_minimum_sleep: f64,
    pub sleep_threshold_short: f64,
    pub sleep_threshold_medium: f64,
    pub sleep_scale_short: f64,
    pub sleep_scale_medium: f64,
    pub sleep_scale_long: f64,
    pub use_default_timers: bool,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            pyautogui_pause: 0.5,
            pyautogui_failsafe: true,
            focus_retry_seconds: 8.0,
            focus_retry_attempts: 2,
            pyautogui_minimum_sleep: 0.02,
            sleep_threshold_short: 0.35,
            sleep_threshold_medium: 1.2,
            sleep_scale_short: 1.0,
            sleep_scale_medium: 1.0,
            sleep_scale_long: 1.0,
            use_default_timers: true,
        }
    }
}

impl AutomationSettings {
    /// Failsafe is always on and the medium threshold stays above the short one.
    pub fn normalize(&mut self) {
        self.pyautogui_failsafe = true;
        self.sleep_threshold_medium = self
            .sleep_threshold_medium
            .max(self.sleep_threshold_short + 0.01);
    }

    pub fn focus_retry_interval(&self) -> Duration {
        Duration::from_secs_f64(self.focus_retry_seconds.max(0.0))
    }

    /// Worker environment for these settings. Empty while default timers are used.
    pub fn to_environment(&self) -> IndexMap<String, String> {
        let mut env = IndexMap::new();
        if self.use_default_timers {
            return env;
        }

        let short = self.sleep_threshold_short.max(0.0);
        let medium = self.sleep_threshold_medium.max(short + 0.01);
        let values = [
            self.pyautogui_pause.max(0.0),
            self.pyautogui_minimum_sleep.max(0.0),
            short,
            medium,
            self.sleep_scale_short.max(0.0),
            self.sleep_scale_medium.max(0.0),
            self.sleep_scale_long.max(0.0),
        ];

        for (key, value) in SETTINGS_ENV_VARS.iter().zip(values) {
            env.insert(key.to_string(), format!("{:.4}", value));
        }
        env
    }
}

/// How worker processes are launched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Interpreter used to run scripts; empty runs the script path directly
    pub interpreter: String,
    pub interpreter_args: Vec<String>,
    pub scripts_dir: Utf8PathBuf,
    /// Snapshot file the worker writes progress into
    pub progress_file: Utf8PathBuf,
    /// Time between the graceful termination signal and a forced kill
    pub stop_grace_ms: u64,
    /// Delay before the post-start focus retry kicks in
    pub startup_focus_delay_ms: u64,
    /// Progress file polling interval
    pub progress_poll_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interpreter: "python".to_string(),
            interpreter_args: vec!["-u".to_string()],
            scripts_dir: Utf8PathBuf::from("scripts"),
            progress_file: Utf8PathBuf::from("progress.json"),
            stop_grace_ms: 1500,
            startup_focus_delay_ms: 2000,
            progress_poll_ms: 500,
        }
    }
}

impl WorkerConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Shape of lines written to the session file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistFormat {
    /// The line exactly as the worker printed it
    #[default]
    Raw,
    /// `[LEVEL][HH:MM:SS] message`
    Formatted,
}

/// Run log persistence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSinkConfig {
    pub logs_dir: Utf8PathBuf,
    /// Outstanding lines tolerated before new ones are dropped
    pub max_queue_size: usize,
    pub flush_interval_ms: u64,
    pub flush_batch: usize,
    /// Entries kept in memory for the log view and export
    pub memory_entries: usize,
    pub persist_format: PersistFormat,
}

impl Default for LogSinkConfig {
    fn default() -> Self {
        Self {
            logs_dir: Utf8PathBuf::from("logs/runs"),
            max_queue_size: 10_000,
            flush_interval_ms: 2000,
            flush_batch: 200,
            memory_entries: 1200,
            persist_format: PersistFormat::Raw,
        }
    }
}

impl LogSinkConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(10))
    }
}

/// Target window selection and focus recovery tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusConfig {
    /// Title fragments identifying the automated window (case-insensitive)
    pub target_keywords: Vec<String>,
    /// Title fragments identifying the control center's own windows
    pub gui_keywords: Vec<String>,
    pub title_hint: Option<String>,
    /// Tab switched to with Ctrl+N after activation; 0 leaves the tab alone
    pub target_tab: u8,
    /// Taskbar slot launched with Super+N as last resort
    pub taskbar_slot: u8,
    pub launch_cooldown_ms: u64,
    pub max_launch_attempts: u32,
    /// Pause after a taskbar launch before looking for the window again
    pub launch_settle_ms: u64,
    /// Pause after activating a window before verifying it
    pub activation_settle_ms: u64,
    pub tab_settle_ms: u64,
    pub poll_interval_ms: u64,
    pub wait_active_timeout_ms: u64,
    /// How long an availability probe of the desktop tooling stays valid
    pub probe_ttl_secs: u64,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            target_keywords: [
                "Google Chrome",
                "Microsoft Edge",
                "Mozilla Firefox",
                "Brave",
                "Opera",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            gui_keywords: vec!["AutoMDF Control Center".to_string()],
            title_hint: None,
            target_tab: 0,
            taskbar_slot: 1,
            launch_cooldown_ms: 1500,
            max_launch_attempts: 3,
            launch_settle_ms: 600,
            activation_settle_ms: 250,
            tab_settle_ms: 150,
            poll_interval_ms: 120,
            wait_active_timeout_ms: 1600,
            probe_ttl_secs: 60,
        }
    }
}

impl FocusConfig {
    pub fn normalize(&mut self) {
        self.target_tab = normalize_tab(i64::from(self.target_tab));
        self.taskbar_slot = normalize_slot(i64::from(self.taskbar_slot));
        self.title_hint = self
            .title_hint
            .take()
            .map(|hint| hint.trim().to_string())
            .filter(|hint| !hint.is_empty());
    }
}

/// Clamp a tab index to 0..=9, where 0 and negatives mean "leave unchanged".
pub fn normalize_tab(value: i64) -> u8 {
    value.clamp(0, i64::from(MAX_TARGET_TAB)) as u8
}

/// Clamp a taskbar slot to 1..=9.
pub fn normalize_slot(value: i64) -> u8 {
    value.clamp(1, i64::from(MAX_TASKBAR_SLOT)) as u8
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub path: Utf8PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: Utf8PathBuf::from("logs/telemetry.jsonl"),
        }
    }
}
