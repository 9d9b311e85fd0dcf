// AutoMDF - supervised browser automation with an operator dialog bridge
//
// Library crate with the supervisor, bridge protocol, dialog mediation, run
// logging and window focus logic. main.rs provides the Slint control panel and
// src/bin/mdf-demo-worker.rs a scripted worker for demos and tests.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;
pub mod ui;

pub use config::ConfigManager;
pub use metrics::Metrics;
pub use models::{AppState, ControlCenterConfig, LogEntry};
pub use state::{StateChange, StateManager};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Window title, also matched by the focus controller to skip our own windows
pub const WINDOW_TITLE: &str = "AutoMDF Control Center";
