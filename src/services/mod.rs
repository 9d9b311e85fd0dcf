//! Services module - the automation bridge between the control center and its workers.
//!
//! Nothing here depends on the UI layer. The GUI feeds requests in and renders
//! the events that come out, so every service can be driven from tests with a
//! real child process and fake desktop backends.
//!
//! # Components
//!
//! - [`ProcessSupervisor`]: owns the worker process, classifies its output, and
//!   carries the single outstanding bridge request
//! - [`bridge`]: the line-oriented request/response codec shared with workers,
//!   plus [`BridgeClient`], the worker-side half
//! - [`DialogMediator`]: shows dialogs for bridge requests and answers them
//! - [`AsyncLogSink`]: persists run logs off the caller's thread
//! - [`FocusController`]: keeps the automated browser window in front, on top
//!   of the [`windowing`] capability traits
//! - [`AutomationService`]: composes the above into start/stop of a run
//! - [`progress`], [`telemetry`], [`scripts`]: the small collaborators around a run
//!
//! # Threads
//!
//! The supervisor's readers run as tasks on a tokio runtime. The log sink owns
//! one consumer thread. Focus work happens on short-lived helper threads
//! because the platform calls block.

pub mod automation;
pub mod bridge;
pub mod bridge_client;
pub mod dialog;
pub mod focus;
pub mod log_sink;
pub mod progress;
pub mod scripts;
pub mod supervisor;
pub mod telemetry;
pub mod windowing;

pub use automation::{AutomationError, AutomationService, RunRequest};
pub use bridge::{BridgeError, BridgeRequest, BridgeResponse, BridgeTokens, RequestKind};
pub use bridge_client::BridgeClient;
pub use dialog::{
    DialogCompletion, DialogMediator, DialogOutcome, DialogPresenter, DialogSpec, PromptPolicy,
};
pub use focus::{FocusController, FocusTarget};
pub use log_sink::{AsyncLogSink, SinkEvent};
pub use progress::{ProgressEvent, ProgressSnapshot, ProgressStatus, ProgressWatcher};
pub use scripts::{friendly_label, list_scripts};
pub use supervisor::{
    PendingRequest, ProcessSupervisor, Responder, SupervisorConfig, SupervisorEvent, WorkerState,
};
pub use telemetry::{TelemetryEntry, TelemetryRecorder};
pub use windowing::{
    CapabilityCache, DesktopControl, Hotkey, WindowEnumerator, WindowId, WindowInfo,
};
