//! Turns worker dialog requests into operator dialogs and answers them.
//!
//! The mediator is driven from the GUI thread: [`DialogMediator::handle`] is
//! called with each [`PendingRequest`] the supervisor publishes, shows the
//! matching dialog through a [`DialogPresenter`], and resolves the request's
//! responder once with the operator's answer.
//!
//! While a dialog is open the log sink is paused so its disk writes do not
//! compete with the dialog for focus. After the answer is delivered the target
//! window is brought back on a helper thread; that never delays the answer.

use crate::metrics::Metrics;
use crate::services::bridge::{BridgeRequest, BridgeResponse, RequestKind, normalize_buttons};
use crate::services::focus::FocusController;
use crate::services::log_sink::AsyncLogSink;
use crate::services::supervisor::PendingRequest;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

pub const DEFAULT_ALERT_TITLE: &str = "Information";
pub const DEFAULT_PROMPT_TITLE: &str = "Input";
pub const DEFAULT_PROMPT_TEXT: &str = "Enter a value:";
pub const DEFAULT_CONFIRM_TITLE: &str = "Confirmation";
pub const DEFAULT_CONFIRM_TEXT: &str = "Confirm?";
pub const DEFAULT_ALERT_BUTTON: &str = "OK";

/// Shown under the input while a required prompt is empty
pub const REQUIRED_INPUT_MESSAGE: &str = "Enter a value before continuing.";

const FOCUS_RESTORE_ATTEMPTS: u32 = 9;
const FOCUS_RESTORE_DELAY: Duration = Duration::from_millis(200);
const FOCUS_RESTORE_SETTLE: Duration = Duration::from_millis(50);

/// How a prompt may be accepted or dismissed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPolicy {
    /// Accepting is blocked while the trimmed input is empty
    pub require_input: bool,
    /// When false the dialog offers no way to cancel
    pub allow_cancel: bool,
    /// Asked (yes/no) before a cancel goes through
    pub cancel_message: Option<String>,
}

impl PromptPolicy {
    pub fn from_request(request: &BridgeRequest) -> Self {
        Self {
            require_input: request.require_input,
            allow_cancel: request.allow_cancel,
            cancel_message: request
                .cancel_message
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string),
        }
    }

    /// Inline validation message for `input`, if it cannot be accepted yet.
    pub fn validate(&self, input: &str) -> Option<&'static str> {
        (self.require_input && input.trim().is_empty()).then_some(REQUIRED_INPUT_MESSAGE)
    }

    /// Whether a cancel must first be confirmed with `cancel_message`.
    pub fn needs_cancel_confirmation(&self) -> bool {
        self.allow_cancel && self.cancel_message.is_some()
    }
}

/// A dialog ready to show, with defaults filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogSpec {
    Alert {
        title: String,
        text: String,
        button: String,
    },
    Prompt {
        title: String,
        text: String,
        default_value: String,
        policy: PromptPolicy,
    },
    Confirm {
        title: String,
        text: String,
        buttons: Vec<String>,
    },
}

impl DialogSpec {
    /// The dialog for `request`, or None when its kind has no dialog.
    pub fn from_request(request: &BridgeRequest) -> Option<Self> {
        let or = |value: &str, fallback: &str| {
            if value.trim().is_empty() {
                fallback.to_string()
            } else {
                value.to_string()
            }
        };

        match &request.kind {
            RequestKind::Alert => Some(Self::Alert {
                title: or(&request.title, DEFAULT_ALERT_TITLE),
                text: request.text.clone(),
                button: or(
                    request.button.as_deref().unwrap_or_default(),
                    DEFAULT_ALERT_BUTTON,
                ),
            }),
            RequestKind::Prompt => Some(Self::Prompt {
                title: or(&request.title, DEFAULT_PROMPT_TITLE),
                text: or(&request.text, DEFAULT_PROMPT_TEXT),
                default_value: request.default_value.clone(),
                policy: PromptPolicy::from_request(request),
            }),
            RequestKind::Confirm => Some(Self::Confirm {
                title: or(&request.title, DEFAULT_CONFIRM_TITLE),
                text: or(&request.text, DEFAULT_CONFIRM_TEXT),
                buttons: normalize_buttons(request.buttons.iter()),
            }),
            RequestKind::Other(_) => None,
        }
    }
}

/// What the operator did with a dialog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogOutcome {
    /// Alert closed
    Acknowledged,
    /// Prompt accepted with this text
    Submitted(String),
    /// Confirm button clicked
    Clicked(String),
    /// Closed without an answer
    Dismissed,
}

/// Called exactly once with the outcome of a shown dialog.
pub type DialogCompletion = Box<dyn FnOnce(DialogOutcome) + Send>;

/// Shows dialogs. Implementations run on the GUI thread and may complete
/// either synchronously or later from an event handler.
pub trait DialogPresenter {
    fn present(&self, dialog: DialogSpec, done: DialogCompletion);
}

/// The wire answer for `outcome`.
pub fn resolve_outcome(request: &BridgeRequest, outcome: DialogOutcome) -> BridgeResponse {
    match (&request.kind, outcome) {
        (RequestKind::Prompt, DialogOutcome::Submitted(text)) => BridgeResponse::Value(text),
        (RequestKind::Prompt, _) => BridgeResponse::Cancel,
        (RequestKind::Confirm, DialogOutcome::Clicked(label)) => {
            let buttons = normalize_buttons(request.buttons.iter());
            if buttons.contains(&label) {
                BridgeResponse::Value(label)
            } else {
                BridgeResponse::Value(request.confirm_fallback())
            }
        }
        (RequestKind::Confirm, _) => BridgeResponse::Value(request.confirm_fallback()),
        (RequestKind::Alert, _) | (RequestKind::Other(_), _) => BridgeResponse::Ack,
    }
}

pub struct DialogMediator {
    presenter: Box<dyn DialogPresenter>,
    sink: Arc<AsyncLogSink>,
    focus: Option<Arc<Mutex<FocusController>>>,
    metrics: Option<Arc<Metrics>>,
}

impl DialogMediator {
    pub fn new(presenter: Box<dyn DialogPresenter>, sink: Arc<AsyncLogSink>) -> Self {
        Self {
            presenter,
            sink,
            focus: None,
            metrics: None,
        }
    }

    /// Restore focus to the target window after each dialog
    pub fn with_focus(mut self, focus: Arc<Mutex<FocusController>>) -> Self {
        self.focus = Some(focus);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Show the dialog for `pending` and answer it when the operator is done.
    /// Must be called on the GUI thread.
    pub fn handle(&self, pending: PendingRequest) {
        let PendingRequest { request, responder } = pending;

        if let Some(metrics) = &self.metrics {
            metrics.record_bridge_request();
        }
        if responder.is_resolved() {
            // Stopped before the event reached us
            tracing::debug!("Skipping {} dialog, already answered", request.kind.as_str());
            return;
        }

        let Some(dialog) = DialogSpec::from_request(&request) else {
            tracing::warn!(
                "Unknown bridge request type '{}', acknowledging",
                request.kind.as_str()
            );
            responder.resolve(BridgeResponse::Ack);
            return;
        };

        tracing::debug!("Showing {} dialog: {}", request.kind.as_str(), request.text);
        let paused = self.sink.pause_guard();

        let focus = self.focus.clone();
        let metrics = self.metrics.clone();
        let done: DialogCompletion = Box::new(move |outcome| {
            let response = resolve_outcome(&request, outcome);
            if response == BridgeResponse::Cancel
                && let Some(metrics) = &metrics
            {
                metrics.record_dialog_cancelled();
            }
            if !responder.resolve(response) {
                tracing::debug!("Dialog answer arrived after the request was cancelled");
            }
            drop(paused);
            if let Some(focus) = focus {
                spawn_focus_restore(focus);
            }
        });

        self.presenter.present(dialog, done);
    }
}

/// Bring the target window back in front, retrying a few times.
fn spawn_focus_restore(focus: Arc<Mutex<FocusController>>) {
    let spawned = thread::Builder::new()
        .name("automdf-focus-restore".to_string())
        .spawn(move || {
            let mut focus = focus.lock().unwrap_or_else(PoisonError::into_inner);
            focus.prepare_taskbar_retry();
            thread::sleep(FOCUS_RESTORE_SETTLE);
            for attempt in 1..=FOCUS_RESTORE_ATTEMPTS {
                if focus.ensure_focus(true, false) {
                    let timeout = Duration::from_millis(focus.config().wait_active_timeout_ms);
                    focus.wait_until_active(timeout);
                    tracing::debug!("Focus restored after dialog (attempt {})", attempt);
                    return;
                }
                thread::sleep(FOCUS_RESTORE_DELAY);
            }
            tracing::debug!("Could not restore focus after dialog");
        });
    if let Err(e) = spawned {
        tracing::warn!("Focus restore thread failed to start: {}", e);
    }
}
