// Bridge dialogs drawn as an overlay of the main window
//
// DialogSession holds the rules of one open dialog (validation, cancel
// confirmation) without touching Slint, so they can be tested headless.
// SlintDialogPresenter maps sessions onto the MainWindow overlay properties.

use super::MainWindow;
use crate::services::dialog::{
    DialogCompletion, DialogOutcome, DialogPresenter, DialogSpec, PromptPolicy,
};
use slint::{ComponentHandle, ModelRc, SharedString, VecModel};
use std::sync::{Arc, Mutex, PoisonError};

/// What the overlay should do after an operator action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogAction {
    /// Close the dialog with this outcome
    Complete(DialogOutcome),
    /// Keep the dialog open and show a validation message
    ShowError(String),
    /// Hide any validation message
    ClearError,
    /// Ask this yes/no question before cancelling
    AskCancelConfirmation(String),
    /// Return from the cancel question to the dialog
    ResumeEditing,
    /// Nothing to do
    Stay,
}

/// State of one open dialog.
#[derive(Debug, Clone)]
pub struct DialogSession {
    spec: DialogSpec,
    confirming_cancel: bool,
}

impl DialogSession {
    pub fn new(spec: DialogSpec) -> Self {
        Self {
            spec,
            confirming_cancel: false,
        }
    }

    pub fn spec(&self) -> &DialogSpec {
        &self.spec
    }

    pub fn is_confirming_cancel(&self) -> bool {
        self.confirming_cancel
    }

    fn policy(&self) -> Option<&PromptPolicy> {
        match &self.spec {
            DialogSpec::Prompt { policy, .. } => Some(policy),
            _ => None,
        }
    }

    /// OK pressed or Enter in the input.
    pub fn submit(&mut self, input: &str) -> DialogAction {
        if self.confirming_cancel {
            return DialogAction::Stay;
        }
        match &self.spec {
            DialogSpec::Alert { .. } => DialogAction::Complete(DialogOutcome::Acknowledged),
            DialogSpec::Prompt { policy, .. } => match policy.validate(input) {
                Some(message) => DialogAction::ShowError(message.to_string()),
                None => DialogAction::Complete(DialogOutcome::Submitted(input.to_string())),
            },
            DialogSpec::Confirm { .. } => DialogAction::Stay,
        }
    }

    pub fn click(&mut self, label: &str) -> DialogAction {
        match &self.spec {
            DialogSpec::Confirm { .. } => {
                DialogAction::Complete(DialogOutcome::Clicked(label.to_string()))
            }
            DialogSpec::Alert { .. } => DialogAction::Complete(DialogOutcome::Acknowledged),
            DialogSpec::Prompt { .. } => DialogAction::Stay,
        }
    }

    /// Input edited; clears a stale validation message.
    pub fn edit(&mut self, input: &str) -> DialogAction {
        match self.policy() {
            Some(policy) if policy.validate(input).is_none() => DialogAction::ClearError,
            _ => DialogAction::Stay,
        }
    }

    /// Cancel button, Escape or the overlay closing.
    pub fn dismiss(&mut self) -> DialogAction {
        match &self.spec {
            DialogSpec::Alert { .. } => DialogAction::Complete(DialogOutcome::Acknowledged),
            DialogSpec::Confirm { .. } => DialogAction::Complete(DialogOutcome::Dismissed),
            DialogSpec::Prompt { policy, .. } => {
                if !policy.allow_cancel || self.confirming_cancel {
                    DialogAction::Stay
                } else if let Some(message) = policy
                    .cancel_message
                    .as_ref()
                    .filter(|_| policy.needs_cancel_confirmation())
                {
                    self.confirming_cancel = true;
                    DialogAction::AskCancelConfirmation(message.clone())
                } else {
                    DialogAction::Complete(DialogOutcome::Dismissed)
                }
            }
        }
    }

    /// Answer to the cancel question.
    pub fn confirm_cancel(&mut self, confirmed: bool) -> DialogAction {
        if !self.confirming_cancel {
            return DialogAction::Stay;
        }
        self.confirming_cancel = false;
        if confirmed {
            DialogAction::Complete(DialogOutcome::Dismissed)
        } else {
            DialogAction::ResumeEditing
        }
    }
}

struct ActiveDialog {
    session: DialogSession,
    done: DialogCompletion,
}

/// [`DialogPresenter`] on top of the MainWindow overlay.
///
/// Cheap to clone; clones share the open dialog. Every method that touches
/// the window must run on the Slint event loop.
#[derive(Clone)]
pub struct SlintDialogPresenter {
    ui: slint::Weak<MainWindow>,
    active: Arc<Mutex<Option<ActiveDialog>>>,
}

impl SlintDialogPresenter {
    /// Create the presenter and register the overlay callbacks on `ui`.
    pub fn install(ui: &MainWindow) -> Self {
        let presenter = Self {
            ui: ui.as_weak(),
            active: Arc::new(Mutex::new(None)),
        };

        let p = presenter.clone();
        ui.on_dialog_submit(move |input| p.act(|session| session.submit(&input)));

        let p = presenter.clone();
        ui.on_dialog_button_clicked(move |label| p.act(|session| session.click(&label)));

        let p = presenter.clone();
        ui.on_dialog_input_edited(move |input| p.act(|session| session.edit(&input)));

        let p = presenter.clone();
        ui.on_dialog_dismissed(move || p.act(DialogSession::dismiss));

        let p = presenter.clone();
        ui.on_cancel_confirm_accepted(move || p.act(|session| session.confirm_cancel(true)));

        let p = presenter.clone();
        ui.on_cancel_confirm_rejected(move || p.act(|session| session.confirm_cancel(false)));

        presenter
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Close whatever is open as dismissed, e.g. when the worker has exited.
    pub fn abandon(&self) {
        let active = self.lock().take();
        if let Some(active) = active {
            tracing::debug!("Closing dialog left open by a finished run");
            self.hide();
            (active.done)(DialogOutcome::Dismissed);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ActiveDialog>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn act<F>(&self, f: F)
    where
        F: FnOnce(&mut DialogSession) -> DialogAction,
    {
        let action = match self.lock().as_mut() {
            Some(active) => f(&mut active.session),
            None => return,
        };
        self.apply(action);
    }

    fn apply(&self, action: DialogAction) {
        let Some(ui) = self.ui.upgrade() else {
            return;
        };
        match action {
            DialogAction::Complete(outcome) => {
                // Take before calling back so a new dialog can open from it
                let active = self.lock().take();
                self.hide();
                if let Some(active) = active {
                    (active.done)(outcome);
                }
            }
            DialogAction::ShowError(message) => ui.set_dialog_error(message.into()),
            DialogAction::ClearError => ui.set_dialog_error(SharedString::new()),
            DialogAction::AskCancelConfirmation(message) => {
                ui.set_cancel_confirm_message(message.into());
                ui.set_show_cancel_confirm(true);
            }
            DialogAction::ResumeEditing => ui.set_show_cancel_confirm(false),
            DialogAction::Stay => {}
        }
    }

    fn hide(&self) {
        if let Some(ui) = self.ui.upgrade() {
            ui.set_show_bridge_dialog(false);
            ui.set_show_cancel_confirm(false);
            ui.set_dialog_error(SharedString::new());
        }
    }

    fn show(&self, ui: &MainWindow, spec: &DialogSpec) {
        let (kind, title, text, input, buttons, allow_cancel) = match spec {
            DialogSpec::Alert {
                title,
                text,
                button,
            } => ("alert", title, text, "", vec![button.clone()], true),
            DialogSpec::Prompt {
                title,
                text,
                default_value,
                policy,
            } => (
                "prompt",
                title,
                text,
                default_value.as_str(),
                Vec::new(),
                policy.allow_cancel,
            ),
            DialogSpec::Confirm {
                title,
                text,
                buttons,
            } => ("confirm", title, text, "", buttons.clone(), true),
        };

        let buttons: Vec<SharedString> = buttons.into_iter().map(SharedString::from).collect();
        ui.set_dialog_kind(kind.into());
        ui.set_dialog_title(title.as_str().into());
        ui.set_dialog_text(text.as_str().into());
        ui.set_dialog_input(input.into());
        ui.set_dialog_buttons(ModelRc::new(VecModel::from(buttons)));
        ui.set_dialog_allow_cancel(allow_cancel);
        ui.set_dialog_error(SharedString::new());
        ui.set_show_cancel_confirm(false);
        ui.set_show_bridge_dialog(true);
    }
}

impl DialogPresenter for SlintDialogPresenter {
    fn present(&self, dialog: DialogSpec, done: DialogCompletion) {
        // One request at a time; anything still open is stale
        self.abandon();

        let Some(ui) = self.ui.upgrade() else {
            tracing::warn!("Main window gone, dismissing dialog");
            done(DialogOutcome::Dismissed);
            return;
        };

        self.show(&ui, &dialog);
        *self.lock() = Some(ActiveDialog {
            session: DialogSession::new(dialog),
            done,
        });
    }
}
