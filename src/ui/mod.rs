// UI module - Slint control panel
//
// - EventLoopBridge: marshals UI updates from tokio tasks onto the Slint event loop
// - GuiEventRelay: forwards supervisor, log sink and progress events to the GUI
// - SlintDialogPresenter: bridge dialogs drawn as an overlay of the main window
// - GuiController: wires the window to state, services and the relay

// Include the generated Slint code (MainWindow, LogLine)
slint::include_modules!();

pub mod bridge;
pub mod controller;
pub mod dialogs;

pub use bridge::{EventLoopBridge, EventLoopBridgeHandle, GuiEventRelay, RelayEvent};
pub use controller::GuiController;
pub use dialogs::{DialogAction, DialogSession, SlintDialogPresenter};
