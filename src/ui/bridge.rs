// Event loop bridge and event relay
//
// Slint runs a single-threaded event loop; the supervisor, log sink and
// progress watcher publish on tokio broadcast channels. EventLoopBridge queues
// UI updates from any thread onto the Slint loop, and GuiEventRelay turns the
// service broadcasts into an ordered stream of RelayEvents for the controller.

use crate::metrics::Metrics;
use crate::models::LogEntry;
use crate::services::log_sink::SinkEvent;
use crate::services::progress::ProgressEvent;
use crate::services::supervisor::SupervisorEvent;
use slint::{ComponentHandle, Weak};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Capacity of the UI update queue
const UI_UPDATE_CAPACITY: usize = 100;

/// Lines are coalesced into one UI update per tick
pub const LINE_BATCH_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound of a single coalesced batch
const MAX_LINE_BATCH: usize = 500;

type UiUpdate<T> = Box<dyn FnOnce(&T) + Send>;

/// Queues UI updates from tokio tasks and helper threads onto the Slint loop.
///
/// A handler thread drains a bounded channel and hands each update to
/// `upgrade_in_event_loop`. When the channel is full the update is dropped and
/// counted; state-driven updates are idempotent so the next one catches up.
pub struct EventLoopBridge<T: ComponentHandle> {
    handle: EventLoopBridgeHandle<T>,
}

impl<T: ComponentHandle + 'static> EventLoopBridge<T> {
    pub fn new(ui: &T, tokio_handle: Handle, metrics: Option<Arc<Metrics>>) -> Self {
        let ui_weak = ui.as_weak();
        let (ui_update_tx, mut ui_update_rx) = mpsc::channel::<UiUpdate<T>>(UI_UPDATE_CAPACITY);

        let handler_weak = ui_weak.clone();
        std::thread::Builder::new()
            .name("automdf-ui-bridge".to_string())
            .spawn(move || {
                tracing::debug!("EventLoopBridge handler thread started");
                while let Some(update_fn) = ui_update_rx.blocking_recv() {
                    if let Err(e) = handler_weak.upgrade_in_event_loop(move |ui| update_fn(&ui)) {
                        // Event loop gone, nothing left to update
                        tracing::warn!("Failed to queue UI update to event loop: {:?}", e);
                        break;
                    }
                }
                tracing::debug!("EventLoopBridge handler thread terminated");
            })
            .map_err(|e| tracing::error!("Failed to spawn UI bridge thread: {}", e))
            .ok();

        Self {
            handle: EventLoopBridgeHandle {
                ui_weak,
                tokio_handle,
                ui_update_tx,
                metrics,
            },
        }
    }

    pub fn update_ui<F>(&self, update: F)
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.handle.update_ui(update);
    }

    pub fn spawn_async<F, Fut>(&self, future_factory: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn_async(future_factory);
    }

    /// Cloneable handle for Slint callbacks and background threads
    pub fn clone_handle(&self) -> EventLoopBridgeHandle<T> {
        self.handle.clone()
    }
}

pub struct EventLoopBridgeHandle<T: ComponentHandle> {
    ui_weak: Weak<T>,
    tokio_handle: Handle,
    ui_update_tx: mpsc::Sender<UiUpdate<T>>,
    metrics: Option<Arc<Metrics>>,
}

// Manual Clone implementation to avoid requiring T: Clone
impl<T: ComponentHandle> Clone for EventLoopBridgeHandle<T> {
    fn clone(&self) -> Self {
        Self {
            ui_weak: self.ui_weak.clone(),
            tokio_handle: self.tokio_handle.clone(),
            ui_update_tx: self.ui_update_tx.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<T: ComponentHandle + 'static> EventLoopBridgeHandle<T> {
    /// Schedule a UI update from any thread. Dropped when the queue is full.
    pub fn update_ui<F>(&self, update: F)
    where
        F: FnOnce(&T) + Send + 'static,
    {
        match self.ui_update_tx.try_send(Box::new(update)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("UI update channel full - skipping update");
                if let Some(metrics) = &self.metrics {
                    metrics.record_ui_channel_full();
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Failed to send UI update - handler thread has stopped");
            }
        }
    }

    /// Schedule a UI update that must not be dropped.
    ///
    /// Bypasses the bounded queue. Use for events that carry obligations,
    /// such as a bridge request waiting for an answer.
    pub fn update_ui_reliably<F>(&self, update: F)
    where
        F: FnOnce(&T) + Send + 'static,
    {
        if let Err(e) = self.ui_weak.upgrade_in_event_loop(move |ui| update(&ui)) {
            tracing::warn!("Failed to queue UI update to event loop: {:?}", e);
        }
    }

    pub fn spawn_async<F, Fut>(&self, future_factory: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tokio_handle.spawn(async move {
            future_factory().await;
        });
    }

    pub fn tokio_handle(&self) -> &Handle {
        &self.tokio_handle
    }

    pub fn ui_weak(&self) -> &Weak<T> {
        &self.ui_weak
    }
}

/// An event for the GUI, in arrival order.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// Consecutive worker lines, coalesced
    Lines(Vec<LogEntry>),
    /// Any supervisor event other than a line
    Supervisor(SupervisorEvent),
    Sink(SinkEvent),
    Progress(ProgressEvent),
}

/// Forwards service broadcasts to a delivery callback.
///
/// Worker lines are batched per [`LINE_BATCH_INTERVAL`]; pending lines are
/// always delivered before the next non-line supervisor event, so a
/// `Finished` never overtakes the output that preceded it.
pub struct GuiEventRelay {
    task: JoinHandle<()>,
}

impl GuiEventRelay {
    pub fn spawn<F>(
        runtime: &Handle,
        supervisor: broadcast::Receiver<SupervisorEvent>,
        sink: broadcast::Receiver<SinkEvent>,
        progress: broadcast::Receiver<ProgressEvent>,
        deliver: F,
    ) -> Self
    where
        F: Fn(RelayEvent) + Send + Sync + 'static,
    {
        let task = runtime.spawn(relay_loop(supervisor, sink, progress, deliver));
        Self { task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for GuiEventRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn relay_loop<F>(
    mut supervisor: broadcast::Receiver<SupervisorEvent>,
    mut sink: broadcast::Receiver<SinkEvent>,
    mut progress: broadcast::Receiver<ProgressEvent>,
    deliver: F,
) where
    F: Fn(RelayEvent),
{
    let mut lines: Vec<LogEntry> = Vec::new();
    let mut tick = tokio::time::interval(LINE_BATCH_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let (mut supervisor_open, mut sink_open, mut progress_open) = (true, true, true);

    let flush = |lines: &mut Vec<LogEntry>| {
        if !lines.is_empty() {
            deliver(RelayEvent::Lines(std::mem::take(lines)));
        }
    };

    while supervisor_open || sink_open || progress_open {
        tokio::select! {
            // Supervisor first so lines and lifecycle keep their order
            biased;

            event = supervisor.recv(), if supervisor_open => match event {
                Ok(SupervisorEvent::Line(entry)) => {
                    lines.push(entry);
                    if lines.len() >= MAX_LINE_BATCH {
                        flush(&mut lines);
                    }
                }
                Ok(other) => {
                    flush(&mut lines);
                    deliver(RelayEvent::Supervisor(other));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("GUI relay lagged, {} supervisor events skipped", skipped);
                }
                Err(RecvError::Closed) => supervisor_open = false,
            },

            event = sink.recv(), if sink_open => match event {
                Ok(event) => deliver(RelayEvent::Sink(event)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("GUI relay lagged, {} sink events skipped", skipped);
                }
                Err(RecvError::Closed) => sink_open = false,
            },

            event = progress.recv(), if progress_open => match event {
                Ok(event) => deliver(RelayEvent::Progress(event)),
                // Only the newest snapshot matters
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => progress_open = false,
            },

            _ = tick.tick() => flush(&mut lines),
        }
    }

    flush(&mut lines);
    tracing::debug!("GUI relay stopped, all sources closed");
}
