//! Worker process lifecycle.
//!
//! [`ProcessSupervisor`] owns at most one worker at a time. It launches the
//! worker with the bridge tokens in its environment, reads the worker's stdout
//! and stderr on the tokio runtime, and classifies each line:
//!
//! - lines carrying the bridge prefix are decoded into a [`BridgeRequest`] and
//!   published as [`SupervisorEvent::BridgeRequest`]; the worker then waits on
//!   its stdin until the attached [`Responder`] is resolved or the run stops
//! - malformed bridge payloads produce a protocol warning and an immediate ACK
//! - everything else goes to the [`AsyncLogSink`] and out as
//!   [`SupervisorEvent::Line`]
//!
//! # State machine
//!
//! ```text
//! Idle -> Starting -> Running -> Stopping -> Terminated(code)
//!            |                      ^
//!            |                      +-- stop()
//!            +-> Terminated(-1)   (spawn failure)
//! ```
//!
//! `Finished` is emitted exactly once per accepted `start`.

use crate::models::{ControlCenterConfig, LogEntry};
use crate::services::bridge::{
    BridgeRequest, BridgeResponse, BridgeTokens, decode_request, encode_response,
};
use crate::services::log_sink::AsyncLogSink;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

/// Environment variable carrying the progress snapshot path.
pub const ENV_PROGRESS_FILE: &str = "MDF_PROGRESS_FILE";

/// Lifecycle of the supervised worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Starting,
    Running,
    Stopping,
    Terminated(i32),
}

impl WorkerState {
    /// Whether a worker occupies the supervisor
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            WorkerState::Starting | WorkerState::Running | WorkerState::Stopping
        )
    }
}

/// One-shot answer slot for a pending bridge request.
///
/// Clones share the slot; only the first [`resolve`](Responder::resolve) is
/// delivered.
#[derive(Clone)]
pub struct Responder {
    slot: Arc<Mutex<Option<oneshot::Sender<BridgeResponse>>>>,
}

impl Responder {
    /// A fresh responder and the receiving end the answer arrives on.
    pub fn channel() -> (Self, oneshot::Receiver<BridgeResponse>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Deliver the answer. Returns false if the request was already answered.
    pub fn resolve(&self, response: BridgeResponse) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(sender) => sender.send(response).is_ok(),
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// A request waiting for the operator
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request: BridgeRequest,
    pub responder: Responder,
}

/// Events published by the supervisor
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    Started { path: Utf8PathBuf },
    Line(LogEntry),
    BridgeRequest(PendingRequest),
    ProtocolWarning(String),
    Finished { exit_code: i32 },
}

/// Launch parameters
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Interpreter executable; empty runs the script path directly
    pub interpreter: String,
    pub interpreter_args: Vec<String>,
    pub tokens: BridgeTokens,
    pub progress_file: Option<Utf8PathBuf>,
    /// Time between the graceful termination signal and a forced kill
    pub stop_grace: Duration,
    pub working_dir: Option<Utf8PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interpreter: String::new(),
            interpreter_args: Vec::new(),
            tokens: BridgeTokens::default(),
            progress_file: None,
            stop_grace: Duration::from_millis(1500),
            working_dir: None,
        }
    }
}

impl SupervisorConfig {
    pub fn from_config(config: &ControlCenterConfig) -> Self {
        Self {
            interpreter: config.worker.interpreter.clone(),
            interpreter_args: config.worker.interpreter_args.clone(),
            tokens: config.bridge.clone(),
            progress_file: Some(config.worker.progress_file.clone()),
            stop_grace: config.worker.stop_grace(),
            working_dir: None,
        }
    }
}

struct Inner {
    config: SupervisorConfig,
    sink: Arc<AsyncLogSink>,
    state: watch::Sender<WorkerState>,
    stop: Mutex<Option<watch::Sender<bool>>>,
    pending: Mutex<Option<Responder>>,
    events: broadcast::Sender<SupervisorEvent>,
}

impl Inner {
    fn emit(&self, event: SupervisorEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Route a diagnostic line through the sink so it lands in the run log.
    fn log_line(&self, line: String) {
        let entry = self.sink.append(&line);
        self.emit(SupervisorEvent::Line(entry));
    }

    fn take_pending(&self) -> Option<Responder> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Owns the worker process and the bridge conversation with it.
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
    runtime: tokio::runtime::Handle,
}

impl ProcessSupervisor {
    pub fn new(
        config: SupervisorConfig,
        sink: Arc<AsyncLogSink>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            inner: Arc::new(Inner {
                config,
                sink,
                state,
                stop: Mutex::new(None),
                pending: Mutex::new(None),
                events,
            }),
            runtime,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> WorkerState {
        *self.inner.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    pub fn has_pending_request(&self) -> bool {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|r| !r.is_resolved())
    }

    pub fn tokens(&self) -> &BridgeTokens {
        &self.inner.config.tokens
    }

    /// Launch `script` with `env` added to the inherited environment.
    ///
    /// Returns false without side effects when a worker is already active. A
    /// spawn failure is reported through a log line and `Finished { exit_code: -1 }`.
    pub fn start(&self, script: &Utf8Path, env: &IndexMap<String, String>) -> bool {
        let claimed = self.inner.state.send_if_modified(|state| {
            if state.is_active() {
                false
            } else {
                *state = WorkerState::Starting;
                true
            }
        });
        if !claimed {
            tracing::warn!("Refusing to start {}: a worker is already running", script);
            return false;
        }

        let mut command = self.build_command(script, env);
        let spawned = {
            let _guard = self.runtime.enter();
            command.spawn()
        };

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::error!("Failed to start worker {}: {}", script, e);
                self.inner
                    .log_line(format!("[ERROR] Failed to start {}: {}", script, e));
                self.inner.state.send_replace(WorkerState::Terminated(-1));
                self.inner.emit(SupervisorEvent::Finished { exit_code: -1 });
                return true;
            }
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        *self
            .inner
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(stop_tx);

        let stdin = child.stdin.take();
        let (lines_tx, lines_rx) = mpsc::channel(256);
        if let Some(stdout) = child.stdout.take() {
            self.runtime.spawn(forward_lines(stdout, lines_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            self.runtime.spawn(forward_lines(stderr, lines_tx));
        }

        let promoted = self.inner.state.send_if_modified(|state| {
            if *state == WorkerState::Starting {
                *state = WorkerState::Running;
                true
            } else {
                false
            }
        });
        if !promoted {
            // stop() ran before the stop channel existed; replay it.
            if let Some(stop) = self
                .inner
                .stop
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
            {
                stop.send_replace(true);
            }
        }

        tracing::info!("Worker started: {} (pid {:?})", script, child.id());
        self.inner.emit(SupervisorEvent::Started {
            path: script.to_path_buf(),
        });

        let inner = Arc::clone(&self.inner);
        self.runtime
            .spawn(run_worker(inner, child, stdin, lines_rx, stop_rx));
        true
    }

    /// Request termination. Idempotent.
    ///
    /// A pending bridge request is released with CANCEL. The worker gets a
    /// graceful termination signal, then a kill after the grace period.
    pub fn stop(&self) {
        let changed = self.inner.state.send_if_modified(|state| {
            if matches!(state, WorkerState::Starting | WorkerState::Running) {
                *state = WorkerState::Stopping;
                true
            } else {
                false
            }
        });
        if !changed {
            tracing::debug!("stop() ignored in state {:?}", self.state());
            return;
        }

        tracing::info!("Stopping worker");
        if let Some(stop) = self
            .inner
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            stop.send_replace(true);
        }
        if let Some(responder) = self.inner.take_pending() {
            if responder.resolve(BridgeResponse::Cancel) {
                tracing::info!("Pending bridge request cancelled by stop");
            }
        }
    }

    /// Wait until the worker has terminated. Returns false on timeout.
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let mut state = self.inner.state.subscribe();
        tokio::time::timeout(timeout, state.wait_for(|s| !s.is_active()))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    /// Blocking variant of [`wait_for_exit`](Self::wait_for_exit) for non-async callers.
    pub fn wait_blocking(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_running() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    fn build_command(&self, script: &Utf8Path, env: &IndexMap<String, String>) -> Command {
        let config = &self.inner.config;
        let mut command = if config.interpreter.trim().is_empty() {
            Command::new(script.as_std_path())
        } else {
            let mut command = Command::new(&config.interpreter);
            command.args(&config.interpreter_args);
            command.arg(script.as_std_path());
            command
        };

        command
            .envs(config.tokens.to_environment())
            .env("PYTHONUNBUFFERED", "1")
            .env("PYTHONIOENCODING", "utf-8");
        if let Some(progress) = &config.progress_file {
            command.env(ENV_PROGRESS_FILE, progress.as_str());
        }
        command.envs(env.iter());

        if let Some(dir) = &config.working_dir {
            command.current_dir(dir.as_std_path());
        }

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

/// Read lines from one output pipe into the merged channel.
async fn forward_lines<R>(stream: R, lines: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if lines.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("Worker output read failed: {}", e);
                break;
            }
        }
    }
}

async fn run_worker(
    inner: Arc<Inner>,
    mut child: Child,
    mut stdin: Option<ChildStdin>,
    mut lines: mpsc::Receiver<String>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        if *stop_rx.borrow() {
            break;
        }

        let line = tokio::select! {
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
            _ = stop_rx.changed() => break,
        };

        if line.is_empty() {
            continue;
        }

        if !inner.config.tokens.is_request_line(&line) {
            inner.log_line(line);
            continue;
        }

        let response = match decode_request(&inner.config.tokens, &line) {
            Ok(request) => await_answer(&inner, request, &mut stop_rx).await,
            Err(e) => {
                let payload = &line[inner.config.tokens.prefix.len()..];
                let warning = format!("Invalid bridge payload: {} :: {}", e, payload);
                tracing::warn!("{}", warning);
                inner.log_line(format!("[WARNING] {}", warning));
                inner.emit(SupervisorEvent::ProtocolWarning(warning));
                BridgeResponse::Ack
            }
        };

        write_response(&inner, stdin.as_mut(), &response).await;
    }

    // Closing stdin lets a worker blocked on input see EOF.
    drop(stdin);

    let grace = inner.config.stop_grace;
    let exit_code = reap(&mut child, &mut stop_rx, grace).await;

    if let Some(responder) = inner.take_pending() {
        responder.resolve(BridgeResponse::Cancel);
    }
    *inner.stop.lock().unwrap_or_else(PoisonError::into_inner) = None;
    inner.state.send_replace(WorkerState::Terminated(exit_code));

    tracing::info!("Worker finished with exit code {}", exit_code);
    inner.emit(SupervisorEvent::Finished { exit_code });
}

/// Publish a request and wait for its single answer or a stop.
async fn await_answer(
    inner: &Inner,
    request: BridgeRequest,
    stop_rx: &mut watch::Receiver<bool>,
) -> BridgeResponse {
    if *stop_rx.borrow() {
        return BridgeResponse::Cancel;
    }

    let (responder, answer) = Responder::channel();
    *inner.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(responder.clone());

    tracing::debug!("Bridge request: {} '{}'", request.kind.as_str(), request.title);
    let delivered = inner.emit(SupervisorEvent::BridgeRequest(PendingRequest {
        request,
        responder: responder.clone(),
    }));
    if !delivered {
        tracing::warn!("No dialog handler is listening, cancelling bridge request");
        responder.resolve(BridgeResponse::Cancel);
    }

    let response = tokio::select! {
        answer = answer => answer.unwrap_or(BridgeResponse::Cancel),
        _ = stop_rx.changed() => {
            responder.resolve(BridgeResponse::Cancel);
            BridgeResponse::Cancel
        }
    };

    inner.take_pending();
    response
}

async fn write_response(
    inner: &Inner,
    stdin: Option<&mut ChildStdin>,
    response: &BridgeResponse,
) {
    let Some(stdin) = stdin else {
        tracing::warn!("Worker stdin unavailable, bridge response dropped");
        return;
    };

    let mut line = encode_response(&inner.config.tokens, response);
    line.push('\n');
    let result = async {
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    }
    .await;

    if let Err(e) = result {
        tracing::warn!("Failed to answer worker: {}", e);
        inner.log_line(format!("[WARNING] Failed to send response to worker: {}", e));
    }
}

/// Wait for the child, terminating it if a stop is requested meanwhile.
async fn reap(child: &mut Child, stop_rx: &mut watch::Receiver<bool>, grace: Duration) -> i32 {
    let status = if *stop_rx.borrow() {
        terminate(child, grace).await
    } else {
        tokio::select! {
            status = child.wait() => status,
            _ = stop_rx.changed() => terminate(child, grace).await,
        }
    };

    match status {
        Ok(status) => status.code().unwrap_or(-1),
        Err(e) => {
            tracing::error!("Failed to wait for worker: {}", e);
            -1
        }
    }
}

async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<std::process::ExitStatus> {
    if let Ok(Some(status)) = child.try_wait() {
        return Ok(status);
    }

    request_graceful_exit(child);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            tracing::warn!("Worker ignored termination for {:?}, killing", grace);
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn request_graceful_exit(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain signal delivery to a child we spawned and have not reaped.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            tracing::debug!("SIGTERM to {} failed: {}", pid, std::io::Error::last_os_error());
        }
    }
}

#[cfg(not(unix))]
fn request_graceful_exit(child: &mut Child) {
    // No console-less graceful signal here; TerminateProcess is the only option.
    if let Err(e) = child.start_kill() {
        tracing::debug!("Failed to terminate worker: {}", e);
    }
}
