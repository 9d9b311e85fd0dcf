//! Asynchronous persistence of worker output.
//!
//! Producers call [`AsyncLogSink::append`], which parses the line, keeps it in a
//! bounded in-memory history and enqueues it for a dedicated consumer thread.
//! The consumer owns the session file: it batches lines and flushes when the
//! batch threshold is reached or the flush interval elapses, whichever comes
//! first.
//!
//! # Backpressure
//!
//! Outstanding lines are counted. Once the count reaches the configured
//! capacity new lines are dropped (they still reach the in-memory history) and a
//! single [`SinkEvent::LinesDropped`] is raised for the session. Control
//! commands (session start, abort, stop) bypass the capacity check.
//!
//! # Pausing
//!
//! [`pause`](AsyncLogSink::pause) parks the consumer before it takes the next
//! command, so nothing touches the disk while a modal dialog holds the
//! desktop. The backlog stays in the queue and still counts against capacity.
//! Pauses nest: the consumer runs again once every pause has been resumed.

use crate::models::{LogEntry, LogSinkConfig, PersistFormat};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;
use std::collections::{HashSet, VecDeque};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Notifications raised by the sink
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    SessionStarted(Utf8PathBuf),
    /// Raised once per session, the first time a line is dropped
    LinesDropped { dropped_so_far: u64 },
    /// Raised when a flush fails after a healthy period
    WriteFailed(String),
    /// Raised when a flush succeeds after a failure
    WriteRecovered,
    SessionAborted,
}

enum SinkCommand {
    StartSession {
        id: u64,
        path: Utf8PathBuf,
        header: String,
    },
    Write {
        session: u64,
        line: String,
    },
    Abort {
        session: u64,
        delete: bool,
    },
    Flush(mpsc::Sender<()>),
    Stop,
}

/// Producer-side view of the active session
#[derive(Debug, Default)]
struct ProducerSession {
    id: Option<u64>,
    path: Option<Utf8PathBuf>,
    dropped: u64,
    drop_reported: bool,
}

/// Counting gate: one `enter` per `leave`
#[derive(Default)]
struct PauseGate {
    holders: Mutex<usize>,
    resumed: Condvar,
}

impl PauseGate {
    fn enter(&self) {
        *self.holders.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn leave(&self) {
        let mut holders = self.holders.lock().unwrap_or_else(PoisonError::into_inner);
        *holders = holders.saturating_sub(1);
        if *holders == 0 {
            self.resumed.notify_all();
        }
    }

    fn open(&self) {
        *self.holders.lock().unwrap_or_else(PoisonError::into_inner) = 0;
        self.resumed.notify_all();
    }

    fn is_paused(&self) -> bool {
        *self.holders.lock().unwrap_or_else(PoisonError::into_inner) > 0
    }

    fn wait_while_paused(&self) {
        let mut paused = self.holders.lock().unwrap_or_else(PoisonError::into_inner);
        while *paused > 0 {
            paused = self
                .resumed
                .wait(paused)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// State shared between the producers and the consumer thread
struct Shared {
    queued: AtomicUsize,
    write_failed: AtomicBool,
    gate: PauseGate,
    /// Sessions aborted by a producer whose `Abort` the consumer has not taken yet
    aborted: Mutex<HashSet<u64>>,
    events: broadcast::Sender<SinkEvent>,
}

impl Shared {
    fn emit(&self, event: SinkEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn is_aborted(&self, session: u64) -> bool {
        self.aborted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&session)
    }

    fn mark_aborted(&self, session: u64, aborted: bool) {
        let mut set = self.aborted.lock().unwrap_or_else(PoisonError::into_inner);
        if aborted {
            set.insert(session);
        } else {
            set.remove(&session);
        }
    }
}

/// Keeps the sink paused until dropped.
#[must_use = "the sink resumes as soon as the guard is dropped"]
pub struct PauseGuard {
    sink: Arc<AsyncLogSink>,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.sink.resume();
    }
}

/// Buffers worker output and persists it off the caller's thread.
pub struct AsyncLogSink {
    config: LogSinkConfig,
    shared: Arc<Shared>,
    commands: mpsc::Sender<SinkCommand>,
    session: Mutex<ProducerSession>,
    /// Every path handed out, so sessions started within the same second never share a file
    issued: Mutex<HashSet<Utf8PathBuf>>,
    memory: Mutex<VecDeque<LogEntry>>,
    next_session: AtomicU64,
    stopped: AtomicBool,
    done: Mutex<Option<mpsc::Receiver<()>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncLogSink {
    /// Create the sink and start its consumer thread.
    pub fn new(config: LogSinkConfig) -> Self {
        let (events, _) = broadcast::channel(100);
        let shared = Arc::new(Shared {
            queued: AtomicUsize::new(0),
            write_failed: AtomicBool::new(false),
            gate: PauseGate::default(),
            aborted: Mutex::new(HashSet::new()),
            events,
        });

        let (commands, rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let consumer = Consumer::new(&config, Arc::clone(&shared));
        let handle = std::thread::Builder::new()
            .name("automdf-log-sink".to_string())
            .spawn(move || {
                consumer.run(rx);
                let _ = done_tx.send(());
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("Failed to start log sink thread: {}", e);
                None
            }
        };

        Self {
            config,
            shared,
            commands,
            session: Mutex::new(ProducerSession::default()),
            issued: Mutex::new(HashSet::new()),
            memory: Mutex::new(VecDeque::new()),
            next_session: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
            done: Mutex::new(Some(done_rx)),
            consumer: Mutex::new(handle),
        }
    }

    pub fn config(&self) -> &LogSinkConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SinkEvent> {
        self.shared.events.subscribe()
    }

    /// Open a new session file for `name`.
    ///
    /// Lines buffered for the previous session are flushed first. The header is
    /// written with the first flush, so the file only appears on disk then.
    pub fn start_session(&self, name: &str) -> io::Result<Utf8PathBuf> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(io::Error::other("log sink is shut down"));
        }

        fs::create_dir_all(&self.config.logs_dir)?;
        let path = {
            let mut issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);
            let path = session_file_path(&self.config.logs_dir, name, &Local::now(), &issued);
            issued.insert(path.clone());
            path
        };
        let id = self.next_session.fetch_add(1, Ordering::SeqCst);
        let header = format!("### Run log - {} ###", name);

        {
            let mut session = self.lock_session();
            *session = ProducerSession {
                id: Some(id),
                path: Some(path.clone()),
                ..ProducerSession::default()
            };
        }
        self.shared.write_failed.store(false, Ordering::SeqCst);

        self.send_control(SinkCommand::StartSession {
            id,
            path: path.clone(),
            header,
        });

        tracing::info!("Log session {} started: {}", id, path);
        self.shared.emit(SinkEvent::SessionStarted(path.clone()));
        Ok(path)
    }

    /// Record a worker line. Never blocks on disk I/O.
    pub fn append(&self, raw_line: &str) -> LogEntry {
        let entry = LogEntry::parse(raw_line);

        {
            let mut memory = self.memory.lock().unwrap_or_else(PoisonError::into_inner);
            memory.push_back(entry.clone());
            while memory.len() > self.config.memory_entries.max(1) {
                memory.pop_front();
            }
        }

        let mut session = self.lock_session();
        let Some(id) = session.id else {
            return entry;
        };

        let line = match self.config.persist_format {
            PersistFormat::Raw => entry.raw.clone(),
            PersistFormat::Formatted => entry.formatted(),
        };

        if self.try_enqueue(id, line) {
            return entry;
        }

        session.dropped += 1;
        if !session.drop_reported {
            session.drop_reported = true;
            tracing::warn!(
                "Log backlog above {} lines, dropping output for this session",
                self.config.max_queue_size
            );
            self.shared.emit(SinkEvent::LinesDropped {
                dropped_so_far: session.dropped,
            });
        }
        entry
    }

    /// Discard the active session. With `delete_target` the file is removed too.
    pub fn abort_session(&self, delete_target: bool) {
        let (id, path) = {
            let mut session = self.lock_session();
            let id = session.id.take();
            let path = session.path.take();
            *session = ProducerSession::default();
            (id, path)
        };

        self.clear_memory();
        self.shared.write_failed.store(false, Ordering::SeqCst);

        if let Some(id) = id {
            // Visible to the consumer before it reaches the lines queued ahead of the abort
            self.shared.mark_aborted(id, true);
            self.send_control(SinkCommand::Abort {
                session: id,
                delete: delete_target,
            });
        }

        if delete_target {
            if let Some(path) = &path {
                remove_if_exists(path);
            }
        }

        tracing::info!("Log session aborted (delete={})", delete_target);
        self.shared.emit(SinkEvent::SessionAborted);
    }

    /// Hold the consumer. Each call needs its own [`resume`](Self::resume).
    pub fn pause(&self) {
        tracing::debug!("Log sink paused");
        self.shared.gate.enter();
    }

    pub fn resume(&self) {
        tracing::debug!("Log sink resumed");
        self.shared.gate.leave();
    }

    /// Pause until the returned guard is dropped.
    pub fn pause_guard(self: &Arc<Self>) -> PauseGuard {
        self.pause();
        PauseGuard {
            sink: Arc::clone(self),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.gate.is_paused()
    }

    /// Ask the consumer to write out everything it holds and wait for it.
    ///
    /// Returns false if the sink is paused, stopped, or does not answer in time.
    pub fn flush(&self, timeout: Duration) -> bool {
        if self.stopped.load(Ordering::SeqCst) || self.is_paused() {
            return false;
        }
        let (tx, rx) = mpsc::channel();
        self.send_control(SinkCommand::Flush(tx));
        rx.recv_timeout(timeout).is_ok()
    }

    /// Stop the consumer after a final flush, waiting at most `timeout`.
    ///
    /// Returns true if the consumer finished in time. A consumer that misses the
    /// deadline is left to finish on its own. Repeated calls are no-ops.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return true;
        }

        self.shared.gate.open();
        self.send_control(SinkCommand::Stop);

        let Some(done) = self
            .done
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return true;
        };

        match done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let handle = self
                    .consumer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(handle) = handle {
                    let _ = handle.join();
                }
                tracing::info!("Log sink shut down");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!("Log sink did not finish within {:?}", timeout);
                false
            }
        }
    }

    /// Most recent entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn raw_lines(&self) -> Vec<String> {
        self.memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|entry| entry.raw.clone())
            .collect()
    }

    /// Forget the in-memory history. The session file is untouched.
    pub fn clear_memory(&self) {
        self.memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Write the in-memory history to `destination`.
    pub fn export_to(&self, destination: &Utf8Path) -> io::Result<()> {
        if let Some(parent) = destination.parent() {
            if !parent.as_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let lines = self.raw_lines();
        let mut contents = lines.join("\n");
        if !lines.is_empty() {
            contents.push('\n');
        }
        fs::write(destination, contents)?;
        tracing::info!("Exported {} log lines to {}", lines.len(), destination);
        Ok(())
    }

    pub fn current_target(&self) -> Option<Utf8PathBuf> {
        self.lock_session().path.clone()
    }

    pub fn write_failed(&self) -> bool {
        self.shared.write_failed.load(Ordering::SeqCst)
    }

    /// Lines dropped in the active session
    pub fn dropped_lines(&self) -> u64 {
        self.lock_session().dropped
    }

    /// Lines enqueued but not yet taken by the consumer
    pub fn backlog(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, ProducerSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_enqueue(&self, session: u64, line: String) -> bool {
        let capacity = self.config.max_queue_size.max(1);
        let reserved = self
            .shared
            .queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |queued| {
                (queued < capacity).then_some(queued + 1)
            });
        if reserved.is_err() {
            return false;
        }

        if self.commands.send(SinkCommand::Write { session, line }).is_err() {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    fn send_control(&self, command: SinkCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!("Log sink consumer is gone, control command dropped");
        }
    }
}

impl Drop for AsyncLogSink {
    fn drop(&mut self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.shared.gate.open();
            let _ = self.commands.send(SinkCommand::Stop);
        }
    }
}

/// Session target owned by the consumer
struct ActiveTarget {
    id: u64,
    path: Utf8PathBuf,
    header: String,
    header_written: bool,
}

struct Consumer {
    shared: Arc<Shared>,
    flush_interval: Duration,
    flush_batch: usize,
    capacity: usize,
    current: Option<ActiveTarget>,
    buffer: Vec<String>,
    last_flush: Instant,
}

impl Consumer {
    fn new(config: &LogSinkConfig, shared: Arc<Shared>) -> Self {
        Self {
            shared,
            flush_interval: config.flush_interval(),
            flush_batch: config.flush_batch.max(1),
            capacity: config.max_queue_size.max(1),
            current: None,
            buffer: Vec::new(),
            last_flush: Instant::now(),
        }
    }

    fn run(mut self, rx: mpsc::Receiver<SinkCommand>) {
        tracing::debug!("Log sink consumer started");

        loop {
            self.shared.gate.wait_while_paused();

            let received = rx.recv_timeout(self.flush_interval);
            // A command taken just before a pause waits here, still counted as backlog.
            self.shared.gate.wait_while_paused();

            match received {
                Ok(SinkCommand::Write { session, line }) => {
                    self.shared.queued.fetch_sub(1, Ordering::SeqCst);
                    if self.current.as_ref().is_some_and(|t| t.id == session)
                        && !self.shared.is_aborted(session)
                    {
                        self.buffer.push(line);
                    }
                }
                Ok(SinkCommand::StartSession { id, path, header }) => {
                    self.flush(true);
                    self.current = Some(ActiveTarget {
                        id,
                        path,
                        header,
                        header_written: false,
                    });
                    self.buffer.clear();
                    self.last_flush = Instant::now();
                }
                Ok(SinkCommand::Abort { session, delete }) => {
                    self.shared.mark_aborted(session, false);
                    if self.current.as_ref().is_some_and(|t| t.id == session) {
                        if let Some(target) = self.current.take() {
                            if delete {
                                remove_if_exists(&target.path);
                            }
                        }
                        self.buffer.clear();
                    }
                }
                Ok(SinkCommand::Flush(ack)) => {
                    self.flush(true);
                    let _ = ack.send(());
                }
                Ok(SinkCommand::Stop) | Err(RecvTimeoutError::Disconnected) => {
                    self.flush(true);
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }

            let due = self.buffer.len() >= self.flush_batch
                || self.last_flush.elapsed() >= self.flush_interval;
            if !self.buffer.is_empty() && due {
                self.flush(false);
            }
        }

        tracing::debug!("Log sink consumer stopped");
    }

    /// Write buffered lines. A forced flush also materializes a header-only file.
    fn flush(&mut self, force: bool) {
        self.last_flush = Instant::now();

        let Some(target) = self.current.as_mut() else {
            self.buffer.clear();
            return;
        };
        if self.shared.is_aborted(target.id) {
            self.buffer.clear();
            return;
        }
        if self.buffer.is_empty() && (target.header_written || !force) {
            return;
        }

        match write_lines(target, &self.buffer) {
            Ok(()) => {
                target.header_written = true;
                self.buffer.clear();
                if self.shared.write_failed.swap(false, Ordering::SeqCst) {
                    tracing::info!("Log writes to {} recovered", target.path);
                    self.shared.emit(SinkEvent::WriteRecovered);
                }
            }
            Err(e) => {
                if !self.shared.write_failed.swap(true, Ordering::SeqCst) {
                    tracing::error!("Failed to write log file {}: {}", target.path, e);
                    self.shared.emit(SinkEvent::WriteFailed(e.to_string()));
                }
                // Retained for the next cycle, bounded by the backlog capacity.
                if self.buffer.len() > self.capacity {
                    let excess = self.buffer.len() - self.capacity;
                    self.buffer.drain(..excess);
                    tracing::warn!("Discarded {} unwritten log lines", excess);
                }
            }
        }
    }
}

fn write_lines(target: &ActiveTarget, lines: &[String]) -> io::Result<()> {
    let mut contents = String::new();
    if !target.header_written {
        contents.push_str(&target.header);
        contents.push('\n');
    }
    for line in lines {
        contents.push_str(line);
        contents.push('\n');
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&target.path)?;
    file.write_all(contents.as_bytes())?;
    file.flush()
}

fn remove_if_exists(path: &Utf8Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!("Removed log file {}", path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove log file {}: {}", path, e),
    }
}

/// Reduce a script name to `[A-Za-z0-9._-]`, collapsing everything else to `-`.
pub fn sanitize_session_name(raw_name: &str) -> String {
    let mut cleaned = String::with_capacity(raw_name.len());
    let mut last_dash = false;
    for c in raw_name.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            cleaned.push(c);
            last_dash = false;
        } else if !last_dash {
            cleaned.push('-');
            last_dash = true;
        }
    }
    let trimmed = cleaned.trim_matches(|c| matches!(c, '-' | '.' | '_'));
    if trimmed.is_empty() {
        "run".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<logs_dir>/<YYYYmmdd-HHMMSS>-<name>.log`, suffixed when the name exists on
/// disk or is in `issued`.
pub fn session_file_path(
    logs_dir: &Utf8Path,
    name: &str,
    now: &chrono::DateTime<Local>,
    issued: &HashSet<Utf8PathBuf>,
) -> Utf8PathBuf {
    let stem = format!("{}-{}", now.format("%Y%m%d-%H%M%S"), sanitize_session_name(name));
    let mut candidate = logs_dir.join(format!("{}.log", stem));
    let mut suffix = 1;
    while candidate.exists() || issued.contains(&candidate) {
        candidate = logs_dir.join(format!("{}-{}.log", stem, suffix));
        suffix += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(5);

    fn sink_in(dir: &TempDir) -> AsyncLogSink {
        AsyncLogSink::new(LogSinkConfig {
            logs_dir: Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap(),
            flush_interval_ms: 60_000,
            ..LogSinkConfig::default()
        })
    }

    #[test]
    fn test_sanitize_session_name() {
        assert_eq!(sanitize_session_name("fill form.py"), "fill-form.py");
        assert_eq!(sanitize_session_name("  **  "), "run");
        assert_eq!(sanitize_session_name("été/ação"), "t-a-o");
    }

    #[test]
    fn test_lines_are_persisted_after_flush() {
        let dir = TempDir::new().unwrap();
        let sink = sink_in(&dir);
        let path = sink.start_session("demo").unwrap();

        sink.append("[INFO] one");
        sink.append("two");
        assert!(sink.flush(WAIT));

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "### Run log - demo ###\n[INFO] one\ntwo\n");
        assert!(sink.shutdown(WAIT));
    }

    #[test]
    fn test_header_is_written_lazily() {
        let dir = TempDir::new().unwrap();
        let sink = sink_in(&dir);
        let path = sink.start_session("demo").unwrap();

        assert!(!path.exists());
        assert!(sink.shutdown(WAIT));
        assert_eq!(fs::read_to_string(&path).unwrap(), "### Run log - demo ###\n");
    }

    #[test]
    fn test_formatted_persistence() {
        let dir = TempDir::new().unwrap();
        let sink = AsyncLogSink::new(LogSinkConfig {
            logs_dir: Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap(),
            persist_format: PersistFormat::Formatted,
            ..LogSinkConfig::default()
        });
        let path = sink.start_session("fmt").unwrap();
        sink.append("[AutoMDF][ERROR][10:11:12] failed");
        assert!(sink.shutdown(WAIT));

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.ends_with("[ERROR][10:11:12] failed\n"));
    }

    #[test]
    fn test_session_switch_flushes_previous_session() {
        let dir = TempDir::new().unwrap();
        let sink = sink_in(&dir);
        let first = sink.start_session("first").unwrap();
        sink.append("a");
        let second = sink.start_session("second").unwrap();
        sink.append("b");
        assert!(sink.shutdown(WAIT));

        assert_ne!(first, second);
        assert!(fs::read_to_string(&first).unwrap().ends_with("a\n"));
        assert!(fs::read_to_string(&second).unwrap().ends_with("b\n"));
    }

    #[test]
    fn test_abort_before_flush_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let sink = sink_in(&dir);
        let path = sink.start_session("demo").unwrap();
        sink.append("never persisted");
        sink.abort_session(true);
        assert!(sink.shutdown(WAIT));

        assert!(!path.exists());
        assert!(sink.entries().is_empty());
        assert_eq!(sink.current_target(), None);
    }

    #[test]
    fn test_abort_after_flush_deletes_file() {
        let dir = TempDir::new().unwrap();
        let sink = sink_in(&dir);
        let path = sink.start_session("demo").unwrap();
        sink.append("x");
        assert!(sink.flush(WAIT));
        assert!(path.exists());

        sink.abort_session(true);
        sink.append("after abort");
        assert!(sink.shutdown(WAIT));
        assert!(!path.exists());
    }

    #[test]
    fn test_abort_discards_lines_already_queued() {
        let dir = TempDir::new().unwrap();
        let sink = AsyncLogSink::new(LogSinkConfig {
            logs_dir: Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap(),
            flush_batch: 1,
            flush_interval_ms: 60_000,
            ..LogSinkConfig::default()
        });
        let path = sink.start_session("demo").unwrap();

        sink.pause();
        for i in 0..5 {
            sink.append(&format!("line {}", i));
        }
        sink.abort_session(false);
        sink.resume();
        assert!(sink.flush(WAIT));
        assert!(!path.exists());

        assert!(sink.shutdown(WAIT));
        assert!(!path.exists());
    }

    #[test]
    fn test_same_name_within_one_second_gets_distinct_files() {
        let dir = TempDir::new().unwrap();
        let sink = sink_in(&dir);
        let first = sink.start_session("demo").unwrap();
        sink.append("first run");
        let second = sink.start_session("demo").unwrap();
        sink.append("second run");
        assert_ne!(first, second);

        sink.abort_session(true);
        assert!(sink.shutdown(WAIT));
        assert_eq!(
            fs::read_to_string(&first).unwrap(),
            "### Run log - demo ###\nfirst run\n"
        );
        assert!(!second.exists());
    }

    #[test]
    fn test_session_file_path_skips_issued_names() {
        let logs_dir = Utf8Path::new("/nonexistent/logs");
        let now = Local::now();
        let mut issued = HashSet::new();
        let first = session_file_path(logs_dir, "demo", &now, &issued);
        issued.insert(first.clone());
        let second = session_file_path(logs_dir, "demo", &now, &issued);
        issued.insert(second.clone());
        let third = session_file_path(logs_dir, "demo", &now, &issued);

        assert!(second.as_str().ends_with("-demo-1.log"));
        assert!(third.as_str().ends_with("-demo-2.log"));
        assert_ne!(first, second);
    }

    #[test]
    fn test_pauses_nest() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(sink_in(&dir));
        let path = sink.start_session("nested").unwrap();

        let dialog = sink.pause_guard();
        sink.pause();
        sink.append("held");
        sink.resume();
        assert!(sink.is_paused());
        assert!(!sink.flush(Duration::from_millis(50)));
        assert!(!path.exists());

        drop(dialog);
        assert!(!sink.is_paused());
        assert!(sink.flush(WAIT));
        assert!(fs::read_to_string(&path).unwrap().ends_with("held\n"));
        assert!(sink.shutdown(WAIT));
    }

    #[test]
    fn test_shutdown_releases_outstanding_pauses() {
        let dir = TempDir::new().unwrap();
        let sink = sink_in(&dir);
        let path = sink.start_session("stuck").unwrap();
        sink.pause();
        sink.pause();
        sink.append("flushed on shutdown");

        assert!(sink.shutdown(WAIT));
        assert!(fs::read_to_string(&path).unwrap().ends_with("flushed on shutdown\n"));
    }

    #[test]
    fn test_capacity_drops_and_reports_once() {
        let dir = TempDir::new().unwrap();
        let sink = AsyncLogSink::new(LogSinkConfig {
            logs_dir: Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap(),
            max_queue_size: 3,
            flush_interval_ms: 60_000,
            ..LogSinkConfig::default()
        });
        let mut events = sink.subscribe();
        let path = sink.start_session("busy").unwrap();

        sink.pause();
        for i in 0..10 {
            sink.append(&format!("line {}", i));
        }
        assert_eq!(sink.backlog(), 3);
        assert_eq!(sink.dropped_lines(), 7);
        assert_eq!(sink.entries().len(), 10);
        sink.resume();
        assert!(sink.shutdown(WAIT));

        let mut drop_events = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SinkEvent::LinesDropped { .. }) {
                drop_events += 1;
            }
        }
        assert_eq!(drop_events, 1);
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.ends_with("line 0\nline 1\nline 2\n"));
    }

    #[test]
    fn test_pause_blocks_flush() {
        let dir = TempDir::new().unwrap();
        let sink = sink_in(&dir);
        let path = sink.start_session("paused").unwrap();
        sink.pause();
        sink.append("held");
        assert!(!sink.flush(Duration::from_millis(50)));
        assert!(!path.exists());

        sink.resume();
        assert!(sink.flush(WAIT));
        assert!(fs::read_to_string(&path).unwrap().contains("held"));
        sink.shutdown(WAIT);
    }

    #[test]
    fn test_write_failure_is_flagged_and_recovers() {
        let dir = TempDir::new().unwrap();
        let sink = sink_in(&dir);
        let mut events = sink.subscribe();
        let path = sink.start_session("fail").unwrap();

        // A directory at the target path makes the open fail.
        fs::create_dir(&path).unwrap();
        sink.append("kept for retry");
        assert!(sink.flush(WAIT));
        assert!(sink.write_failed());

        fs::remove_dir(&path).unwrap();
        assert!(sink.flush(WAIT));
        assert!(!sink.write_failed());
        assert!(fs::read_to_string(&path).unwrap().ends_with("kept for retry\n"));

        let seen: Vec<SinkEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert!(seen.iter().any(|e| matches!(e, SinkEvent::WriteFailed(_))));
        assert!(seen.contains(&SinkEvent::WriteRecovered));
        sink.shutdown(WAIT);
    }

    #[test]
    fn test_memory_is_bounded() {
        let dir = TempDir::new().unwrap();
        let sink = AsyncLogSink::new(LogSinkConfig {
            logs_dir: Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap(),
            memory_entries: 2,
            ..LogSinkConfig::default()
        });
        sink.append("a");
        sink.append("b");
        sink.append("c");
        assert_eq!(sink.raw_lines(), vec!["b", "c"]);
        sink.shutdown(WAIT);
    }

    #[test]
    fn test_export_and_shutdown_idempotent() {
        let dir = TempDir::new().unwrap();
        let sink = sink_in(&dir);
        sink.append("[INFO] exported");
        let target = Utf8PathBuf::try_from(dir.path().join("out/export.log")).unwrap();
        sink.export_to(&target).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "[INFO] exported\n");

        assert!(sink.shutdown(WAIT));
        assert!(sink.shutdown(WAIT));
        assert!(sink.start_session("late").is_err());
    }
}
