//! Progress snapshots written by the worker.
//!
//! The worker owns the snapshot file and rewrites it as it advances; this side
//! only polls it. [`ProgressWatcher`] turns the polling into
//! [`ProgressEvent`]s on a broadcast channel.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Polling never runs faster than this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Error,
    #[serde(other)]
    Unknown,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }

    /// Status word with its first letter capitalized
    pub fn title(&self) -> String {
        let word = self.as_str();
        let mut chars = word.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

/// One snapshot of the worker's progress file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    #[serde(default)]
    pub status: ProgressStatus,
    #[serde(default)]
    pub percentage: f64,
    #[serde(default)]
    pub current_step: String,
    /// Seconds left, when the worker could estimate it
    #[serde(default)]
    pub estimated_time_remaining: Option<f64>,
    /// Fields this side does not interpret (messages, step counters, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> u8 {
        if self.percentage.is_finite() {
            self.percentage.clamp(0.0, 100.0) as u8
        } else {
            0
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, ProgressStatus::Completed | ProgressStatus::Error)
    }

    /// Remaining time as `m:ss`, or `Ns` under a minute. None when unknown.
    pub fn remaining_label(&self) -> Option<String> {
        let seconds = self.estimated_time_remaining?;
        if !seconds.is_finite() || seconds < 1.0 {
            return None;
        }
        let seconds = seconds as u64;
        let (minutes, seconds) = (seconds / 60, seconds % 60);
        Some(if minutes > 0 {
            format!("{}:{:02}", minutes, seconds)
        } else {
            format!("{}s", seconds)
        })
    }

    /// Text for the progress overlay: the current step (or the status) and the
    /// remaining time when known.
    pub fn overlay_message(&self) -> String {
        let step = self.current_step.trim();
        let mut message = if !step.is_empty() {
            step.to_string()
        } else if self.status != ProgressStatus::Unknown {
            self.status.title()
        } else {
            "Automation in progress".to_string()
        };
        if let Some(remaining) = self.remaining_label() {
            message.push_str(&format!("\nTime remaining: ~{}", remaining));
        }
        message
    }
}

/// Read the snapshot at `path`. Missing or unreadable files yield None.
pub fn read_snapshot(path: &Utf8Path) -> Option<ProgressSnapshot> {
    let contents = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&contents) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            // Usually a read racing a rewrite; the next poll sees the full file.
            tracing::debug!("Ignoring progress snapshot {}: {}", path, e);
            None
        }
    }
}

/// Remove a stale snapshot so the next run starts from "missing".
pub fn reset_snapshot(path: &Utf8Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Updated(ProgressSnapshot),
    Missing,
}

/// Periodically reads a snapshot file and broadcasts what it finds.
pub struct ProgressWatcher {
    path: Mutex<Utf8PathBuf>,
    interval: Duration,
    events: broadcast::Sender<ProgressEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProgressWatcher {
    pub fn new(path: impl Into<Utf8PathBuf>, interval: Duration) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            path: Mutex::new(path.into()),
            interval: interval.max(MIN_POLL_INTERVAL),
            events,
            task: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn path(&self) -> Utf8PathBuf {
        self.path
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Point the watcher at another file. Takes effect on the next start.
    pub fn set_path(&self, path: impl Into<Utf8PathBuf>) {
        *self.path.lock().unwrap_or_else(PoisonError::into_inner) = path.into();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Start polling on `runtime`. The first poll happens immediately.
    /// No-op while already polling.
    pub fn start(&self, runtime: &Handle) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let path = self.path();
        let events = self.events.clone();
        let interval = self.interval;
        tracing::debug!("Watching progress file {} every {:?}", path, interval);

        *task = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let event = match read_snapshot(&path) {
                    Some(snapshot) => ProgressEvent::Updated(snapshot),
                    None => ProgressEvent::Missing,
                };
                // No subscribers is fine.
                let _ = events.send(event);
            }
        }));
    }

    /// Stop polling and tell listeners the data is gone.
    pub fn stop(&self) {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        let _ = self.events.send(ProgressEvent::Missing);
    }
}

impl Drop for ProgressWatcher {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn utf8(dir: &TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
    }

    #[test]
    fn test_snapshot_tolerates_extra_fields() {
        let json = r#"{
            "status": "running",
            "percentage": 140,
            "current_step": "Filling form",
            "total_steps": 10,
            "messages": [],
            "estimated_time_remaining": null
        }"#;
        let snapshot: ProgressSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.status, ProgressStatus::Running);
        assert_eq!(snapshot.percent(), 100);
        assert_eq!(snapshot.extra.get("total_steps"), Some(&Value::from(10)));
        assert_eq!(snapshot.remaining_label(), None);
    }

    #[test]
    fn test_unknown_status_and_missing_fields() {
        let snapshot: ProgressSnapshot = serde_json::from_str(r#"{"status":"warming"}"#).unwrap();
        assert_eq!(snapshot.status, ProgressStatus::Unknown);
        assert_eq!(snapshot.percent(), 0);
        assert_eq!(snapshot.overlay_message(), "Automation in progress");
    }

    #[test]
    fn test_overlay_message() {
        let mut snapshot = ProgressSnapshot {
            status: ProgressStatus::Paused,
            estimated_time_remaining: Some(125.0),
            ..Default::default()
        };
        assert_eq!(snapshot.overlay_message(), "Paused\nTime remaining: ~2:05");

        snapshot.current_step = "  Uploading  ".to_string();
        snapshot.estimated_time_remaining = Some(42.7);
        assert_eq!(snapshot.overlay_message(), "Uploading\nTime remaining: ~42s");

        snapshot.estimated_time_remaining = Some(0.0);
        assert_eq!(snapshot.overlay_message(), "Uploading");
    }

    #[test]
    fn test_read_and_reset_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = utf8(&dir, "progress.json");

        assert!(read_snapshot(&path).is_none());
        reset_snapshot(&path).unwrap();

        fs::write(&path, "{\"status\": \"compl").unwrap();
        assert!(read_snapshot(&path).is_none());

        fs::write(&path, r#"{"status":"completed","percentage":100}"#).unwrap();
        let snapshot = read_snapshot(&path).unwrap();
        assert!(snapshot.is_finished());

        reset_snapshot(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_watcher_interval_floor() {
        let watcher = ProgressWatcher::new("progress.json", Duration::from_millis(10));
        assert_eq!(watcher.interval(), MIN_POLL_INTERVAL);
    }

    #[tokio::test]
    async fn test_watcher_emits_updates_and_missing_on_stop() {
        let dir = TempDir::new().unwrap();
        let path = utf8(&dir, "progress.json");
        fs::write(&path, r#"{"status":"running","percentage":30}"#).unwrap();

        let watcher = ProgressWatcher::new(path.clone(), MIN_POLL_INTERVAL);
        let mut rx = watcher.subscribe();
        watcher.start(&Handle::current());
        assert!(watcher.is_running());

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            ProgressEvent::Updated(snapshot) => assert_eq!(snapshot.percent(), 30),
            other => panic!("unexpected event {:?}", other),
        }

        watcher.stop();
        assert!(!watcher.is_running());
        let mut saw_missing = false;
        while let Ok(event) = rx.try_recv() {
            saw_missing = event == ProgressEvent::Missing;
        }
        assert!(saw_missing);
    }
}
