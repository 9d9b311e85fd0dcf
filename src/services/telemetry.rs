// Automation telemetry: one JSON object per line, appended as events happen.
//
// Recording never fails the caller. Write errors are logged at debug level and
// the entry is still returned.

use crate::models::TelemetryConfig;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

/// Setting this to `1`, `true` or `yes` turns recording off.
pub const ENV_TELEMETRY_DISABLED: &str = "MDF_TELEMETRY_DISABLED";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEntry {
    /// UTC, second precision, `Z` suffix
    pub timestamp: String,
    pub event: String,
    pub details: Map<String, Value>,
}

pub struct TelemetryRecorder {
    path: Utf8PathBuf,
    enabled: bool,
    // Serializes appends from the GUI thread and the focus retry thread
    write_lock: Mutex<()>,
}

impl TelemetryRecorder {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            path: config.path.clone(),
            enabled: config.enabled && !disabled_by_env(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn disabled() -> Self {
        Self {
            path: Utf8PathBuf::new(),
            enabled: false,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&self, event: &str) -> TelemetryEntry {
        self.record_event(event, Map::new())
    }

    pub fn record_event(&self, event: &str, details: Map<String, Value>) -> TelemetryEntry {
        let entry = TelemetryEntry {
            timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            event: event.to_string(),
            details,
        };
        if self.enabled
            && let Err(e) = self.append(&entry)
        {
            tracing::debug!("Telemetry event '{}' not persisted: {}", event, e);
        }
        entry
    }

    fn append(&self, entry: &TelemetryEntry) -> io::Result<()> {
        let line = serde_json::to_string(entry)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = self.path.parent()
            && !parent.as_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)
    }
}

fn disabled_by_env() -> bool {
    std::env::var(ENV_TELEMETRY_DISABLED)
        .map(|value| matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Build a details map from key/value pairs.
pub fn details<I, K>(pairs: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_events_appended_as_jsonl() {
        let dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("nested/telemetry.jsonl")).unwrap();
        let recorder = TelemetryRecorder::new(&TelemetryConfig {
            enabled: true,
            path: path.clone(),
        });
        if !recorder.is_enabled() {
            // MDF_TELEMETRY_DISABLED is set in this environment
            return;
        }

        recorder.record("automation_started");
        let entry = recorder.record_event(
            "automation_finished",
            details([("exit_code", json!(3))]),
        );
        assert!(entry.timestamp.ends_with('Z'));
        assert_eq!(entry.timestamp.len(), "2024-01-01T00:00:00Z".len());

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<TelemetryEntry> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].event, "automation_started");
        assert!(lines[0].details.is_empty());
        assert_eq!(lines[1].details["exit_code"], json!(3));
    }

    #[test]
    fn test_disabled_recorder_returns_entry_without_writing() {
        let dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("telemetry.jsonl")).unwrap();
        let recorder = TelemetryRecorder::new(&TelemetryConfig {
            enabled: false,
            path: path.clone(),
        });

        let entry = recorder.record("focus_failure");
        assert_eq!(entry.event, "focus_failure");
        assert!(!path.exists());
    }

    #[test]
    fn test_unwritable_destination_is_swallowed() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let recorder = TelemetryRecorder::new(&TelemetryConfig {
            enabled: true,
            path,
        });
        assert_eq!(recorder.record("focus_ready").event, "focus_ready");
    }
}
