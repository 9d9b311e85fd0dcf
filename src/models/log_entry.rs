use chrono::{Local, NaiveDateTime, NaiveTime};
use regex::Regex;
use std::sync::LazyLock;

/// Worker log convention: `[AutoMDF][LEVEL][HH:MM:SS] body`, with the tag and
/// the time both optional.
static LOG_LINE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:\[AutoMDF\])?\[(?P<level>[A-Z]+)\](?:\[(?P<time>\d{2}:\d{2}:\d{2})\])?\s*(?P<body>.*)$",
    )
    .expect("Invalid log line regex")
});

/// One parsed line of worker output.
///
/// Created by the log sink when a line arrives and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: NaiveDateTime,
    pub level: String,
    pub message: String,
    /// The line exactly as the worker printed it
    pub raw: String,
    /// `[HH:MM:SS] [LEVEL] message`, used by the log view
    pub display: String,
}

impl LogEntry {
    /// Parse a raw worker line, stamping untimed lines with the current local time.
    pub fn parse(raw_line: &str) -> Self {
        Self::parse_at(raw_line, Local::now().naive_local())
    }

    /// Parse a raw worker line relative to `now`.
    ///
    /// Lines that do not follow the convention become INFO entries at `now`.
    pub fn parse_at(raw_line: &str, now: NaiveDateTime) -> Self {
        let (level, timestamp, message) = match LOG_LINE_PATTERN.captures(raw_line) {
            Some(caps) => {
                let level = caps["level"].to_string();
                let timestamp = caps
                    .name("time")
                    .and_then(|t| NaiveTime::parse_from_str(t.as_str(), "%H:%M:%S").ok())
                    .map(|time| now.date().and_time(time))
                    .unwrap_or(now);
                (level, timestamp, caps["body"].trim().to_string())
            }
            None => ("INFO".to_string(), now, raw_line.trim().to_string()),
        };

        let display = format!("[{}] [{}] {}", timestamp.format("%H:%M:%S"), level, message);

        Self {
            timestamp,
            level,
            message,
            raw: raw_line.to_string(),
            display,
        }
    }

    /// Persisted form: `[LEVEL][HH:MM:SS] message`
    pub fn formatted(&self) -> String {
        format!(
            "[{}][{}] {}",
            self.level,
            self.timestamp.format("%H:%M:%S"),
            self.message
        )
    }

    pub fn is_warning(&self) -> bool {
        matches!(self.level.as_str(), "WARN" | "WARNING")
    }

    pub fn is_error(&self) -> bool {
        matches!(self.level.as_str(), "ERROR" | "CRITICAL" | "FATAL")
    }
}
