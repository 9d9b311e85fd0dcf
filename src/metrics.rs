// Run metrics
//
// Lock-free counters for worker runs, bridge traffic, log persistence and focus
// recovery. Summarized in the diagnostics log on shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct Metrics {
    /// Worker processes started
    pub runs_started: AtomicU64,

    /// Runs that ended with a non-zero exit code (spawn failures included)
    pub runs_failed: AtomicU64,

    /// Total worker wall time in milliseconds
    pub total_run_time_ms: AtomicU64,

    /// Dialog requests received from workers
    pub bridge_requests: AtomicU64,

    /// Bridge lines whose payload could not be decoded
    pub protocol_errors: AtomicU64,

    /// Dialogs answered with CANCEL
    pub dialogs_cancelled: AtomicU64,

    /// Worker output lines handed to the log sink
    pub lines_logged: AtomicU64,

    /// Lines discarded because the sink backlog was full
    pub lines_dropped: AtomicU64,

    pub focus_attempts: AtomicU64,
    pub focus_failures: AtomicU64,

    /// Events dropped because the GUI relay queue was full
    pub ui_channel_full: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            total_run_time_ms: AtomicU64::new(0),
            bridge_requests: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            dialogs_cancelled: AtomicU64::new(0),
            lines_logged: AtomicU64::new(0),
            lines_dropped: AtomicU64::new(0),
            focus_attempts: AtomicU64::new(0),
            focus_failures: AtomicU64::new(0),
            ui_channel_full: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished run and how long it took
    pub fn record_run_finished(&self, exit_code: i32, duration: Duration) {
        if exit_code != 0 {
            self.runs_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_run_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_bridge_request(&self) {
        self.bridge_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dialog_cancelled(&self) {
        self.dialogs_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_line_logged(&self) {
        self.lines_logged.fetch_add(1, Ordering::Relaxed);
    }

    /// Lines dropped is a running total reported by the sink, not a delta
    pub fn set_lines_dropped(&self, total: u64) {
        self.lines_dropped.fetch_max(total, Ordering::Relaxed);
    }

    pub fn record_focus_attempt(&self, focused: bool) {
        self.focus_attempts.fetch_add(1, Ordering::Relaxed);
        if !focused {
            self.focus_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_ui_channel_full(&self) {
        self.ui_channel_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average worker run time in milliseconds
    pub fn avg_run_time_ms(&self) -> f64 {
        let total = self.total_run_time_ms.load(Ordering::Relaxed);
        let count = self.runs_started.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("=== Run Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Runs: {} started, {} failed (avg {:.0}ms)",
            self.runs_started.load(Ordering::Relaxed),
            self.runs_failed.load(Ordering::Relaxed),
            self.avg_run_time_ms()
        );
        tracing::info!(
            "Bridge: {} requests, {} protocol errors, {} cancelled",
            self.bridge_requests.load(Ordering::Relaxed),
            self.protocol_errors.load(Ordering::Relaxed),
            self.dialogs_cancelled.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Log lines: {} logged, {} dropped",
            self.lines_logged.load(Ordering::Relaxed),
            self.lines_dropped.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Focus: {} attempts, {} failures; UI channel full: {}",
            self.focus_attempts.load(Ordering::Relaxed),
            self.focus_failures.load(Ordering::Relaxed),
            self.ui_channel_full.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
