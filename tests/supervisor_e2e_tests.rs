//! End-to-end tests for the process supervisor
//!
//! These tests drive the `mdf-demo-worker` binary through a real
//! supervisor and verify that:
//! - Dialog requests surface as events and answers reach the worker
//! - Malformed bridge lines are acknowledged instead of hanging the worker
//! - Stopping a worker cancels its pending request
//! - Exit codes are reported exactly once

use automdf::models::LogSinkConfig;
use automdf::services::bridge::{BridgeResponse, RequestKind};
use automdf::services::log_sink::AsyncLogSink;
use automdf::services::supervisor::{
    PendingRequest, ProcessSupervisor, SupervisorConfig, SupervisorEvent, WorkerState,
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::time::{Duration, timeout};

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

fn worker_path() -> Utf8PathBuf {
    Utf8PathBuf::from(env!("CARGO_BIN_EXE_mdf-demo-worker"))
}

fn utf8(dir: &TempDir) -> &Utf8Path {
    Utf8Path::from_path(dir.path()).expect("temp dir should be UTF-8")
}

fn supervisor_in(dir: &TempDir) -> (ProcessSupervisor, Arc<AsyncLogSink>) {
    let sink = Arc::new(AsyncLogSink::new(LogSinkConfig {
        logs_dir: utf8(dir).join("runs"),
        flush_interval_ms: 20,
        ..Default::default()
    }));
    let config = SupervisorConfig {
        progress_file: Some(utf8(dir).join("progress.json")),
        stop_grace: Duration::from_millis(500),
        ..Default::default()
    };
    let supervisor = ProcessSupervisor::new(config, Arc::clone(&sink), Handle::current());
    (supervisor, sink)
}

fn scenario(name: &str) -> IndexMap<String, String> {
    let mut env = IndexMap::new();
    env.insert("MDF_DEMO_SCENARIO".to_string(), name.to_string());
    env
}

async fn next_event(rx: &mut broadcast::Receiver<SupervisorEvent>) -> SupervisorEvent {
    timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("Timeout waiting for supervisor event")
        .expect("Supervisor channel closed")
}

async fn next_request(rx: &mut broadcast::Receiver<SupervisorEvent>) -> PendingRequest {
    loop {
        match next_event(rx).await {
            SupervisorEvent::BridgeRequest(pending) => return pending,
            SupervisorEvent::Finished { exit_code } => {
                panic!("Worker exited with {} before asking anything", exit_code)
            }
            _ => {}
        }
    }
}

/// Collect message texts until the worker finishes.
async fn run_to_end(rx: &mut broadcast::Receiver<SupervisorEvent>) -> (Vec<String>, i32) {
    let mut lines = Vec::new();
    loop {
        match next_event(rx).await {
            SupervisorEvent::Line(entry) => lines.push(entry.message),
            SupervisorEvent::Finished { exit_code } => return (lines, exit_code),
            _ => {}
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_prompt_answer_reaches_worker() {
    let dir = TempDir::new().unwrap();
    let (supervisor, _sink) = supervisor_in(&dir);
    let mut rx = supervisor.subscribe();

    assert!(supervisor.start(&worker_path(), &scenario("prompt")));

    let pending = next_request(&mut rx).await;
    assert_eq!(pending.request.kind, RequestKind::Prompt);
    assert_eq!(pending.request.text, "Enter code");
    assert!(pending.request.require_input);
    assert!(supervisor.has_pending_request());

    assert!(pending.responder.resolve(BridgeResponse::Value("42".to_string())));

    let (lines, exit_code) = run_to_end(&mut rx).await;
    assert_eq!(exit_code, 0);
    assert!(lines.iter().any(|l| l == "answer: 42"), "lines: {:?}", lines);
    assert_eq!(supervisor.state(), WorkerState::Terminated(0));
    assert!(!supervisor.has_pending_request());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_prompt_is_reported_by_worker() {
    let dir = TempDir::new().unwrap();
    let (supervisor, _sink) = supervisor_in(&dir);
    let mut rx = supervisor.subscribe();

    assert!(supervisor.start(&worker_path(), &scenario("prompt")));
    let pending = next_request(&mut rx).await;
    assert!(pending.responder.resolve(BridgeResponse::Cancel));

    let (lines, exit_code) = run_to_end(&mut rx).await;
    assert_eq!(exit_code, 2);
    assert!(lines.iter().any(|l| l == "prompt cancelled"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_request_is_acknowledged() {
    let dir = TempDir::new().unwrap();
    let (supervisor, _sink) = supervisor_in(&dir);
    let mut rx = supervisor.subscribe();

    assert!(supervisor.start(&worker_path(), &scenario("malformed")));

    let mut warned = false;
    let mut lines = Vec::new();
    let exit_code = loop {
        match next_event(&mut rx).await {
            SupervisorEvent::ProtocolWarning(_) => warned = true,
            SupervisorEvent::Line(entry) => lines.push(entry.message),
            SupervisorEvent::BridgeRequest(_) => panic!("Malformed line must not become a request"),
            SupervisorEvent::Finished { exit_code } => break exit_code,
            SupervisorEvent::Started { .. } => {}
        }
    };

    assert!(warned, "Expected a protocol warning");
    assert_eq!(exit_code, 0);
    assert!(lines.iter().any(|l| l == "response: ack"), "lines: {:?}", lines);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_cancels_pending_request_and_terminates() {
    let dir = TempDir::new().unwrap();
    let (supervisor, _sink) = supervisor_in(&dir);
    let mut rx = supervisor.subscribe();

    assert!(supervisor.start(&worker_path(), &scenario("wait")));
    let pending = next_request(&mut rx).await;

    supervisor.stop();
    assert!(pending.responder.is_resolved());
    assert!(
        !pending.responder.resolve(BridgeResponse::Value("late".to_string())),
        "A stopped request must not accept a second answer"
    );

    assert!(supervisor.wait_for_exit(EVENT_TIMEOUT).await);
    assert!(matches!(supervisor.state(), WorkerState::Terminated(_)));
    assert!(!supervisor.has_pending_request());

    // Stopping again is a no-op
    supervisor.stop();
    assert!(matches!(supervisor.state(), WorkerState::Terminated(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_start_is_refused_while_running() {
    let dir = TempDir::new().unwrap();
    let (supervisor, _sink) = supervisor_in(&dir);
    let mut rx = supervisor.subscribe();

    assert!(supervisor.start(&worker_path(), &scenario("wait")));
    let _pending = next_request(&mut rx).await;

    assert!(supervisor.is_running());
    assert!(!supervisor.start(&worker_path(), &scenario("prompt")));

    supervisor.stop();
    assert!(supervisor.wait_for_exit(EVENT_TIMEOUT).await);

    // Once terminated the supervisor accepts a new run
    assert!(supervisor.start(&worker_path(), &scenario("exit:0")));
    assert!(supervisor.wait_for_exit(EVENT_TIMEOUT).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_exit_code_is_reported_once() {
    let dir = TempDir::new().unwrap();
    let (supervisor, _sink) = supervisor_in(&dir);
    let mut rx = supervisor.subscribe();

    assert!(supervisor.start(&worker_path(), &scenario("exit:3")));
    let (lines, exit_code) = run_to_end(&mut rx).await;

    assert_eq!(exit_code, 3);
    assert!(lines.iter().any(|l| l == "exiting with 3"));
    assert_eq!(supervisor.state(), WorkerState::Terminated(3));

    // No second Finished may follow
    tokio::time::sleep(Duration::from_millis(200)).await;
    loop {
        match rx.try_recv() {
            Ok(SupervisorEvent::Finished { .. }) => panic!("Finished reported twice"),
            Ok(_) => continue,
            Err(_) => break,
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lines_arrive_in_order_and_reach_sink() {
    let dir = TempDir::new().unwrap();
    let (supervisor, sink) = supervisor_in(&dir);
    let mut rx = supervisor.subscribe();

    let target = sink.start_session("ordering").unwrap();
    assert!(supervisor.start(&worker_path(), &scenario("lines:200")));
    let (lines, exit_code) = run_to_end(&mut rx).await;
    assert_eq!(exit_code, 0);

    let expected: Vec<String> = (0..200).map(|i| format!("line {}", i)).collect();
    assert_eq!(lines, expected);

    assert!(sink.flush(Duration::from_secs(5)));
    let persisted = std::fs::read_to_string(&target).unwrap();
    let numbered: Vec<&str> = persisted
        .lines()
        .filter(|l| l.contains("line "))
        .collect();
    assert_eq!(numbered.len(), 200);
    assert!(numbered[0].ends_with("line 0"));
    assert!(numbered[199].ends_with("line 199"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_progress_file_is_passed_to_worker() {
    let dir = TempDir::new().unwrap();
    let (supervisor, _sink) = supervisor_in(&dir);
    let mut rx = supervisor.subscribe();

    // The tour writes progress before its first dialog
    assert!(supervisor.start(&worker_path(), &scenario("tour")));
    let pending = next_request(&mut rx).await;
    assert!(utf8(&dir).join("progress.json").exists());

    supervisor.stop();
    assert!(pending.responder.is_resolved());
    assert!(supervisor.wait_for_exit(EVENT_TIMEOUT).await);
}
