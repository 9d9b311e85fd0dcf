//! Integration tests for StateManager with state change events
//!
//! These tests verify that the StateManager correctly:
//! - Emits state change events on mutations
//! - Supports multiple subscribers
//! - Handles concurrent access from multiple threads
//! - Walks a full run lifecycle without losing events

use automdf::services::supervisor::WorkerState;
use automdf::{StateChange, StateManager};
use camino::Utf8PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{Duration, timeout};

async fn drain(rx: &mut broadcast::Receiver<StateChange>) -> Vec<StateChange> {
    let mut events = Vec::new();
    while let Ok(Ok(event)) = timeout(Duration::from_millis(50), rx.recv()).await {
        events.push(event);
    }
    events
}

fn scripts() -> Vec<Utf8PathBuf> {
    vec![
        Utf8PathBuf::from("scripts/import_orders.py"),
        Utf8PathBuf::from("scripts/export_invoices.py"),
    ]
}

#[tokio::test]
async fn test_state_change_events_emitted() {
    let state = Arc::new(StateManager::new());
    let mut rx = state.subscribe();

    state.set_scripts(scripts());

    let event = timeout(Duration::from_millis(100), rx.recv())
        .await
        .expect("Timeout waiting for event")
        .expect("Channel closed");

    assert!(
        matches!(event, StateChange::ScriptsChanged { count: 2 }),
        "Expected ScriptsChanged event, got: {:?}",
        event
    );
}

#[tokio::test]
async fn test_multiple_subscribers_receive_events() {
    let state = Arc::new(StateManager::new());
    let mut rx1 = state.subscribe();
    let mut rx2 = state.subscribe();
    let mut rx3 = state.subscribe();

    state.set_status("Working");

    for rx in [&mut rx1, &mut rx2, &mut rx3] {
        let event = timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("Timeout")
            .expect("Channel closed");
        assert_eq!(event, StateChange::StatusChanged("Working".to_string()));
    }
}

#[tokio::test]
async fn test_selection_follows_catalogue() {
    let state = StateManager::new();
    let mut rx = state.subscribe();

    state.set_scripts(scripts());
    let events = drain(&mut rx).await;
    assert!(events.contains(&StateChange::SelectionChanged {
        script: Some(Utf8PathBuf::from("scripts/import_orders.py")),
        can_start: true,
    }));

    state.select_script(Some(Utf8PathBuf::from("scripts/export_invoices.py")));
    let _ = drain(&mut rx).await;

    // Reordered catalogue that still contains the selection keeps it
    let mut reordered = scripts();
    reordered.reverse();
    state.set_scripts(reordered);
    assert_eq!(
        state.snapshot().selected_script,
        Some(Utf8PathBuf::from("scripts/export_invoices.py"))
    );

    // An empty catalogue clears it and disables Run
    state.set_scripts(Vec::new());
    let snapshot = state.snapshot();
    assert_eq!(snapshot.selected_script, None);
    assert!(!snapshot.can_start());
}

#[tokio::test]
async fn test_full_run_lifecycle() {
    let state = StateManager::new();
    state.set_scripts(scripts());
    let mut rx = state.subscribe();

    let script = Utf8PathBuf::from("scripts/import_orders.py");
    let target = Utf8PathBuf::from("logs/runs/import_orders.log");
    state.begin_run(script.clone(), Some(target.clone()));
    state.set_worker_state(WorkerState::Running);
    state.set_progress(Some(40), "Reading shipment");
    state.finish_run(0);

    let events = drain(&mut rx).await;

    let started = events
        .iter()
        .position(|e| *e == StateChange::RunStarted { script: script.clone() })
        .expect("RunStarted missing");
    let finished = events
        .iter()
        .position(|e| {
            *e == StateChange::RunFinished {
                exit_code: 0,
                stopped_by_user: false,
            }
        })
        .expect("RunFinished missing");
    assert!(started < finished);
    assert!(events.contains(&StateChange::LogTargetChanged(Some(target))));
    assert!(events.contains(&StateChange::WorkerStateChanged(WorkerState::Running)));
    assert!(events.contains(&StateChange::ProgressUpdated {
        percent: Some(40),
        message: "Reading shipment".to_string(),
    }));

    let snapshot = state.snapshot();
    assert_eq!(snapshot.progress, Some(100));
    assert_eq!(snapshot.status_message, "Automation finished");
    assert!(snapshot.can_start());
}

#[tokio::test]
async fn test_stop_is_reported_as_user_stop() {
    let state = StateManager::new();
    state.set_scripts(scripts());
    state.begin_run(Utf8PathBuf::from("scripts/import_orders.py"), None);
    state.set_worker_state(WorkerState::Running);

    let mut rx = state.subscribe();
    state.request_stop();
    state.finish_run(143);

    let events = drain(&mut rx).await;
    assert!(events.contains(&StateChange::StatusChanged(
        "Stopping automation...".to_string()
    )));
    assert!(events.contains(&StateChange::RunFinished {
        exit_code: 143,
        stopped_by_user: true,
    }));
    assert_eq!(state.snapshot().status_message, "Automation stopped");
}

#[tokio::test]
async fn test_request_stop_when_idle_changes_nothing() {
    let state = StateManager::new();
    let changes = state.request_stop();
    assert!(changes.is_empty());
    assert!(!state.snapshot().stop_requested);
}

#[tokio::test]
async fn test_log_health_events() {
    let state = StateManager::new();
    let mut rx = state.subscribe();

    state.set_lines_dropped(12);
    state.set_lines_dropped(3);
    state.set_log_write_failed(true);

    let events = drain(&mut rx).await;
    assert_eq!(
        events,
        vec![
            StateChange::LogHealthChanged {
                write_failed: false,
                lines_dropped: 12,
            },
            StateChange::LogHealthChanged {
                write_failed: true,
                lines_dropped: 12,
            },
        ]
    );
}

#[test]
fn test_concurrent_updates_are_consistent() {
    let state = Arc::new(StateManager::new());
    let mut handles = Vec::new();

    for worker in 0..8u64 {
        let state = Arc::clone(&state);
        handles.push(std::thread::spawn(move || {
            for i in 0..100u64 {
                state.set_lines_dropped(worker * 100 + i);
                let _ = state.snapshot();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(state.snapshot().lines_dropped, 799);
}

#[test]
fn test_clones_share_state() {
    let state = StateManager::new();
    let clone = state.clone();
    let mut rx = state.subscribe();

    clone.set_target(3, 2, "  Orders portal ");

    let snapshot = state.snapshot();
    assert_eq!(snapshot.target_tab, 3);
    assert_eq!(snapshot.taskbar_slot, 2);
    assert_eq!(snapshot.window_hint, "Orders portal");
    assert_eq!(rx.try_recv().unwrap(), StateChange::TargetChanged);
}
