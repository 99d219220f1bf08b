//! Tests for utility functions

use prometheus_worker_pool::util::{short_id, PoolState, TaskState};

#[test]
fn test_pool_state_ordering() {
    assert!(PoolState::Created < PoolState::Running);
    assert!(PoolState::Running < PoolState::ShuttingDown);
    assert!(PoolState::ShuttingDown < PoolState::Terminated);
}

#[test]
fn test_task_state_terminal() {
    assert!(!TaskState::Pending.is_terminal());
    assert!(!TaskState::Running.is_terminal());
    assert!(TaskState::Completed.is_terminal());
    assert!(TaskState::Failed.is_terminal());
    assert!(TaskState::Cancelled.is_terminal());
}

#[test]
fn test_state_serde() {
    assert_eq!(
        serde_json::to_string(&PoolState::ShuttingDown).unwrap(),
        "\"shutting_down\""
    );
    let state: TaskState = serde_json::from_str("\"cancelled\"").unwrap();
    assert_eq!(state, TaskState::Cancelled);
}

#[test]
fn test_short_id() {
    let id = uuid::Uuid::new_v4();
    let short = short_id(&id);
    assert_eq!(short.len(), 8);
    assert!(id.simple().to_string().starts_with(&short));
}
