//! Tests for error types

use prometheus_worker_pool::core::{Cancelled, PoolError, RejectReason, TaskError};

#[test]
fn test_rejected_error() {
    let err = PoolError::Rejected(RejectReason::QueueFull);
    assert_eq!(format!("{}", err), "task rejected: queue is full");
    assert!(err.is_rejected());

    let err = PoolError::Rejected(RejectReason::Shutdown);
    assert_eq!(format!("{}", err), "task rejected: pool is not running");
}

#[test]
fn test_timeout_error() {
    let err = PoolError::Timeout;
    assert_eq!(format!("{}", err), "operation timed out");
    assert!(!err.is_rejected());
}

#[test]
fn test_invalid_config_error() {
    let err = PoolError::InvalidConfig("queue_capacity must be greater than 0".to_string());
    assert_eq!(
        format!("{}", err),
        "invalid configuration: queue_capacity must be greater than 0"
    );
}

#[test]
fn test_task_failed_error_is_cloneable() {
    let err = PoolError::TaskFailed(TaskError::from_error(anyhow::anyhow!("connection failed")));
    let copy = err.clone();
    assert_eq!(format!("{}", copy), "task failed: connection failed");
}

#[test]
fn test_cancelled_marker_survives_anyhow() {
    let err: anyhow::Error = Cancelled.into();
    assert!(err.is::<Cancelled>());
}

#[test]
fn test_reject_reason_serde() {
    let json = serde_json::to_string(&RejectReason::QueueFull).unwrap();
    assert_eq!(json, "\"queue_full\"");
    let back: RejectReason = serde_json::from_str(&json).unwrap();
    assert_eq!(back, RejectReason::QueueFull);
}
