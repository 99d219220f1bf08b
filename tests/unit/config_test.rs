//! Tests for configuration validation

use prometheus_worker_pool::config::{Backpressure, WorkerPoolConfig};
use std::collections::HashMap;
use std::time::Duration;

#[test]
fn test_fixed_config_validation() {
    let valid = WorkerPoolConfig::fixed(4, 100);
    assert!(valid.validate().is_ok());
    assert_eq!(valid.max_workers, 4);
    assert!(!valid.is_cached());
}

#[test]
fn test_invalid_queue_capacity() {
    assert!(WorkerPoolConfig::fixed(4, 0).validate().is_err());
}

#[test]
fn test_invalid_worker_counts() {
    assert!(WorkerPoolConfig::fixed(0, 10).validate().is_err());
    let inverted = WorkerPoolConfig::fixed(4, 10).with_max_workers(2);
    assert!(inverted.validate().is_err());
}

#[test]
fn test_cached_requires_idle_timeout() {
    let cached = WorkerPoolConfig::cached(1, 8, Duration::from_secs(60));
    assert!(cached.validate().is_ok());
    assert!(cached.is_cached());
    assert_eq!(cached.idle_timeout(), Some(Duration::from_secs(60)));

    let missing = WorkerPoolConfig::fixed(1, 10).with_max_workers(8);
    assert!(missing.validate().is_err());
}

#[test]
fn test_json_round_trip_with_defaults() {
    let cfg = WorkerPoolConfig::from_json_str(
        r#"{"worker_count": 2, "max_workers": 2, "queue_capacity": 16, "backpressure": "reject"}"#,
    )
    .unwrap();
    assert_eq!(cfg.worker_count, 2);
    assert_eq!(cfg.queue_capacity, 16);
    assert_eq!(cfg.backpressure, Backpressure::Reject);
    assert_eq!(cfg.thread_name_prefix, WorkerPoolConfig::default().thread_name_prefix);

    let json = serde_json::to_string(&cfg).unwrap();
    let back: WorkerPoolConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, cfg);

    assert!(WorkerPoolConfig::from_json_str(r#"{"queue_capacity": 0}"#).is_err());
    assert!(WorkerPoolConfig::from_json_str("not json").is_err());
}

#[test]
fn test_env_lookup() {
    let vars: HashMap<&str, &str> = [
        ("WORKER_POOL_WORKERS", "2"),
        ("WORKER_POOL_MAX_WORKERS", "6"),
        ("WORKER_POOL_QUEUE_CAPACITY", "32"),
        ("WORKER_POOL_BACKPRESSURE", "Reject"),
        ("WORKER_POOL_IDLE_TIMEOUT_MS", "250"),
        ("WORKER_POOL_THREAD_PREFIX", "ingest"),
    ]
    .into_iter()
    .collect();

    let cfg = WorkerPoolConfig::from_lookup(|key| vars.get(key).map(|v| (*v).to_string())).unwrap();
    assert_eq!(cfg.worker_count, 2);
    assert_eq!(cfg.max_workers, 6);
    assert_eq!(cfg.queue_capacity, 32);
    assert_eq!(cfg.backpressure, Backpressure::Reject);
    assert_eq!(cfg.idle_timeout(), Some(Duration::from_millis(250)));
    assert_eq!(cfg.thread_name_prefix, "ingest");
}

#[test]
fn test_env_lookup_rejects_garbage() {
    let err = WorkerPoolConfig::from_lookup(|key| {
        (key == "WORKER_POOL_QUEUE_CAPACITY").then(|| "lots".to_string())
    })
    .unwrap_err();
    assert!(err.contains("WORKER_POOL_QUEUE_CAPACITY"));
}
