//! Tests for builder modules

use prometheus_worker_pool::builders::WorkerPoolBuilder;
use prometheus_worker_pool::config::{Backpressure, WorkerPoolConfig};
use prometheus_worker_pool::core::PoolError;
use std::time::Duration;

#[test]
fn test_pool_builder_defaults() {
    let builder = WorkerPoolBuilder::new();
    assert_eq!(builder.config(), &WorkerPoolConfig::default());
}

#[test]
fn test_pool_builder_settings() {
    let builder = WorkerPoolBuilder::new()
        .worker_count(2)
        .max_workers(5)
        .idle_timeout(Duration::from_millis(500))
        .queue_capacity(64)
        .backpressure(Backpressure::Reject)
        .thread_name_prefix("render")
        .thread_stack_size(512 * 1024);

    let cfg = builder.config();
    assert_eq!(cfg.worker_count, 2);
    assert_eq!(cfg.max_workers, 5);
    assert_eq!(cfg.queue_capacity, 64);
    assert_eq!(cfg.backpressure, Backpressure::Reject);
    assert_eq!(cfg.thread_name_prefix, "render");
    assert_eq!(cfg.thread_stack_size, 512 * 1024);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_pool_builder_build() {
    let pool = WorkerPoolBuilder::from_config(WorkerPoolConfig::fixed(2, 8))
        .thread_name_prefix("unit")
        .build()
        .unwrap();
    let name = pool
        .submit(|_| Ok(std::thread::current().name().map(str::to_string)))
        .unwrap()
        .get()
        .unwrap();
    assert!(name.unwrap().starts_with("unit-"));
    assert!(pool.close(Duration::from_secs(5)));
}

#[test]
fn test_pool_builder_rejects_invalid_config() {
    let err = WorkerPoolBuilder::new().queue_capacity(0).build().unwrap_err();
    assert!(matches!(err, PoolError::InvalidConfig(_)));
}
