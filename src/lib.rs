//! # Prometheus Worker Pool
//!
//! A bounded thread pool with futures-style result handles, cooperative
//! cancellation, delayed and periodic scheduling and a divide-and-conquer
//! helper.
//!
//! Tasks run on dedicated OS threads pulled from one FIFO queue. When the
//! queue is full a submission either blocks or is rejected, depending on the
//! pool's [`Backpressure`](config::Backpressure) policy.
//!
//! ## Key Features
//!
//! - **Fixed and cached pools**: eager core workers, optional growth up to a
//!   ceiling with idle retirement
//! - **Result handles**: `get`, `get_timeout`, `cancel`, completion listeners
//!   and an async `get_async` (feature `tokio-runtime`)
//! - **Cooperative cancellation**: task bodies poll `ctx.checkpoint()?`
//! - **Scheduling**: one-shot, fixed-rate and fixed-delay entries
//! - **Fork/join**: split on the caller, run the leaves, combine
//! - **Two-phase shutdown**: `shutdown`, `shutdown_now`, `await_termination`
//!
//! ## Example
//!
//! ```rust,no_run
//! use prometheus_worker_pool::builders::WorkerPoolBuilder;
//! use prometheus_worker_pool::config::Backpressure;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), prometheus_worker_pool::core::PoolError> {
//! prometheus_worker_pool::util::init_tracing();
//!
//! let pool = WorkerPoolBuilder::new()
//!     .worker_count(4)
//!     .queue_capacity(128)
//!     .backpressure(Backpressure::Reject)
//!     .on_rejected(|task_id, reason| eprintln!("task {task_id} rejected: {reason}"))
//!     .build()?;
//!
//! let handle = pool.submit(|ctx| {
//!     let mut acc = 0u64;
//!     for i in 0..1_000u64 {
//!         ctx.checkpoint()?;
//!         acc += i;
//!     }
//!     Ok(acc)
//! })?;
//! assert_eq!(handle.get_timeout(Duration::from_secs(5))?, 499_500);
//!
//! pool.close(Duration::from_secs(5));
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Pool machinery: queue, workers, handles, scheduler and fork/join.
pub mod core;
/// Configuration models for worker pools.
pub mod config;
/// Builders to construct pools from configuration.
pub mod builders;
/// Shared utilities.
pub mod util;
