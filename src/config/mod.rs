//! Configuration models for worker pools.

pub mod pool;

pub use pool::{Backpressure, WorkerPoolConfig};
