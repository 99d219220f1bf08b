//! Builder for [`WorkerPool`] combining serializable configuration with
//! hooks that cannot live in a config file.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{Backpressure, WorkerPoolConfig};
use crate::core::error::{PoolError, RejectReason};
use crate::core::worker_pool::{RejectionHandler, WorkerPool};
use crate::util::serde::TaskId;

/// Fluent builder for a [`WorkerPool`].
#[derive(Default)]
pub struct WorkerPoolBuilder {
    config: WorkerPoolConfig,
    on_rejected: Option<RejectionHandler>,
}

impl std::fmt::Debug for WorkerPoolBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPoolBuilder")
            .field("config", &self.config)
            .field("on_rejected", &self.on_rejected.is_some())
            .finish()
    }
}

impl WorkerPoolBuilder {
    /// Start from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration, e.g. one loaded with
    /// [`WorkerPoolConfig::from_env`].
    #[must_use]
    pub fn from_config(config: WorkerPoolConfig) -> Self {
        Self {
            config,
            on_rejected: None,
        }
    }

    /// Configuration as it stands.
    #[must_use]
    pub const fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Core worker count; also raises `max_workers` to match.
    #[must_use]
    pub fn worker_count(mut self, count: usize) -> Self {
        self.config = self.config.with_worker_count(count);
        self
    }

    /// Upper bound on workers for a cached pool.
    #[must_use]
    pub fn max_workers(mut self, max: usize) -> Self {
        self.config = self.config.with_max_workers(max);
        self
    }

    /// Queue capacity.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config = self.config.with_queue_capacity(capacity);
        self
    }

    /// Full-queue policy.
    #[must_use]
    pub fn backpressure(mut self, policy: Backpressure) -> Self {
        self.config = self.config.with_backpressure(policy);
        self
    }

    /// Idle time after which non-core workers exit.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_idle_timeout(timeout);
        self
    }

    /// Worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config = self.config.with_thread_name_prefix(prefix);
        self
    }

    /// Worker thread stack size in bytes.
    #[must_use]
    pub fn thread_stack_size(mut self, bytes: usize) -> Self {
        self.config = self.config.with_thread_stack_size(bytes);
        self
    }

    /// Callback run on the submitting thread for every rejected task.
    #[must_use]
    pub fn on_rejected<F>(mut self, handler: F) -> Self
    where
        F: Fn(TaskId, RejectReason) + Send + Sync + 'static,
    {
        self.on_rejected = Some(Arc::new(handler));
        self
    }

    /// Validate the configuration and start the pool.
    ///
    /// # Errors
    ///
    /// As for [`WorkerPool::new`].
    pub fn build(self) -> Result<WorkerPool, PoolError> {
        WorkerPool::with_rejection_handler(self.config, self.on_rejected)
    }
}
