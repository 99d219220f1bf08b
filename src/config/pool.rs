//! Worker pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Behaviour of `submit` when the queue is at capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backpressure {
    /// Suspend the submitting thread until space frees or the pool stops.
    #[default]
    Block,
    /// Fail immediately with `PoolError::Rejected(QueueFull)`.
    Reject,
}

impl std::str::FromStr for Backpressure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown backpressure policy `{other}`")),
        }
    }
}

/// Worker pool configuration.
///
/// `worker_count == max_workers` gives a fixed pool; a larger `max_workers`
/// together with `idle_timeout_ms` gives a cached pool whose extra workers
/// retire after sitting idle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Core workers, started eagerly and never retired.
    pub worker_count: usize,
    /// Upper bound on live workers.
    pub max_workers: usize,
    /// Maximum queued tasks.
    pub queue_capacity: usize,
    /// Full-queue policy.
    pub backpressure: Backpressure,
    /// Idle time after which workers beyond `worker_count` exit.
    pub idle_timeout_ms: Option<u64>,
    /// Worker threads are named `{prefix}-{n}`.
    pub thread_name_prefix: String,
    /// Stack size for worker threads, in bytes.
    pub thread_stack_size: usize,
}

const DEFAULT_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        let workers = num_cpus::get().max(1);
        Self {
            worker_count: workers,
            max_workers: workers,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            backpressure: Backpressure::Block,
            idle_timeout_ms: None,
            thread_name_prefix: "pool-worker".into(),
            thread_stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl WorkerPoolConfig {
    /// Defaults: one worker per CPU, fixed size, blocking backpressure.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed pool of `workers` threads over a queue of `queue_capacity`.
    #[must_use]
    pub fn fixed(workers: usize, queue_capacity: usize) -> Self {
        Self::new()
            .with_worker_count(workers)
            .with_queue_capacity(queue_capacity)
    }

    /// Growable pool: `core` workers always alive, up to `max` under load.
    #[must_use]
    pub fn cached(core: usize, max: usize, idle_timeout: Duration) -> Self {
        Self {
            worker_count: core,
            max_workers: max,
            idle_timeout_ms: Some(u64::try_from(idle_timeout.as_millis()).unwrap_or(u64::MAX)),
            ..Self::default()
        }
    }

    /// One worker: tasks run sequentially in submission order.
    #[must_use]
    pub fn single_thread(queue_capacity: usize) -> Self {
        Self::fixed(1, queue_capacity)
    }

    /// Set the worker count for a fixed pool (also sets `max_workers`).
    #[must_use]
    pub const fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self.max_workers = workers;
        self
    }

    /// Raise the live-worker ceiling above the core count.
    #[must_use]
    pub const fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    /// Set queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the full-queue policy.
    #[must_use]
    pub const fn with_backpressure(mut self, backpressure: Backpressure) -> Self {
        self.backpressure = backpressure;
        self
    }

    /// Set the idle timeout for non-core workers.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Idle timeout as a `Duration`.
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    /// Whether the pool may grow beyond its core workers.
    #[must_use]
    pub const fn is_cached(&self) -> bool {
        self.max_workers > self.worker_count
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// A human-readable description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_workers == 0 {
            return Err("max_workers must be greater than 0".into());
        }
        if self.worker_count > self.max_workers {
            return Err(format!(
                "worker_count ({}) must not exceed max_workers ({})",
                self.worker_count, self.max_workers
            ));
        }
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be greater than 0".into());
        }
        if self.is_cached() && !matches!(self.idle_timeout_ms, Some(ms) if ms > 0) {
            return Err("idle_timeout_ms must be set and non-zero when max_workers > worker_count".into());
        }
        if self.thread_name_prefix.is_empty() {
            return Err("thread_name_prefix must not be empty".into());
        }
        if self.thread_stack_size == 0 {
            return Err("thread_stack_size must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// Parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from `WORKER_POOL_*` environment variables, reading a
    /// `.env` file first if one exists. Unset variables keep their defaults.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `WORKER_POOL_WORKERS` | `worker_count` (and `max_workers` unless set) |
    /// | `WORKER_POOL_MAX_WORKERS` | `max_workers` |
    /// | `WORKER_POOL_QUEUE_CAPACITY` | `queue_capacity` |
    /// | `WORKER_POOL_BACKPRESSURE` | `backpressure` (`block` / `reject`) |
    /// | `WORKER_POOL_IDLE_TIMEOUT_MS` | `idle_timeout_ms` |
    /// | `WORKER_POOL_THREAD_PREFIX` | `thread_name_prefix` |
    ///
    /// # Errors
    ///
    /// Unparseable values or a configuration that fails validation.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// As for [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, String>
        where
            T::Err: std::fmt::Display,
        {
            raw.trim()
                .parse()
                .map_err(|e| format!("{key}: invalid value `{raw}`: {e}"))
        }

        let mut cfg = Self::default();
        if let Some(raw) = lookup("WORKER_POOL_WORKERS") {
            cfg = cfg.with_worker_count(parse("WORKER_POOL_WORKERS", &raw)?);
        }
        if let Some(raw) = lookup("WORKER_POOL_MAX_WORKERS") {
            cfg.max_workers = parse("WORKER_POOL_MAX_WORKERS", &raw)?;
        }
        if let Some(raw) = lookup("WORKER_POOL_QUEUE_CAPACITY") {
            cfg.queue_capacity = parse("WORKER_POOL_QUEUE_CAPACITY", &raw)?;
        }
        if let Some(raw) = lookup("WORKER_POOL_BACKPRESSURE") {
            cfg.backpressure = parse("WORKER_POOL_BACKPRESSURE", &raw)?;
        }
        if let Some(raw) = lookup("WORKER_POOL_IDLE_TIMEOUT_MS") {
            cfg.idle_timeout_ms = Some(parse("WORKER_POOL_IDLE_TIMEOUT_MS", &raw)?);
        }
        if let Some(raw) = lookup("WORKER_POOL_THREAD_PREFIX") {
            cfg.thread_name_prefix = raw;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}
