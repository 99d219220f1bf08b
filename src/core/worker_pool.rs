//! Worker pool with dedicated OS threads, a bounded FIFO queue and a
//! delayed/periodic scheduler.
//!
//! # Key Features
//!
//! - **Fixed or cached**: `worker_count` threads start eagerly; cached pools
//!   grow up to `max_workers` on demand and retire idle extras
//! - **Backpressure**: a full queue either blocks the submitter or rejects
//! - **Result handles**: blocking, timed and async waits plus listeners
//! - **Two-phase shutdown**: graceful `shutdown`, forced `shutdown_now`
//!
//! # Example
//!
//! ```rust,no_run
//! use prometheus_worker_pool::config::WorkerPoolConfig;
//! use prometheus_worker_pool::core::WorkerPool;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), prometheus_worker_pool::core::PoolError> {
//! let pool = WorkerPool::new(WorkerPoolConfig::fixed(4, 256))?;
//! let handle = pool.submit(|_ctx| Ok(6 * 7))?;
//! assert_eq!(handle.get()?, 42);
//! pool.close(Duration::from_secs(5));
//! # Ok(())
//! # }
//! ```

pub(crate) mod inner;
mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::cancel::{CancelToken, TaskContext};
use crate::core::error::PoolError;
use crate::core::handle::{Outcome, ResultHandle};
use crate::core::queue::Job;
use crate::core::scheduler::{Cadence, ScheduledHandle, SchedulerCore};
use crate::config::WorkerPoolConfig;
use crate::util::serde::PoolState;

use self::inner::PoolInner;
pub use self::inner::RejectionHandler;

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Pool identifier (uuid v4).
    pub pool_id: String,

    /// Lifecycle state at snapshot time.
    pub state: PoolState,

    /// Core worker count.
    pub worker_count: usize,

    /// Upper bound on live workers.
    pub max_workers: usize,

    /// Worker threads currently alive.
    pub live_workers: usize,

    /// Live workers waiting for a job.
    pub idle_workers: usize,

    /// Currently executing tasks.
    pub active_tasks: usize,

    /// Tasks waiting in the queue.
    pub queued_tasks: usize,

    /// Queue capacity.
    pub queue_capacity: usize,

    /// Scheduled entries not yet due.
    pub scheduled_tasks: usize,

    /// Total tasks accepted into the queue.
    pub submitted_tasks: u64,

    /// Total tasks completed successfully.
    pub completed_tasks: u64,

    /// Total tasks that failed or panicked.
    pub failed_tasks: u64,

    /// Total tasks cancelled, before or during execution.
    pub cancelled_tasks: u64,

    /// Total submissions rejected.
    pub rejected_tasks: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub submitted_tasks: AtomicU64,
    pub completed_tasks: AtomicU64,
    pub failed_tasks: AtomicU64,
    pub cancelled_tasks: AtomicU64,
    pub rejected_tasks: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of the counters; gauges are filled in by the caller.
    pub fn snapshot(&self, worker_count: usize, max_workers: usize) -> PoolStats {
        PoolStats {
            worker_count,
            max_workers,
            submitted_tasks: self.submitted_tasks.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
            cancelled_tasks: self.cancelled_tasks.load(Ordering::Relaxed),
            rejected_tasks: self.rejected_tasks.load(Ordering::Relaxed),
            ..PoolStats::default()
        }
    }
}

/// A pool of worker threads executing submitted closures.
///
/// Dropping the pool triggers [`shutdown_now`](Self::shutdown_now) without
/// waiting for the workers; call [`close`](Self::close) to wait.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    scheduler: Mutex<SchedulerSlot>,
}

/// Lazily started scheduler. `closed` is set by the first shutdown so that no
/// dispatcher can start afterwards.
#[derive(Default)]
struct SchedulerSlot {
    core: Option<Arc<SchedulerCore>>,
    closed: bool,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Create a pool and start its core workers.
    ///
    /// # Errors
    ///
    /// - `PoolError::InvalidConfig` if the configuration fails validation
    /// - `PoolError::Internal` if a worker thread cannot be spawned
    pub fn new(config: WorkerPoolConfig) -> Result<Self, PoolError> {
        Self::with_rejection_handler(config, None)
    }

    pub(crate) fn with_rejection_handler(
        config: WorkerPoolConfig,
        on_rejected: Option<RejectionHandler>,
    ) -> Result<Self, PoolError> {
        Ok(Self {
            inner: PoolInner::start(config, on_rejected)?,
            scheduler: Mutex::new(SchedulerSlot::default()),
        })
    }

    /// Pool identifier, also recorded in log fields.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Configuration the pool was built with.
    #[must_use]
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.inner.config
    }

    /// Submit a task and get a handle to its outcome.
    ///
    /// When the queue is full the configured backpressure applies.
    ///
    /// # Errors
    ///
    /// `PoolError::Rejected` if the pool is not running, or the queue is full
    /// under `Backpressure::Reject`.
    pub fn submit<T, F>(&self, task: F) -> Result<ResultHandle<T>, PoolError>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&TaskContext) -> anyhow::Result<T> + Send + 'static,
    {
        let id = self.inner.next_task_id();
        let handle = ResultHandle::new(id, CancelToken::new());
        self.inner
            .enqueue(Job::for_handle(handle.clone(), task), self.inner.config.backpressure)?;
        Ok(handle)
    }

    /// Submit a task without keeping its handle. Failures are logged.
    ///
    /// # Errors
    ///
    /// As for [`submit`](Self::submit).
    pub fn execute<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: FnOnce(&TaskContext) -> anyhow::Result<()> + Send + 'static,
    {
        let handle = self.submit(task)?;
        let task_id = handle.task_id();
        handle.on_complete(move |outcome| {
            if let Outcome::Failed(err) = outcome {
                warn!(task_id, error = %err, "Fire-and-forget task failed");
            }
        });
        Ok(())
    }

    /// Submit every task and wait until all of them are done.
    ///
    /// Handles come back in input order; each may hold a value, an error or
    /// a cancellation.
    ///
    /// # Errors
    ///
    /// `PoolError::Rejected` if any submission is rejected. Tasks already
    /// submitted are cancelled in that case.
    pub fn invoke_all<T, F, I>(&self, tasks: I) -> Result<Vec<ResultHandle<T>>, PoolError>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&TaskContext) -> anyhow::Result<T> + Send + 'static,
        I: IntoIterator<Item = F>,
    {
        let handles = self.submit_each(tasks)?;
        for handle in &handles {
            handle.wait();
        }
        Ok(handles)
    }

    /// Run the tasks and return the first successful value.
    ///
    /// Once a value arrives the remaining tasks are cancelled with
    /// interruption.
    ///
    /// # Errors
    ///
    /// - `PoolError::InvalidArgument` if `tasks` is empty
    /// - `PoolError::Rejected` if a submission is rejected
    /// - the last task's error if every task failed or was cancelled
    pub fn invoke_any<T, F, I>(&self, tasks: I) -> Result<T, PoolError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&TaskContext) -> anyhow::Result<T> + Send + 'static,
        I: IntoIterator<Item = F>,
    {
        let handles = self.submit_each(tasks)?;
        if handles.is_empty() {
            return Err(PoolError::InvalidArgument("invoke_any needs at least one task".into()));
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        for handle in &handles {
            let tx = tx.clone();
            handle.on_complete(move |outcome| {
                let _ = tx.send(outcome.to_result());
            });
        }
        drop(tx);

        let mut last_err = PoolError::Internal("no task reported an outcome".into());
        for result in rx.iter().take(handles.len()) {
            match result {
                Ok(value) => {
                    for handle in &handles {
                        handle.cancel(true);
                    }
                    return Ok(value);
                }
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    fn submit_each<T, F, I>(&self, tasks: I) -> Result<Vec<ResultHandle<T>>, PoolError>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&TaskContext) -> anyhow::Result<T> + Send + 'static,
        I: IntoIterator<Item = F>,
    {
        let mut handles = Vec::new();
        for task in tasks {
            match self.submit(task) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    for handle in &handles {
                        handle.cancel(true);
                    }
                    return Err(e);
                }
            }
        }
        Ok(handles)
    }

    fn scheduler(&self) -> Result<Arc<SchedulerCore>, PoolError> {
        let mut slot = self.scheduler.lock();
        if slot.closed || self.inner.state() != PoolState::Running {
            return Err(PoolError::Rejected(crate::core::error::RejectReason::Shutdown));
        }
        if let Some(scheduler) = slot.core.as_ref() {
            return Ok(Arc::clone(scheduler));
        }
        let scheduler = SchedulerCore::start(Arc::clone(&self.inner))?;
        slot.core = Some(Arc::clone(&scheduler));
        Ok(scheduler)
    }

    /// Close the slot and take the running scheduler out of it. Completion
    /// listeners run while entries are abandoned, so the slot lock must be
    /// released before calling into the scheduler.
    fn close_scheduler(&self) -> Option<Arc<SchedulerCore>> {
        let mut slot = self.scheduler.lock();
        slot.closed = true;
        slot.core.clone()
    }

    fn current_scheduler(&self) -> Option<Arc<SchedulerCore>> {
        self.scheduler.lock().core.clone()
    }

    /// Run `task` once after `delay`.
    ///
    /// # Errors
    ///
    /// `PoolError::Rejected` if the pool is shutting down.
    pub fn schedule_once<T, F>(&self, task: F, delay: Duration) -> Result<ScheduledHandle<T>, PoolError>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&TaskContext) -> anyhow::Result<T> + Send + 'static,
    {
        self.scheduler()?.schedule_once(task, delay)
    }

    /// Run `task` after `initial_delay`, then every `period` measured from the
    /// previous scheduled start. A slow firing delays the next one but never
    /// overlaps it.
    ///
    /// # Errors
    ///
    /// - `PoolError::InvalidArgument` if `period` is zero
    /// - `PoolError::Rejected` if the pool is shutting down
    pub fn schedule_at_fixed_rate<F>(
        &self,
        task: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledHandle<()>, PoolError>
    where
        F: Fn(&TaskContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if period.is_zero() {
            return Err(PoolError::InvalidArgument("period must be non-zero".into()));
        }
        self.scheduler()?
            .schedule_repeating(task, initial_delay, Cadence::FixedRate(period))
    }

    /// Run `task` after `initial_delay`, then `delay` after each firing completes.
    ///
    /// # Errors
    ///
    /// - `PoolError::InvalidArgument` if `delay` is zero
    /// - `PoolError::Rejected` if the pool is shutting down
    pub fn schedule_with_fixed_delay<F>(
        &self,
        task: F,
        initial_delay: Duration,
        delay: Duration,
    ) -> Result<ScheduledHandle<()>, PoolError>
    where
        F: Fn(&TaskContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if delay.is_zero() {
            return Err(PoolError::InvalidArgument("delay must be non-zero".into()));
        }
        self.scheduler()?
            .schedule_repeating(task, initial_delay, Cadence::FixedDelay(delay))
    }

    /// Stop accepting tasks. Queued and running tasks still finish; scheduled
    /// entries that have not fired are cancelled.
    pub fn shutdown(&self) {
        if let Some(scheduler) = self.close_scheduler() {
            scheduler.shutdown();
        }
        self.inner.shutdown();
    }

    /// Stop accepting tasks, cancel everything queued or scheduled and trip
    /// the cancellation token of every running task.
    ///
    /// Returns the number of queued tasks that were cancelled.
    pub fn shutdown_now(&self) -> usize {
        if let Some(scheduler) = self.close_scheduler() {
            scheduler.shutdown();
        }
        self.inner.shutdown_now()
    }

    /// Wait for every worker to exit after a shutdown.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        if !self.inner.await_termination(timeout) {
            return false;
        }
        if let Some(scheduler) = self.current_scheduler() {
            scheduler.join();
        }
        true
    }

    /// Graceful shutdown, escalating to [`shutdown_now`](Self::shutdown_now)
    /// if the pool has not terminated within `timeout`.
    ///
    /// Returns whether the pool terminated.
    pub fn close(&self, timeout: Duration) -> bool {
        self.shutdown();
        if self.await_termination(timeout) {
            return true;
        }
        let cancelled = self.shutdown_now();
        debug!(pool = %self.inner.label, cancelled, "Escalated to forced shutdown");
        self.await_termination(timeout)
    }

    /// Snapshot of pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let mut stats = self.inner.stats();
        stats.scheduled_tasks = self
            .current_scheduler()
            .map_or(0, |scheduler| scheduler.len());
        stats
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PoolState {
        self.inner.state()
    }

    /// Whether `shutdown` or `shutdown_now` has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.state() >= PoolState::ShuttingDown
    }

    /// Whether every worker has exited.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.state() == PoolState::Terminated
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.is_shutdown() {
            self.shutdown_now();
        }
    }
}
