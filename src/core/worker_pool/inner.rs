//! Shared pool state: the single synchronized controller behind `WorkerPool`.
//!
//! One mutex guards the queue, the lifecycle state, worker bookkeeping and
//! the registry of running tasks' cancellation tokens. Three condvars hang off
//! it: `not_empty` for idle workers, `not_full` for blocked submitters and
//! `terminated` for `await_termination` callers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Backpressure, WorkerPoolConfig};
use crate::core::cancel::CancelToken;
use crate::core::error::{PoolError, RejectReason};
use crate::core::queue::{Job, JobOutcome, TaskQueue};
use crate::util::serde::{PoolState, TaskId, TaskState};
use crate::util::telemetry::short_id;

use super::worker::spawn_worker;
use super::{PoolCounters, PoolStats};

/// Callback invoked for every rejected submission.
pub type RejectionHandler = Arc<dyn Fn(TaskId, RejectReason) + Send + Sync>;

pub(crate) struct PoolShared {
    pub state: PoolState,
    pub queue: TaskQueue,
    pub live_workers: usize,
    pub idle_workers: usize,
    /// Tokens of running jobs, keyed by `Job::seq`.
    pub running: HashMap<u64, CancelToken>,
    next_worker_id: usize,
    next_job_seq: u64,
}

pub(crate) struct PoolInner {
    pub id: Uuid,
    pub label: String,
    pub config: WorkerPoolConfig,
    pub shared: Mutex<PoolShared>,
    not_empty: Condvar,
    not_full: Condvar,
    terminated: Condvar,
    pub counters: PoolCounters,
    next_task_id: AtomicU64,
    workers: Mutex<Vec<JoinHandle<()>>>,
    on_rejected: Option<RejectionHandler>,
}

impl PoolInner {
    /// Build the controller and start the core workers.
    pub fn start(
        config: WorkerPoolConfig,
        on_rejected: Option<RejectionHandler>,
    ) -> Result<Arc<Self>, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let id = Uuid::new_v4();
        let inner = Arc::new(Self {
            id,
            label: short_id(&id),
            shared: Mutex::new(PoolShared {
                state: PoolState::Created,
                queue: TaskQueue::new(config.queue_capacity),
                live_workers: 0,
                idle_workers: 0,
                running: HashMap::new(),
                next_worker_id: 0,
                next_job_seq: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            terminated: Condvar::new(),
            counters: PoolCounters::default(),
            next_task_id: AtomicU64::new(0),
            workers: Mutex::new(Vec::with_capacity(config.max_workers)),
            on_rejected,
            config,
        });

        for _ in 0..inner.config.worker_count {
            let worker_id = inner.reserve_worker();
            if let Err(e) = inner.launch_worker(worker_id) {
                inner.release_worker();
                inner.shutdown_now();
                return Err(e);
            }
        }
        inner.shared.lock().state = PoolState::Running;

        info!(
            pool = %inner.label,
            worker_count = inner.config.worker_count,
            max_workers = inner.config.max_workers,
            queue_capacity = inner.config.queue_capacity,
            backpressure = ?inner.config.backpressure,
            "WorkerPool started"
        );
        Ok(inner)
    }

    pub fn next_task_id(&self) -> TaskId {
        self.next_task_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Put a job on the queue, honouring `policy` when it is full.
    ///
    /// On rejection the job is abandoned (its handle becomes `Cancelled`) and
    /// the rejection callback runs.
    pub fn enqueue(self: &Arc<Self>, mut job: Job, policy: Backpressure) -> Result<(), PoolError> {
        let mut shared = self.shared.lock();
        loop {
            if shared.state != PoolState::Running {
                drop(shared);
                return Err(self.reject(job, RejectReason::Shutdown));
            }
            if !shared.queue.is_full() {
                break;
            }
            match policy {
                Backpressure::Reject => {
                    drop(shared);
                    return Err(self.reject(job, RejectReason::QueueFull));
                }
                Backpressure::Block => self.not_full.wait(&mut shared),
            }
        }

        let task_id = job.id;
        job.seq = shared.next_job_seq;
        shared.next_job_seq += 1;
        if let Err(job) = shared.queue.push(job) {
            // Capacity was checked under this same lock.
            drop(shared);
            return Err(self.reject(job, RejectReason::QueueFull));
        }
        self.counters.submitted_tasks.fetch_add(1, Ordering::Relaxed);

        let grow = shared.idle_workers < shared.queue.len()
            && shared.live_workers < self.config.max_workers;
        let worker_id = grow.then(|| Self::reserve_locked(&mut shared));
        drop(shared);
        self.not_empty.notify_one();
        debug!(pool = %self.label, task_id, "Task queued");

        if let Some(worker_id) = worker_id {
            if let Err(e) = self.launch_worker(worker_id) {
                self.release_worker();
                let mut shared = self.shared.lock();
                if shared.live_workers == 0 {
                    // Nobody left to run what is queued.
                    let stranded = shared.queue.drain();
                    drop(shared);
                    self.not_full.notify_all();
                    for job in stranded {
                        job.abandon();
                        self.counters.cancelled_tasks.fetch_add(1, Ordering::Relaxed);
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn reject(&self, job: Job, reason: RejectReason) -> PoolError {
        let task_id = job.id;
        job.abandon();
        self.counters.rejected_tasks.fetch_add(1, Ordering::Relaxed);
        warn!(pool = %self.label, task_id, %reason, "Task rejected");
        if let Some(handler) = &self.on_rejected {
            handler(task_id, reason);
        }
        PoolError::Rejected(reason)
    }

    fn reserve_locked(shared: &mut PoolShared) -> usize {
        shared.live_workers += 1;
        let worker_id = shared.next_worker_id;
        shared.next_worker_id += 1;
        worker_id
    }

    fn reserve_worker(&self) -> usize {
        Self::reserve_locked(&mut self.shared.lock())
    }

    /// Undo a reservation whose thread never started.
    fn release_worker(&self) {
        let mut shared = self.shared.lock();
        shared.live_workers -= 1;
        self.mark_terminated_if_idle(&mut shared);
    }

    fn launch_worker(self: &Arc<Self>, worker_id: usize) -> Result<(), PoolError> {
        match spawn_worker(worker_id, Arc::clone(self)) {
            Ok(handle) => {
                let mut workers = self.workers.lock();
                workers.retain(|w| !w.is_finished());
                workers.push(handle);
                Ok(())
            }
            Err(e) => {
                error!(pool = %self.label, worker_id, error = %e, "Failed to spawn worker thread");
                Err(PoolError::Internal(format!("failed to spawn worker thread: {e}")))
            }
        }
    }

    /// Block until a job is available.
    ///
    /// `None` means the worker has been deregistered and must exit: the pool
    /// is stopping with an empty queue, or a non-core worker sat idle for the
    /// configured timeout.
    pub fn next_job(&self, worker_id: usize) -> Option<Job> {
        let idle_timeout = self.config.idle_timeout();
        let core = self.config.worker_count;
        let mut shared = self.shared.lock();
        loop {
            if let Some(job) = shared.queue.pop() {
                shared.running.insert(job.seq, job.token.clone());
                drop(shared);
                self.not_full.notify_one();
                return Some(job);
            }
            if shared.state >= PoolState::ShuttingDown {
                debug!(pool = %self.label, worker_id, "Queue drained after shutdown");
                break;
            }

            shared.idle_workers += 1;
            let timed_out = match idle_timeout {
                Some(timeout) if shared.live_workers > core => {
                    self.not_empty.wait_for(&mut shared, timeout).timed_out()
                }
                _ => {
                    self.not_empty.wait(&mut shared);
                    false
                }
            };
            shared.idle_workers -= 1;

            if timed_out
                && shared.queue.is_empty()
                && shared.live_workers > core
                && shared.state == PoolState::Running
            {
                debug!(pool = %self.label, worker_id, "Idle worker retiring");
                break;
            }
        }

        shared.live_workers -= 1;
        self.mark_terminated_if_idle(&mut shared);
        None
    }

    /// Bookkeeping after a worker finished a job.
    pub fn job_done(&self, seq: u64, outcome: JobOutcome) {
        self.shared.lock().running.remove(&seq);
        let counter = match outcome {
            JobOutcome::Skipped | JobOutcome::Ran(TaskState::Cancelled) => &self.counters.cancelled_tasks,
            JobOutcome::Ran(TaskState::Failed) => &self.counters.failed_tasks,
            JobOutcome::Ran(_) => &self.counters.completed_tasks,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn mark_terminated_if_idle(&self, shared: &mut PoolShared) {
        if shared.live_workers == 0 && shared.state == PoolState::ShuttingDown {
            shared.state = PoolState::Terminated;
            self.terminated.notify_all();
            info!(pool = %self.label, "WorkerPool terminated");
        }
    }

    /// Stop accepting work; queued and running tasks still finish.
    pub fn shutdown(&self) {
        let mut shared = self.shared.lock();
        if shared.state >= PoolState::ShuttingDown {
            return;
        }
        shared.state = PoolState::ShuttingDown;
        info!(
            pool = %self.label,
            queued = shared.queue.len(),
            running = shared.running.len(),
            "Shutting down worker pool"
        );
        self.mark_terminated_if_idle(&mut shared);
        drop(shared);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Stop accepting work, cancel everything queued and trip the tokens of
    /// running tasks. Returns how many queued tasks were cancelled.
    pub fn shutdown_now(&self) -> usize {
        let mut shared = self.shared.lock();
        if shared.state < PoolState::ShuttingDown {
            shared.state = PoolState::ShuttingDown;
        }
        let drained = shared.queue.drain();
        let running: Vec<CancelToken> = shared.running.values().cloned().collect();
        self.mark_terminated_if_idle(&mut shared);
        drop(shared);
        self.not_empty.notify_all();
        self.not_full.notify_all();

        let count = drained.len();
        for job in drained {
            job.abandon();
            self.counters.cancelled_tasks.fetch_add(1, Ordering::Relaxed);
        }
        for token in &running {
            token.cancel();
        }
        info!(
            pool = %self.label,
            cancelled_queued = count,
            interrupted_running = running.len(),
            "Forced worker pool shutdown"
        );
        count
    }

    /// Wait until every worker has exited. Returns `false` on timeout.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut shared = self.shared.lock();
        while shared.state != PoolState::Terminated {
            if self.terminated.wait_until(&mut shared, deadline).timed_out() {
                if shared.state != PoolState::Terminated {
                    return false;
                }
                break;
            }
        }
        drop(shared);
        self.join_workers();
        true
    }

    fn join_workers(&self) {
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for (idx, handle) in handles.into_iter().enumerate() {
            if handle.join().is_err() {
                warn!(pool = %self.label, worker = idx, "Worker thread panicked");
            }
        }
    }

    pub fn state(&self) -> PoolState {
        self.shared.lock().state
    }

    pub fn stats(&self) -> PoolStats {
        let shared = self.shared.lock();
        let mut stats = self.counters.snapshot(self.config.worker_count, self.config.max_workers);
        stats.pool_id = self.id.to_string();
        stats.state = shared.state;
        stats.live_workers = shared.live_workers;
        stats.idle_workers = shared.idle_workers;
        stats.active_tasks = shared.running.len();
        stats.queued_tasks = shared.queue.len();
        stats.queue_capacity = shared.queue.capacity();
        stats
    }
}
