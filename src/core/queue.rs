//! Bounded FIFO task queue and the type-erased job it holds.
//!
//! The queue itself is not synchronized; the pool controller owns it behind
//! its state mutex and pairs it with "not empty" / "not full" condvars.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::core::cancel::{CancelToken, TaskContext};
use crate::core::error::{Cancelled, TaskError};
use crate::core::handle::{Outcome, ResultHandle};
use crate::util::serde::{TaskId, TaskState};

/// What a worker observed when running a job, for pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobOutcome {
    /// The handle was already cancelled; the body never ran.
    Skipped,
    /// The body ran and its handle reached (or, for periodic firings, kept) this state.
    Ran(TaskState),
}

/// A type-erased unit of work with its handle bound in.
pub(crate) struct Job {
    pub id: TaskId,
    /// Per-enqueue key, unique within a pool even when firings share `id`.
    pub seq: u64,
    pub token: CancelToken,
    run: Box<dyn FnOnce() -> JobOutcome + Send>,
    abandon: Box<dyn FnOnce() -> bool + Send>,
}

impl Job {
    /// Build a job from raw closures.
    pub fn new<R, A>(id: TaskId, token: CancelToken, run: R, abandon: A) -> Self
    where
        R: FnOnce() -> JobOutcome + Send + 'static,
        A: FnOnce() -> bool + Send + 'static,
    {
        Self {
            id,
            seq: 0,
            token,
            run: Box::new(run),
            abandon: Box::new(abandon),
        }
    }

    /// Bind `task` to `handle`: the job runs the body once and records its outcome.
    pub fn for_handle<T, F>(handle: ResultHandle<T>, task: F) -> Self
    where
        T: Send + Sync + 'static,
        F: FnOnce(&TaskContext) -> anyhow::Result<T> + Send + 'static,
    {
        let id = handle.task_id();
        let token = handle.token().clone();
        let abandon_handle = handle.clone();
        Self::new(
            id,
            token.clone(),
            move || {
                if !handle.try_start() {
                    return JobOutcome::Skipped;
                }
                let ctx = TaskContext::new(id, token);
                let outcome = run_body(&ctx, task);
                let state = outcome.state();
                handle.finish(outcome);
                JobOutcome::Ran(state)
            },
            move || abandon_handle.cancel(false),
        )
    }

    /// Execute on the current thread.
    pub fn run(self) -> JobOutcome {
        (self.run)()
    }

    /// Discard without running; its handle becomes `Cancelled` if still pending.
    pub fn abandon(self) -> bool {
        (self.abandon)()
    }
}

/// Run a task body, classifying errors, panics and cooperative cancellation.
pub(crate) fn run_body<T, F>(ctx: &TaskContext, task: F) -> Outcome<T>
where
    F: FnOnce(&TaskContext) -> anyhow::Result<T>,
{
    match catch_unwind(AssertUnwindSafe(|| task(ctx))) {
        Ok(Ok(value)) => Outcome::Completed(value),
        Ok(Err(err)) if err.is::<Cancelled>() => Outcome::Cancelled,
        Ok(Err(err)) => Outcome::Failed(TaskError::from_error(err)),
        Err(payload) => Outcome::Failed(TaskError::from_panic(payload.as_ref())),
    }
}

/// Bounded FIFO of pending jobs. `len() <= capacity()` always holds.
pub(crate) struct TaskQueue {
    items: VecDeque<Job>,
    capacity: usize,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append a job, handing it back if the queue is full.
    pub fn push(&mut self, job: Job) -> Result<(), Job> {
        if self.is_full() {
            return Err(job);
        }
        self.items.push_back(job);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Job> {
        self.items.pop_front()
    }

    /// Remove every pending job, oldest first.
    pub fn drain(&mut self) -> Vec<Job> {
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
