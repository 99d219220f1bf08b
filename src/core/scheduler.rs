//! Delayed and periodic task scheduling.
//!
//! Entries wait in a min-heap keyed by `(fire_at, seq)`. A dispatcher thread
//! sleeps on a condvar until the earliest fire time, then moves due entries
//! into the pool queue. Periodic entries are re-armed only after a firing
//! finishes, so two firings of the same entry never overlap:
//!
//! - fixed rate: `next = previous scheduled fire + period` (an overrun fires
//!   the next tick immediately, no ticks are skipped)
//! - fixed delay: `next = completion time + delay`

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Backpressure;
use crate::core::cancel::TaskContext;
use crate::core::error::PoolError;
use crate::core::handle::{Outcome, ResultHandle};
use crate::core::queue::{run_body, Job, JobOutcome};
use crate::core::worker_pool::inner::PoolInner;
use crate::util::serde::{TaskId, TaskState};

/// How a scheduled entry repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// Fire once.
    Once,
    /// Fire every `period`, measured from the previous scheduled fire time.
    FixedRate(Duration),
    /// Fire `delay` after the previous firing completed.
    FixedDelay(Duration),
}

pub(crate) type PeriodicBody = Arc<dyn Fn(&TaskContext) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone, Copy)]
enum Repeat {
    Rate(Duration),
    Delay(Duration),
}

enum EntryWork {
    Once(Job),
    Repeating {
        body: PeriodicBody,
        handle: ResultHandle<()>,
        repeat: Repeat,
    },
}

impl EntryWork {
    /// Drop the entry; its handle becomes `Cancelled`.
    fn abandon(self) -> bool {
        match self {
            Self::Once(job) => job.abandon(),
            Self::Repeating { handle, .. } => handle.finish(Outcome::Cancelled),
        }
    }
}

struct Entry {
    id: TaskId,
    fire_at: Instant,
    seq: u64,
    work: EntryWork,
}

// Reversed so that `BinaryHeap` pops the earliest entry first.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl Eq for Entry {}

struct SchedulerState {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    shutdown: bool,
}

/// Timer heap plus dispatcher thread feeding one pool.
pub(crate) struct SchedulerCore {
    pool: Arc<PoolInner>,
    state: Mutex<SchedulerState>,
    wake: Condvar,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerCore {
    /// Create the scheduler and start its dispatcher thread.
    pub fn start(pool: Arc<PoolInner>) -> Result<Arc<Self>, PoolError> {
        let name = format!("{}-scheduler", pool.config.thread_name_prefix);
        let core = Arc::new(Self {
            pool,
            state: Mutex::new(SchedulerState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            wake: Condvar::new(),
            dispatcher: Mutex::new(None),
        });

        let dispatcher = Arc::clone(&core);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || dispatcher.run_dispatcher())
            .map_err(|e| PoolError::Internal(format!("failed to spawn scheduler thread: {e}")))?;
        *core.dispatcher.lock() = Some(handle);
        debug!(pool = %core.pool.label, "Scheduler dispatcher started");
        Ok(core)
    }

    fn run_dispatcher(self: Arc<Self>) {
        loop {
            let entry = {
                let mut state = self.state.lock();
                loop {
                    if state.shutdown {
                        debug!(pool = %self.pool.label, "Scheduler dispatcher exiting");
                        return;
                    }
                    match state.heap.peek().map(|e| e.fire_at) {
                        None => self.wake.wait(&mut state),
                        Some(at) if at <= Instant::now() => break state.heap.pop(),
                        Some(at) => {
                            self.wake.wait_until(&mut state, at);
                        }
                    }
                }
            };
            if let Some(entry) = entry {
                self.fire(entry);
            }
        }
    }

    fn fire(self: &Arc<Self>, entry: Entry) {
        let Entry {
            id, fire_at, work, ..
        } = entry;
        let job = match work {
            EntryWork::Once(job) => job,
            EntryWork::Repeating {
                body,
                handle,
                repeat,
            } => {
                if handle.is_done() {
                    return;
                }
                self.periodic_job(id, fire_at, body, handle, repeat)
            }
        };
        debug!(pool = %self.pool.label, task_id = id, "Scheduled task due");
        // Firings always wait for queue space rather than being dropped.
        if let Err(e) = self.pool.enqueue(job, Backpressure::Block) {
            debug!(pool = %self.pool.label, task_id = id, error = %e, "Scheduled firing discarded");
        }
    }

    fn periodic_job(
        self: &Arc<Self>,
        id: TaskId,
        scheduled: Instant,
        body: PeriodicBody,
        handle: ResultHandle<()>,
        repeat: Repeat,
    ) -> Job {
        let scheduler = Arc::downgrade(self);
        let token = handle.token().clone();
        let abandon_handle = handle.clone();
        Job::new(
            id,
            token.clone(),
            move || {
                if handle.is_done() {
                    return JobOutcome::Skipped;
                }
                handle.try_start();
                let ctx = TaskContext::new(id, token);
                match run_body(&ctx, |ctx| body(ctx)) {
                    Outcome::Completed(()) => {
                        let next = match repeat {
                            Repeat::Rate(period) => scheduled + period,
                            Repeat::Delay(delay) => Instant::now() + delay,
                        };
                        Self::rearm(&scheduler, id, next, body, handle, repeat);
                        JobOutcome::Ran(TaskState::Completed)
                    }
                    outcome => {
                        let state = outcome.state();
                        if state == TaskState::Failed {
                            warn!(task_id = id, "Periodic task failed; schedule stopped");
                        }
                        handle.finish(outcome);
                        JobOutcome::Ran(state)
                    }
                }
            },
            move || abandon_handle.finish(Outcome::Cancelled),
        )
    }

    fn rearm(
        scheduler: &Weak<Self>,
        id: TaskId,
        next: Instant,
        body: PeriodicBody,
        handle: ResultHandle<()>,
        repeat: Repeat,
    ) {
        if handle.is_done() {
            return;
        }
        let work = EntryWork::Repeating {
            body,
            handle,
            repeat,
        };
        match scheduler.upgrade() {
            Some(scheduler) => {
                if let Err(work) = scheduler.insert(id, next, work) {
                    work.abandon();
                }
            }
            None => {
                work.abandon();
            }
        }
    }

    fn insert(&self, id: TaskId, fire_at: Instant, work: EntryWork) -> Result<(), EntryWork> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Err(work);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Entry {
            id,
            fire_at,
            seq,
            work,
        });
        drop(state);
        self.wake.notify_one();
        Ok(())
    }

    fn remove(&self, id: TaskId) -> Option<EntryWork> {
        let mut state = self.state.lock();
        let entries = std::mem::take(&mut state.heap).into_vec();
        let mut removed = None;
        for entry in entries {
            if removed.is_none() && entry.id == id {
                removed = Some(entry.work);
            } else {
                state.heap.push(entry);
            }
        }
        removed
    }

    /// Schedule a one-shot task.
    pub fn schedule_once<T, F>(
        self: &Arc<Self>,
        task: F,
        delay: Duration,
    ) -> Result<ScheduledHandle<T>, PoolError>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&TaskContext) -> anyhow::Result<T> + Send + 'static,
    {
        let id = self.pool.next_task_id();
        let handle = ResultHandle::new(id, crate::core::cancel::CancelToken::new());
        let job = Job::for_handle(handle.clone(), task);
        self.insert(id, Instant::now() + delay, EntryWork::Once(job))
            .map_err(|work| {
                work.abandon();
                PoolError::Rejected(crate::core::error::RejectReason::Shutdown)
            })?;
        Ok(ScheduledHandle {
            id,
            cadence: Cadence::Once,
            handle,
            scheduler: Arc::downgrade(self),
        })
    }

    /// Schedule a repeating task.
    pub fn schedule_repeating<F>(
        self: &Arc<Self>,
        task: F,
        initial_delay: Duration,
        cadence: Cadence,
    ) -> Result<ScheduledHandle<()>, PoolError>
    where
        F: Fn(&TaskContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let repeat = match cadence {
            Cadence::FixedRate(period) if !period.is_zero() => Repeat::Rate(period),
            Cadence::FixedDelay(delay) if !delay.is_zero() => Repeat::Delay(delay),
            Cadence::Once => {
                return Err(PoolError::InvalidArgument(
                    "repeating schedule needs a fixed rate or fixed delay".into(),
                ))
            }
            _ => return Err(PoolError::InvalidArgument("period must be non-zero".into())),
        };
        let id = self.pool.next_task_id();
        let handle = ResultHandle::new(id, crate::core::cancel::CancelToken::new());
        let work = EntryWork::Repeating {
            body: Arc::new(task),
            handle: handle.clone(),
            repeat,
        };
        self.insert(id, Instant::now() + initial_delay, work)
            .map_err(|work| {
                work.abandon();
                PoolError::Rejected(crate::core::error::RejectReason::Shutdown)
            })?;
        Ok(ScheduledHandle {
            id,
            cadence,
            handle,
            scheduler: Arc::downgrade(self),
        })
    }

    /// Number of entries waiting for their fire time.
    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    /// Stop the dispatcher and cancel every entry that has not fired yet.
    pub fn shutdown(&self) -> usize {
        let mut state = self.state.lock();
        if state.shutdown {
            return 0;
        }
        state.shutdown = true;
        let pending = std::mem::take(&mut state.heap).into_vec();
        drop(state);
        self.wake.notify_all();

        let count = pending.len();
        for entry in pending {
            entry.work.abandon();
        }
        debug!(pool = %self.pool.label, cancelled = count, "Scheduler shut down");
        count
    }

    /// Join the dispatcher thread once it has been told to stop.
    pub fn join(&self) {
        if let Some(handle) = self.dispatcher.lock().take() {
            if handle.join().is_err() {
                warn!(pool = %self.pool.label, "Scheduler dispatcher panicked");
            }
        }
    }
}

/// Handle to a scheduled entry.
///
/// For one-shot entries the inner [`ResultHandle`] carries the task's value.
/// A periodic entry's handle stays `Running` between firings and only becomes
/// terminal when the schedule is cancelled, a firing fails, or a firing
/// returns the cancellation marker.
pub struct ScheduledHandle<T> {
    id: TaskId,
    cadence: Cadence,
    handle: ResultHandle<T>,
    scheduler: Weak<SchedulerCore>,
}

impl<T> fmt::Debug for ScheduledHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledHandle")
            .field("id", &self.id)
            .field("cadence", &self.cadence)
            .field("state", &self.handle.state())
            .finish()
    }
}

impl<T> ScheduledHandle<T> {
    /// Task identifier shared by every firing of this entry.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.id
    }

    /// Repetition policy of this entry.
    #[must_use]
    pub const fn cadence(&self) -> Cadence {
        self.cadence
    }

    /// The result handle backing this entry.
    #[must_use]
    pub const fn handle(&self) -> &ResultHandle<T> {
        &self.handle
    }

    /// Current state without blocking.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.handle.state()
    }

    /// Whether the entry reached a terminal state.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.handle.is_done()
    }

    /// Whether the entry was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// Cancel the entry.
    ///
    /// An entry still waiting for its fire time is removed from the timer heap.
    /// A firing already handed to the pool is not retracted: a one-shot task
    /// falls back to [`ResultHandle::cancel`], a periodic one is marked
    /// cancelled so that it never re-arms, with `may_interrupt` also tripping
    /// the running firing's token.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        if let Some(work) = self.scheduler.upgrade().and_then(|s| s.remove(self.id)) {
            return work.abandon();
        }
        match self.cadence {
            Cadence::Once => self.handle.cancel(may_interrupt),
            Cadence::FixedRate(_) | Cadence::FixedDelay(_) => {
                if may_interrupt {
                    self.handle.token().cancel();
                }
                self.handle.finish(Outcome::Cancelled)
            }
        }
    }

    /// Block until the entry is done. See [`ResultHandle::get`].
    ///
    /// # Errors
    ///
    /// As for [`ResultHandle::get`].
    pub fn get(&self) -> Result<T, PoolError>
    where
        T: Clone,
    {
        self.handle.get()
    }

    /// Block for at most `timeout`. See [`ResultHandle::get_timeout`].
    ///
    /// # Errors
    ///
    /// As for [`ResultHandle::get_timeout`].
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, PoolError>
    where
        T: Clone,
    {
        self.handle.get_timeout(timeout)
    }
}
