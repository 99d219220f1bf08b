//! Result handles: one-shot, multi-observer slots for a task's outcome.
//!
//! A slot moves `Pending -> Running -> {Completed | Failed | Cancelled}` (or
//! straight from `Pending` to `Cancelled`). The terminal transition happens
//! exactly once; later attempts are ignored and reported as `false`.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::core::cancel::{CancelToken, TaskContext};
use crate::core::error::{PoolError, TaskError};
use crate::core::queue::run_body;
use crate::util::serde::{TaskId, TaskState};

/// Ids for handles not bound to a pool task count down from `TaskId::MAX`,
/// away from the pool's ids which count up from zero.
static NEXT_DETACHED_ID: AtomicU64 = AtomicU64::new(TaskId::MAX);

/// Terminal outcome of a task.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    /// The task produced a value.
    Completed(T),
    /// The task returned an error or panicked.
    Failed(TaskError),
    /// The task was cancelled.
    Cancelled,
}

impl<T> Outcome<T> {
    /// The matching terminal [`TaskState`].
    #[must_use]
    pub const fn state(&self) -> TaskState {
        match self {
            Self::Completed(_) => TaskState::Completed,
            Self::Failed(_) => TaskState::Failed,
            Self::Cancelled => TaskState::Cancelled,
        }
    }

    pub(crate) fn to_result(&self) -> Result<T, PoolError>
    where
        T: Clone,
    {
        match self {
            Self::Completed(value) => Ok(value.clone()),
            Self::Failed(err) => Err(PoolError::TaskFailed(err.clone())),
            Self::Cancelled => Err(PoolError::Cancelled),
        }
    }
}

type Listener<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;

enum Phase<T> {
    Pending,
    Running,
    Done(Arc<Outcome<T>>),
}

struct Slot<T> {
    phase: Phase<T>,
    listeners: Vec<Listener<T>>,
}

struct Shared<T> {
    task_id: TaskId,
    token: CancelToken,
    slot: Mutex<Slot<T>>,
    done: Condvar,
}

/// Caller-facing proxy for a task's eventual outcome.
///
/// Handles are cheap to clone; every clone observes the same slot. Reading the
/// value clones it out, so `T: Clone` is required for [`get`](Self::get).
/// The outcome is shared between observers, so a handle is only `Send` when
/// `T: Send + Sync`.
pub struct ResultHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ResultHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for ResultHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultHandle")
            .field("task_id", &self.shared.task_id)
            .field("state", &self.state())
            .finish()
    }
}

impl<T> ResultHandle<T> {
    pub(crate) fn new(task_id: TaskId, token: CancelToken) -> Self {
        Self {
            shared: Arc::new(Shared {
                task_id,
                token,
                slot: Mutex::new(Slot {
                    phase: Phase::Pending,
                    listeners: Vec::new(),
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// Create an unbound handle together with the [`Completer`] that resolves it.
    ///
    /// The pair behaves like a promise: the handle reports `Running` while the
    /// completer is alive, and a dropped completer cancels the handle. Its
    /// task id is taken from a separate range counting down from `TaskId::MAX`.
    #[must_use]
    pub fn pending() -> (Completer<T>, Self) {
        let id = NEXT_DETACHED_ID.fetch_sub(1, Ordering::Relaxed);
        let handle = Self::new(id, CancelToken::new());
        handle.try_start();
        (
            Completer {
                handle: handle.clone(),
            },
            handle,
        )
    }

    /// Identifier of the underlying task.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.shared.task_id
    }

    /// Current state without blocking.
    #[must_use]
    pub fn state(&self) -> TaskState {
        match &self.shared.slot.lock().phase {
            Phase::Pending => TaskState::Pending,
            Phase::Running => TaskState::Running,
            Phase::Done(outcome) => outcome.state(),
        }
    }

    /// Whether a terminal state has been reached.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    /// Whether the terminal state is `Cancelled`.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Cancelled
    }

    /// Request cancellation.
    ///
    /// A pending task becomes `Cancelled` immediately and its body never runs.
    /// For a running task, `may_interrupt` trips the task's cooperative token;
    /// the handle only ends up `Cancelled` if the body honours it. Returns
    /// `false` if the task is already done, or running and `may_interrupt`
    /// is `false`.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        let mut slot = self.shared.slot.lock();
        match slot.phase {
            Phase::Pending => {
                self.shared.token.cancel();
                let listeners = Self::resolve(&mut slot, Outcome::Cancelled);
                drop(slot);
                self.notify(listeners);
                true
            }
            Phase::Running if may_interrupt => {
                drop(slot);
                self.shared.token.cancel();
                true
            }
            Phase::Running | Phase::Done(_) => false,
        }
    }

    /// Run `listener` once the task reaches a terminal state.
    ///
    /// If the task is already done the listener runs immediately on the
    /// calling thread; otherwise it runs on whichever thread resolves the task.
    /// Listeners never run under the slot lock, so they may query the handle.
    pub fn on_complete<F>(&self, listener: F)
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        let mut slot = self.shared.slot.lock();
        if let Phase::Done(outcome) = &slot.phase {
            let outcome = Arc::clone(outcome);
            drop(slot);
            listener(&outcome);
            return;
        }
        slot.listeners.push(Box::new(listener));
    }

    /// Block until the task reaches a terminal state, without reading the value.
    pub fn wait(&self) {
        let mut slot = self.shared.slot.lock();
        while !matches!(slot.phase, Phase::Done(_)) {
            self.shared.done.wait(&mut slot);
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    /// Returns `true` if the task is done.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        while !matches!(slot.phase, Phase::Done(_)) {
            if self.shared.done.wait_until(&mut slot, deadline).timed_out() {
                return matches!(slot.phase, Phase::Done(_));
            }
        }
        true
    }

    /// Block until the task is done and return its value.
    ///
    /// # Errors
    ///
    /// - `PoolError::TaskFailed` if the task returned an error or panicked
    /// - `PoolError::Cancelled` if the task was cancelled
    pub fn get(&self) -> Result<T, PoolError>
    where
        T: Clone,
    {
        let mut slot = self.shared.slot.lock();
        loop {
            if let Phase::Done(outcome) = &slot.phase {
                return outcome.to_result();
            }
            self.shared.done.wait(&mut slot);
        }
    }

    /// Block for at most `timeout`. The task keeps running after a timeout.
    ///
    /// # Errors
    ///
    /// - `PoolError::Timeout` if the task is still unfinished after `timeout`
    /// - `PoolError::TaskFailed` / `PoolError::Cancelled` as for [`get`](Self::get)
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, PoolError>
    where
        T: Clone,
    {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        loop {
            if let Phase::Done(outcome) = &slot.phase {
                return outcome.to_result();
            }
            if self.shared.done.wait_until(&mut slot, deadline).timed_out() {
                return match &slot.phase {
                    Phase::Done(outcome) => outcome.to_result(),
                    _ => Err(PoolError::Timeout),
                };
            }
        }
    }

    /// Await the outcome from async code.
    ///
    /// The condvar wait is moved to tokio's blocking thread pool, so the
    /// calling runtime is never blocked.
    ///
    /// # Errors
    ///
    /// As for [`get_timeout`](Self::get_timeout), plus `PoolError::Internal`
    /// if the blocking task could not be joined.
    #[cfg(feature = "tokio-runtime")]
    pub async fn get_async(&self, timeout: Duration) -> Result<T, PoolError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let handle = self.clone();
        tokio::task::spawn_blocking(move || handle.get_timeout(timeout))
            .await
            .map_err(|e| PoolError::Internal(format!("blocking wait failed: {e}")))?
    }

    pub(crate) fn token(&self) -> &CancelToken {
        &self.shared.token
    }

    /// `Pending -> Running`. Returns `false` if the task was cancelled first.
    pub(crate) fn try_start(&self) -> bool {
        let mut slot = self.shared.slot.lock();
        if matches!(slot.phase, Phase::Pending) {
            slot.phase = Phase::Running;
            true
        } else {
            false
        }
    }

    /// Record the terminal outcome. Returns `false` if one was already recorded.
    pub(crate) fn finish(&self, outcome: Outcome<T>) -> bool {
        let mut slot = self.shared.slot.lock();
        if matches!(slot.phase, Phase::Done(_)) {
            return false;
        }
        let listeners = Self::resolve(&mut slot, outcome);
        drop(slot);
        self.notify(listeners);
        true
    }

    fn resolve(slot: &mut Slot<T>, outcome: Outcome<T>) -> (Arc<Outcome<T>>, Vec<Listener<T>>) {
        let outcome = Arc::new(outcome);
        slot.phase = Phase::Done(Arc::clone(&outcome));
        (outcome, std::mem::take(&mut slot.listeners))
    }

    fn notify(&self, (outcome, listeners): (Arc<Outcome<T>>, Vec<Listener<T>>)) {
        self.shared.done.notify_all();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&outcome))).is_err() {
                warn!(task_id = self.shared.task_id, "Completion listener panicked");
            }
        }
    }

    /// Derive a handle resolved by `f` once this one completes.
    ///
    /// `f` runs on whichever thread resolves this handle, or immediately if it
    /// is already done. A failure or cancellation here carries through to the
    /// derived handle without calling `f`. Cancelling the derived handle does
    /// not cancel this one.
    pub fn and_then<U, F>(&self, f: F) -> ResultHandle<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> anyhow::Result<U> + Send + 'static,
    {
        let (completer, derived) = ResultHandle::pending();
        self.on_complete(move |outcome| {
            let next = match outcome {
                Outcome::Completed(value) => {
                    let target = &completer.handle;
                    let ctx = TaskContext::new(target.task_id(), target.token().clone());
                    run_body(&ctx, |_| f(value))
                }
                Outcome::Failed(err) => Outcome::Failed(err.clone()),
                Outcome::Cancelled => Outcome::Cancelled,
            };
            completer.handle.finish(next);
        });
        derived
    }

    /// Derive a handle holding `f` applied to this handle's value.
    /// See [`and_then`](Self::and_then) for how outcomes carry through.
    pub fn then_apply<U, F>(&self, f: F) -> ResultHandle<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        self.and_then(move |value| Ok(f(value)))
    }

    /// Consume the value once it is available.
    pub fn then_accept<F>(&self, f: F) -> ResultHandle<()>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.and_then(move |value| {
            f(value);
            Ok(())
        })
    }

    /// Run `f` after a successful completion, ignoring the value.
    pub fn then_run<F>(&self, f: F) -> ResultHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.and_then(move |_| {
            f();
            Ok(())
        })
    }
}

/// Write side of a handle created with [`ResultHandle::pending`].
pub struct Completer<T> {
    handle: ResultHandle<T>,
}

impl<T> Completer<T> {
    /// Resolve with a value. Returns `false` if already resolved.
    pub fn complete(&self, value: T) -> bool {
        self.handle.finish(Outcome::Completed(value))
    }

    /// Resolve with an error. Returns `false` if already resolved.
    pub fn fail<E>(&self, err: E) -> bool
    where
        E: Into<anyhow::Error>,
    {
        self.handle.finish(Outcome::Failed(TaskError::from_error(err)))
    }

    /// Resolve as cancelled. Returns `false` if already resolved.
    pub fn cancel(&self) -> bool {
        self.handle.finish(Outcome::Cancelled)
    }

    /// Whether the reader side asked for cancellation.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.handle.token().is_cancelled()
    }

    /// Another reader for the same slot.
    #[must_use]
    pub fn handle(&self) -> ResultHandle<T> {
        self.handle.clone()
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        self.handle.finish(Outcome::Cancelled);
    }
}

/// Wait for every handle and collect the values in input order.
///
/// # Errors
///
/// The first error encountered in input order.
pub fn join_all<T>(handles: &[ResultHandle<T>]) -> Result<Vec<T>, PoolError>
where
    T: Clone,
{
    handles.iter().map(ResultHandle::get).collect()
}
