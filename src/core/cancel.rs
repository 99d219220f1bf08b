//! Cooperative cancellation.
//!
//! Nothing in the pool can stop a running closure. A task is cancelled only
//! when its body looks at the token it was handed, either by polling
//! [`TaskContext::is_cancelled`] or by returning the [`Cancelled`] marker from
//! [`TaskContext::checkpoint`] / [`TaskContext::sleep`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::error::Cancelled;
use crate::util::serde::TaskId;

/// A cloneable, one-way cancellation flag.
///
/// Tripping the token wakes every thread blocked in [`CancelToken::wait_timeout`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token. Returns `true` if this call changed its state.
    pub fn cancel(&self) -> bool {
        let (flag, condvar) = self.inner.as_ref();
        let mut cancelled = flag.lock();
        if *cancelled {
            return false;
        }
        *cancelled = true;
        condvar.notify_all();
        true
    }

    /// Whether the token has been tripped.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Block for at most `timeout`, returning early if the token is tripped.
    ///
    /// Returns `true` if the token was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (flag, condvar) = self.inner.as_ref();
        let mut cancelled = flag.lock();
        while !*cancelled {
            if condvar.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        *cancelled
    }
}

/// Execution context handed to every task body.
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    token: CancelToken,
}

impl TaskContext {
    pub(crate) const fn new(task_id: TaskId, token: CancelToken) -> Self {
        Self { task_id, token }
    }

    /// Identifier assigned to this task at submission.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Whether cancellation was requested for this task.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Return `Err(Cancelled)` if cancellation was requested.
    ///
    /// # Errors
    ///
    /// [`Cancelled`] when the token has been tripped.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early on cancellation.
    ///
    /// # Errors
    ///
    /// [`Cancelled`] if the token was tripped before or during the sleep.
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        if self.token.wait_timeout(duration) {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// The underlying token, for handing to nested work.
    #[must_use]
    pub const fn token(&self) -> &CancelToken {
        &self.token
    }
}
