//! Error types for pool, handle and scheduler operations.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Why a submission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The pool is shutting down or already terminated.
    Shutdown,
    /// The queue is at capacity and the backpressure policy is `Reject`.
    QueueFull,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shutdown => write!(f, "pool is not running"),
            Self::QueueFull => write!(f, "queue is full"),
        }
    }
}

/// Failure raised by a task body.
///
/// Cloneable so that every observer of a [`ResultHandle`](crate::core::ResultHandle)
/// sees the same error.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The task returned an error.
    #[error("{0}")]
    Error(Arc<anyhow::Error>),
    /// The task panicked; the payload message is kept when it is a string.
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Wrap any error as a task failure.
    pub fn from_error<E>(err: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self::Error(Arc::new(err.into()))
    }

    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::Panicked(message)
    }
}

/// Marker returned by a task that observed its cancellation token.
///
/// Returning this from a task body (usually through
/// [`TaskContext::checkpoint`](crate::core::TaskContext::checkpoint) and `?`)
/// records the task as cancelled instead of failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("task observed cancellation")]
pub struct Cancelled;

/// Errors produced by the worker pool and its handles.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// The task was not accepted.
    #[error("task rejected: {0}")]
    Rejected(RejectReason),
    /// A bounded wait expired before the outcome was available.
    #[error("operation timed out")]
    Timeout,
    /// The task was cancelled before or while running.
    #[error("task was cancelled")]
    Cancelled,
    /// The task itself failed.
    #[error("task failed: {0}")]
    TaskFailed(TaskError),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// An argument to a pool operation was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Internal error (thread spawn failure, abandoned handle, etc.).
    #[error("internal error: {0}")]
    Internal(String),
}

impl PoolError {
    /// Whether this error is a rejection of any kind.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
