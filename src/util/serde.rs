//! Shared serializable identifiers and state enums.

use serde::{Deserialize, Serialize};

/// Unique task identifier, assigned per pool in submission order.
pub type TaskId = u64;

/// Observable state of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Queued, not yet picked up by a worker.
    Pending,
    /// A worker is executing the task body.
    Running,
    /// The body returned a value.
    Completed,
    /// The body returned an error or panicked.
    Failed,
    /// The task was cancelled and its outcome discarded.
    Cancelled,
}

impl TaskState {
    /// Whether this is one of the three terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Lifecycle state of a worker pool.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    /// Constructed, workers not yet started.
    #[default]
    Created,
    /// Accepting tasks.
    Running,
    /// No longer accepting tasks; draining or cancelling.
    ShuttingDown,
    /// All workers have exited.
    Terminated,
}
