//! Core pool machinery: queue, workers, handles, scheduling and fork/join.

pub mod cancel;
pub mod error;
pub mod fork_join;
pub mod handle;
pub(crate) mod queue;
pub mod scheduler;
pub mod worker_pool;

pub use cancel::{CancelToken, TaskContext};
pub use error::{AppResult, Cancelled, PoolError, RejectReason, TaskError};
pub use fork_join::RecursiveTask;
pub use handle::{join_all, Completer, Outcome, ResultHandle};
pub use scheduler::{Cadence, ScheduledHandle};
pub use worker_pool::{PoolStats, RejectionHandler, WorkerPool};
