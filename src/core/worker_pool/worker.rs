//! Worker threads.
//!
//! Each worker blocks on the pool's "not empty" condvar, runs one job at a
//! time and reports back. A failing or panicking task is recorded on its
//! handle, and a panicking completion listener is contained by the handle,
//! so neither takes the worker down.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::core::queue::JobOutcome;

use super::inner::PoolInner;

/// Spawn a named worker thread bound to `pool`.
///
/// The caller must already have counted this worker in `live_workers`.
pub(crate) fn spawn_worker(worker_id: usize, pool: Arc<PoolInner>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("{}-{worker_id}", pool.config.thread_name_prefix))
        .stack_size(pool.config.thread_stack_size)
        .spawn(move || worker_loop(worker_id, &pool))
}

fn worker_loop(worker_id: usize, pool: &PoolInner) {
    debug!(pool = %pool.label, worker_id, "Worker thread started");

    while let Some(job) = pool.next_job(worker_id) {
        let (task_id, seq) = (job.id, job.seq);
        debug!(pool = %pool.label, worker_id, task_id, "Worker executing task");

        let outcome = job.run();

        match outcome {
            JobOutcome::Skipped => {
                debug!(pool = %pool.label, worker_id, task_id, "Skipped cancelled task");
            }
            JobOutcome::Ran(state) => {
                debug!(pool = %pool.label, worker_id, task_id, ?state, "Worker completed task");
            }
        }
        pool.job_done(seq, outcome);
    }

    debug!(pool = %pool.label, worker_id, "Worker thread exiting");
}
