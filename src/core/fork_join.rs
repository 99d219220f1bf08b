//! Divide-and-conquer on top of a [`WorkerPool`].
//!
//! A [`RecursiveTask`] is split on the calling thread until no piece wants to
//! split further; only the leaves are submitted. Worker threads therefore never
//! wait on other tasks, and recursion depth cannot exhaust a bounded pool.
//! Results are combined bottom-up in split order.
//!
//! Fire-and-forget style work ("recursive actions") is the `Output = ()` case.

use crate::core::cancel::TaskContext;
use crate::core::error::PoolError;
use crate::core::handle::ResultHandle;
use crate::core::worker_pool::WorkerPool;

/// A computation that can be split into independent subproblems.
pub trait RecursiveTask: Sized + Send + 'static {
    /// Value produced by each piece and by the whole.
    type Output: Clone + Send + Sync + 'static;

    /// Whether this piece is still too large to compute directly.
    fn should_split(&self) -> bool;

    /// Break this piece into subproblems. Only called if [`should_split`](Self::should_split)
    /// returned `true`.
    fn split(self) -> Vec<Self>;

    /// Compute a leaf directly on a worker thread.
    ///
    /// # Errors
    ///
    /// Any error aborts the whole computation.
    fn compute(self, ctx: &TaskContext) -> anyhow::Result<Self::Output>;

    /// Merge the results of the pieces produced by one `split`, in split order.
    fn combine(parts: Vec<Self::Output>) -> Self::Output;
}

enum Node<R: RecursiveTask> {
    Leaf(ResultHandle<R::Output>),
    Branch(Vec<Node<R>>),
}

/// Split `task`, run its leaves on `pool` and combine the results.
///
/// Blocks the calling thread until every leaf is done.
///
/// # Errors
///
/// - `PoolError::Rejected` if a leaf cannot be submitted; leaves already
///   submitted are cancelled
/// - `PoolError::TaskFailed` / `PoolError::Cancelled` from the first failing
///   leaf in split order
pub fn invoke<R: RecursiveTask>(pool: &WorkerPool, task: R) -> Result<R::Output, PoolError> {
    let mut submitted = Vec::new();
    match fork(pool, task, &mut submitted) {
        Ok(tree) => join(tree),
        Err(e) => {
            for handle in &submitted {
                handle.cancel(true);
            }
            Err(e)
        }
    }
}

fn fork<R: RecursiveTask>(
    pool: &WorkerPool,
    task: R,
    submitted: &mut Vec<ResultHandle<R::Output>>,
) -> Result<Node<R>, PoolError> {
    if !task.should_split() {
        let handle = pool.submit(move |ctx| task.compute(ctx))?;
        submitted.push(handle.clone());
        return Ok(Node::Leaf(handle));
    }
    task.split()
        .into_iter()
        .map(|part| fork(pool, part, submitted))
        .collect::<Result<Vec<_>, _>>()
        .map(Node::Branch)
}

fn join<R: RecursiveTask>(node: Node<R>) -> Result<R::Output, PoolError> {
    match node {
        Node::Leaf(handle) => handle.get(),
        Node::Branch(children) => {
            let parts = children.into_iter().map(join).collect::<Result<Vec<_>, _>>()?;
            Ok(R::combine(parts))
        }
    }
}
