//! Work items executed by the background worker pool.

/// A unit of background work.
///
/// A task is a two-stage item: a compute stage that runs on a worker thread,
/// and a continuation that runs back on the reactor thread. The reactor folds
/// both stages into the single closure stored here when the task is built in
/// [`Reactor::submit_task`](crate::Reactor::submit_task): the closure runs the
/// compute stage, pushes the continuation (with the result bound into it) onto
/// the completion inbox, and signals the reactor's wake-up channel.
pub struct Task {
    run: Box<dyn FnOnce() + Send>,
}

impl Task {
    /// Wraps a closure to be executed on a worker thread.
    pub fn new(run: impl FnOnce() + Send + 'static) -> Self {
        Self { run: Box::new(run) }
    }

    /// A task that does nothing. Used as the shutdown sentinel that unblocks
    /// workers waiting on the queue.
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    /// Consumes the task and runs its closure.
    pub fn run(self) {
        (self.run)()
    }
}
