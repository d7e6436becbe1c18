//! Fixed pool of background threads draining the task queue.
//!
//! Workers exist to take CPU- or blocking-bound work off the reactor thread.
//! They never touch reactor state: the only cross-thread interaction a task
//! may perform is pushing a completion onto the reactor's inbox and raising
//! its wake-up channel, and that interaction is baked into the task closure
//! before it ever reaches the queue.

pub mod queue;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use metrics::{counter, gauge};

use self::queue::TaskQueue;
use crate::task::Task;

/// A fixed set of worker threads fed from a shared [`TaskQueue`].
pub struct WorkerPool {
    queue: Arc<TaskQueue>,
    stop: Arc<AtomicBool>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero: a pool with no workers would accept tasks
    /// that can never run.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "worker pool needs at least one thread");

        let queue = Arc::new(TaskQueue::new());
        let stop = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let queue = Arc::clone(&queue);
            let stop = Arc::clone(&stop);
            let builder = thread::Builder::new().name(format!("worker-{id}"));
            let handle = builder
                .spawn(move || worker_loop(id, &queue, &stop))
                .expect("failed to spawn worker thread");
            workers.push(handle);
        }

        Self {
            queue,
            stop,
            workers,
        }
    }

    /// Enqueues a task for execution on some worker thread.
    pub fn submit(&self, task: Task) {
        self.queue.push(task);
        counter!("reflow_tasks_submitted_total").increment(1);
        gauge!("reflow_task_queue_depth").set(self.queue.len() as f64);
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }
}

fn worker_loop(id: usize, queue: &TaskQueue, stop: &AtomicBool) {
    while !stop.load(Ordering::Acquire) {
        let task = queue.pop();
        gauge!("reflow_task_queue_depth").set(queue.len() as f64);

        // A panicking compute stage is a programmer error in the submitted
        // closure; it must not take the worker down with it.
        if panic::catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
            counter!("reflow_worker_panics_total", "worker_id" => id.to_string()).increment(1);
            log::error!("worker-{id}: task panicked, worker keeps running");
        }
    }
}

impl Drop for WorkerPool {
    /// Stops the pool: raises the stop flag, enqueues one sentinel per worker
    /// so every blocked `pop` returns, then joins the threads. Tasks still
    /// queued behind the sentinels are dropped.
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        for _ in 0..self.workers.len() {
            self.queue.push(Task::noop());
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("worker thread terminated abnormally");
            }
        }
    }
}
