//! Blocking FIFO shared between task producers and the worker threads.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::task::Task;

/// A multiple-producer/multiple-consumer work queue.
///
/// `push` enqueues and signals one waiter; `pop` blocks on the condition
/// variable until a task is available. The queue is unbounded and makes no
/// fairness promises beyond what the underlying primitives provide.
pub struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
    available: Condvar,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    pub fn push(&self, task: Task) {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.push_back(task);
        self.available.notify_one();
    }

    /// Blocks the calling thread until a task is available.
    pub fn pop(&self) -> Task {
        let mut tasks = self.tasks.lock().unwrap();
        // The loop predicate also covers spurious wake-ups.
        while tasks.is_empty() {
            tasks = self.available.wait(tasks).unwrap();
        }
        tasks.pop_front().expect("queue is non-empty after wait")
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
