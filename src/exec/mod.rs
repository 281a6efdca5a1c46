//! The event core: a fixed worker pool executing small one-shot tasks, plus
//! a timer thread for deadline-deferred tasks.

pub mod timer;

use crate::sync::{BdQueue, Semaphore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

pub use timer::{DeferredTask, Timer};

/// A one-shot unit of work. The worker that dequeues it owns its context
/// until it returns; tasks run to completion and never block except on the
/// idle semaphore.
pub enum Task {
    Once(Box<dyn FnOnce() + Send>),
    /// A deferred task forwarded by the timer after its deadline fired.
    /// Kept as its own variant so an overflowing queue can still reach the
    /// close hook.
    Deferred(Box<dyn DeferredTask>),
}

impl Task {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Task::Once(Box::new(f))
    }

    fn run(self) {
        match self {
            Task::Once(f) => f(),
            Task::Deferred(d) => d.process(),
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Task::Once(_) => f.write_str("Task::Once"),
            Task::Deferred(_) => f.write_str("Task::Deferred"),
        }
    }
}

struct PoolShared {
    queue: BdQueue<Task>,
    idle: Semaphore,
    running: AtomicBool,
}

/// Fixed set of worker threads draining the shared task queue.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    pub fn new(workers: usize, queue_size: usize) -> Self {
        let shared = Arc::new(PoolShared {
            queue: BdQueue::new(queue_size),
            idle: Semaphore::new(),
            running: AtomicBool::new(true),
        });
        let handles = (0..workers)
            .map(|i| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("wirestack-worker-{i}"))
                    .spawn(move || worker_loop(i, &shared))
                    .expect("spawning worker thread")
            })
            .collect();
        debug!(workers, queue_size, "thread pool initialized");
        Self {
            shared,
            workers: Mutex::new(handles),
        }
    }

    /// Enqueues a task and wakes one worker. The task is handed back when
    /// the queue is full or the pool is shutting down; the caller must then
    /// drop the in-flight work it was going to hand off.
    pub fn submit(&self, task: Task) -> Result<(), Task> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(task);
        }
        self.shared.queue.push(task)?;
        self.shared.idle.post();
        Ok(())
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Stops accepting tasks, wakes every worker and joins them. Workers
    /// drain what is already queued before exiting.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let handles = std::mem::take(&mut *self.workers.lock());
        self.shared.idle.post_many(handles.len());
        for handle in handles {
            if handle.join().is_err() {
                warn!("worker exited with a panic");
            }
        }
        debug!("thread pool stopped");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(index: usize, shared: &PoolShared) {
    debug!(worker = index, "worker started");
    loop {
        match shared.queue.pop() {
            Some(task) => task.run(),
            None => {
                if !shared.running.load(Ordering::Acquire) {
                    break;
                }
                shared.idle.wait();
            }
        }
    }
    debug!(worker = index, "worker stopped");
}
