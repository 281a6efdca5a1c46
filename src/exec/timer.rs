use super::{Task, ThreadPool};
use crate::error::NetError;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A task scheduled to run at or after a deadline.
///
/// Exactly one of `process` or `close` is invoked, each consuming the task:
/// `process` when the deadline fires normally, `close` when the task is
/// cancelled (at stack shutdown, or when the worker queue rejects the
/// firing). The close hook is responsible for releasing every resource the
/// task context owns.
pub trait DeferredTask: Send {
    fn process(self: Box<Self>);
    fn close(self: Box<Self>);
}

struct Entry {
    deadline: Instant,
    seq: u64,
    task: Box<dyn DeferredTask>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap is a max-heap; reverse so the earliest deadline surfaces.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    running: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

/// The delayed-task scheduler: a dedicated thread over a deadline min-heap.
///
/// When a deadline fires the task is forwarded to the worker pool for normal
/// execution. At shutdown, every task still in the heap has its close hook
/// invoked exactly once.
pub struct Timer {
    shared: Arc<TimerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Timer {
    pub fn new(pool: Arc<ThreadPool>) -> Self {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                running: true,
                ..TimerState::default()
            }),
            wakeup: Condvar::new(),
        });
        let thread = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("wirestack-timer".into())
                .spawn(move || timer_loop(&shared, &pool))
                .expect("spawning timer thread")
        };
        Self {
            shared,
            thread: Mutex::new(Some(thread)),
        }
    }

    /// Schedules `task` to run `delay` from now. During shutdown the task is
    /// cancelled on the spot: its close hook runs and `Shutdown` is returned.
    pub fn submit_delayed(
        &self,
        delay: Duration,
        task: Box<dyn DeferredTask>,
    ) -> Result<(), NetError> {
        let mut state = self.shared.state.lock();
        if !state.running {
            drop(state);
            task.close();
            return Err(NetError::Shutdown);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Entry {
            deadline: Instant::now() + delay,
            seq,
            task,
        });
        drop(state);
        self.wakeup();
        Ok(())
    }

    fn wakeup(&self) {
        self.shared.wakeup.notify_one();
    }

    /// Number of tasks still waiting on their deadline.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().heap.len()
    }

    /// Stops the timer thread and cancels everything still pending: each
    /// remaining task gets its close hook, exactly once.
    pub fn shutdown(&self) {
        let drained = {
            let mut state = self.shared.state.lock();
            if !state.running {
                return;
            }
            state.running = false;
            std::mem::take(&mut state.heap)
        };
        self.wakeup();
        if let Some(handle) = self.thread.lock().take()
            && handle.join().is_err()
        {
            warn!("timer thread exited with a panic");
        }
        let cancelled = drained.len();
        for entry in drained {
            entry.task.close();
        }
        if cancelled > 0 {
            debug!(cancelled, "closed deferred tasks at shutdown");
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Tick {
    Idle,
    Fire,
    Sleep(Instant),
}

fn timer_loop(shared: &TimerShared, pool: &ThreadPool) {
    debug!("timer started");
    let mut state = shared.state.lock();
    loop {
        if !state.running {
            break;
        }
        let now = Instant::now();
        let tick = match state.heap.peek() {
            None => Tick::Idle,
            Some(entry) if entry.deadline <= now => Tick::Fire,
            Some(entry) => Tick::Sleep(entry.deadline),
        };
        match tick {
            Tick::Idle => {
                shared.wakeup.wait(&mut state);
            }
            Tick::Fire => {
                let entry = state.heap.pop().expect("peeked entry");
                drop(state);
                fire(pool, entry.task);
                state = shared.state.lock();
            }
            Tick::Sleep(deadline) => {
                shared.wakeup.wait_until(&mut state, deadline);
            }
        }
    }
    debug!("timer stopped");
}

fn fire(pool: &ThreadPool, task: Box<dyn DeferredTask>) {
    if let Err(rejected) = pool.submit(Task::Deferred(task)) {
        warn!("task queue full at deadline, closing the deferred task");
        if let Task::Deferred(task) = rejected {
            task.close();
        }
    }
}
