use parking_lot::{Condvar, Mutex};

/// Counting semaphore.
///
/// Only the worker idle path ever blocks on it; every other use is a
/// non-blocking `post`.
#[derive(Debug, Default)]
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases one permit and wakes one waiter.
    pub fn post(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        drop(permits);
        self.available.notify_one();
    }

    /// Releases `n` permits and wakes every waiter.
    pub fn post_many(&self, n: usize) {
        let mut permits = self.permits.lock();
        *permits += n;
        drop(permits);
        self.available.notify_all();
    }

    /// Blocks until a permit is available, then takes it.
    pub fn wait(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }
}
