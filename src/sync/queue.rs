use crossbeam::queue::ArrayQueue;

/// Bounded, lock-free, multi-producer multi-consumer queue.
///
/// Neither operation ever blocks. A rejected element is handed back to the
/// caller so owned resources (buffers, in-flight records) can be released on
/// overflow. No global FIFO ordering is guaranteed across producers.
#[derive(Debug)]
pub struct BdQueue<T> {
    inner: ArrayQueue<T>,
}

impl<T> BdQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: ArrayQueue::new(capacity),
        }
    }

    /// Enqueues `elem`, or returns it when the queue is full.
    pub fn push(&self, elem: T) -> Result<(), T> {
        self.inner.push(elem)
    }

    /// Dequeues one element, if any.
    pub fn pop(&self) -> Option<T> {
        self.inner.pop()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}
