use crate::error::NetError;
use crossbeam::queue::ArrayQueue;
use crossbeam::utils::CachePadded;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

/// What to do when a key is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPolicy {
    Overwrite,
    Fail,
}

/// Result of a successful `insert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    Inserted,
    Overwrote,
    Exists,
}

struct Cell {
    key: u64,
    value: AtomicU64,
    next: AtomicPtr<Cell>,
}

/// Lock-free hash table keyed by pointer-sized integers.
///
/// Insert-only: bindings are never unlinked, so traversal needs no
/// reclamation scheme. Each bucket is an ordered (ascending key) linked
/// list; every bucket head sits on its own cache line. Cells come from a
/// free-list pre-allocated at construction, so the insert hot path never
/// touches the allocator. Overwriting an existing key is an atomic store
/// into the live cell; the spare cell goes straight back to the free-list.
pub struct LockFreeTable {
    buckets: Box<[CachePadded<AtomicPtr<Cell>>]>,
    freelist: ArrayQueue<Box<Cell>>,
    policy: InsertPolicy,
    mask: u64,
}

impl LockFreeTable {
    /// `buckets` must be a power of two; `capacity` cells are pre-allocated.
    pub fn new(buckets: usize, capacity: usize, policy: InsertPolicy) -> Result<Self, NetError> {
        if !buckets.is_power_of_two() {
            return Err(NetError::Init("bucket count must be a power of two"));
        }
        let heads = (0..buckets)
            .map(|_| CachePadded::new(AtomicPtr::new(ptr::null_mut())))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let freelist = ArrayQueue::new(capacity.max(1));
        for _ in 0..capacity {
            let _ = freelist.push(Box::new(Cell {
                key: 0,
                value: AtomicU64::new(0),
                next: AtomicPtr::new(ptr::null_mut()),
            }));
        }
        Ok(Self {
            buckets: heads,
            freelist,
            policy,
            mask: buckets as u64 - 1,
        })
    }

    fn bucket(&self, key: u64) -> &AtomicPtr<Cell> {
        // Fibonacci multiplicative spread; the low bits of raw keys
        // (addresses, small integers) are too regular on their own.
        let spread = key.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32;
        &self.buckets[(spread & self.mask) as usize]
    }

    /// Inserts `key -> value`. `QueueFull` means the pre-allocated cells are
    /// exhausted.
    pub fn insert(&self, key: u64, value: u64) -> Result<Insert, NetError> {
        let mut cell = self.freelist.pop().ok_or(NetError::QueueFull)?;
        cell.key = key;
        *cell.value.get_mut() = value;
        *cell.next.get_mut() = ptr::null_mut();
        let raw = Box::into_raw(cell);

        let head = self.bucket(key);
        'restart: loop {
            let mut link: &AtomicPtr<Cell> = head;
            let mut cur = link.load(Ordering::Acquire);
            loop {
                if cur.is_null() {
                    // Tail: append. A previous failed splice may have left a
                    // stale successor in the new cell.
                    unsafe { (*raw).next.store(ptr::null_mut(), Ordering::Relaxed) };
                    match link.compare_exchange(
                        ptr::null_mut(),
                        raw,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return Ok(Insert::Inserted),
                        Err(_) => continue 'restart,
                    }
                }
                let cur_ref = unsafe { &*cur };
                if cur_ref.key == key {
                    let spare = unsafe { Box::from_raw(raw) };
                    let _ = self.freelist.push(spare);
                    return match self.policy {
                        InsertPolicy::Overwrite => {
                            cur_ref.value.store(value, Ordering::Release);
                            Ok(Insert::Overwrote)
                        }
                        InsertPolicy::Fail => Ok(Insert::Exists),
                    };
                }
                if cur_ref.key > key {
                    // Keep the bucket ordered: splice in before `cur`.
                    unsafe { (*raw).next.store(cur, Ordering::Relaxed) };
                    match link.compare_exchange(cur, raw, Ordering::AcqRel, Ordering::Acquire) {
                        Ok(_) => return Ok(Insert::Inserted),
                        Err(_) => continue 'restart,
                    }
                }
                link = &cur_ref.next;
                cur = link.load(Ordering::Acquire);
            }
        }
    }

    /// Looks up `key`. Never blocks.
    pub fn get(&self, key: u64) -> Option<u64> {
        let mut cur = self.bucket(key).load(Ordering::Acquire);
        while !cur.is_null() {
            let cell = unsafe { &*cur };
            if cell.key == key {
                return Some(cell.value.load(Ordering::Acquire));
            }
            if cell.key > key {
                return None;
            }
            cur = cell.next.load(Ordering::Acquire);
        }
        None
    }
}

impl Drop for LockFreeTable {
    fn drop(&mut self) {
        for head in self.buckets.iter() {
            let mut cur = head.swap(ptr::null_mut(), Ordering::Relaxed);
            while !cur.is_null() {
                let cell = unsafe { Box::from_raw(cur) };
                cur = cell.next.load(Ordering::Relaxed);
            }
        }
    }
}

impl std::fmt::Debug for LockFreeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockFreeTable")
            .field("buckets", &self.buckets.len())
            .field("policy", &self.policy)
            .finish()
    }
}
