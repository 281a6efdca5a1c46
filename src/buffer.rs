use crate::error::NetError;
use crossbeam::queue::ArrayQueue;
use std::sync::Arc;

/// An owned byte region with headroom bookkeeping.
///
/// `head` bytes at the front are reserved headroom already consumed by upper
/// layers; `len` bytes after it are the live payload. Layers descend the
/// stack by prepending headers (`push_header`, which moves `head` back) and
/// ascend by stripping them (`pull_header`). The invariant
/// `head + len <= capacity` holds at all times.
///
/// A buffer has exactly one owner. Dropping it recycles the slab into the
/// pool it came from.
#[derive(Debug)]
pub struct Buffer {
    slab: Option<Box<[u8]>>,
    head: usize,
    len: usize,
    pool: Option<Arc<PoolInner>>,
}

impl Buffer {
    /// A pool-less buffer, for tests and for payloads built in place.
    pub fn standalone(capacity: usize, headroom: usize) -> Self {
        assert!(headroom <= capacity);
        Self {
            slab: Some(vec![0u8; capacity].into_boxed_slice()),
            head: headroom,
            len: 0,
            pool: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slab.as_ref().map_or(0, |s| s.len())
    }

    /// Headroom currently consumed in front of the payload.
    pub fn headroom(&self) -> usize {
        self.head
    }

    /// Live payload length.
    pub fn valid_size(&self) -> usize {
        self.len
    }

    pub fn payload(&self) -> &[u8] {
        let slab = self.slab.as_ref().expect("buffer already recycled");
        &slab[self.head..self.head + self.len]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let (head, len) = (self.head, self.len);
        let slab = self.slab.as_mut().expect("buffer already recycled");
        &mut slab[head..head + len]
    }

    /// Copies `data` into the payload region, replacing the current payload.
    pub fn fill(&mut self, data: &[u8]) -> Result<(), NetError> {
        if self.head + data.len() > self.capacity() {
            return Err(NetError::FrameTooShort);
        }
        self.len = data.len();
        self.payload_mut().copy_from_slice(data);
        Ok(())
    }

    /// Extends the payload downward by `n` header bytes and returns the new
    /// header region. Fails if the headroom is exhausted.
    pub fn push_header(&mut self, n: usize) -> Result<&mut [u8], NetError> {
        if self.head < n {
            return Err(NetError::FrameTooShort);
        }
        self.head -= n;
        self.len += n;
        Ok(&mut self.payload_mut()[..n])
    }

    /// Strips `n` header bytes off the front of the payload.
    pub fn pull_header(&mut self, n: usize) -> Result<(), NetError> {
        if self.len < n {
            return Err(NetError::FrameTooShort);
        }
        self.head += n;
        self.len -= n;
        Ok(())
    }

    pub fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.len = len;
        }
    }

    /// A mutable window over `[from - hdr, from + len)` of the payload,
    /// reaching `hdr` bytes into whatever precedes `from`: headroom for the
    /// first fragment, already-sent payload for the rest. The send engine
    /// builds each fragment's headers in place through this window.
    pub fn frame_window(&mut self, from: usize, len: usize, hdr: usize) -> &mut [u8] {
        assert!(from + len <= self.len, "window beyond payload");
        assert!(hdr <= self.head + from, "window beyond slab start");
        let start = self.head + from - hdr;
        let end = self.head + from + len;
        let slab = self.slab.as_mut().expect("buffer already recycled");
        &mut slab[start..end]
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let (Some(slab), Some(pool)) = (self.slab.take(), self.pool.take()) {
            // Full: the pool shrank after a config reload, let the slab go.
            let _ = pool.slabs.push(slab);
        }
    }
}

/// A datagram payload on its way up the stack: either the live frame buffer
/// (fast path) or the contiguous bytes a reassembly produced.
#[derive(Debug)]
pub enum Payload {
    Frame(Buffer),
    Assembled(Vec<u8>),
}

impl Payload {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Payload::Frame(buf) => buf.payload(),
            Payload::Assembled(data) => data,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }
}

#[derive(Debug)]
struct PoolInner {
    slabs: ArrayQueue<Box<[u8]>>,
    slab_size: usize,
}

/// Fixed-size slab pool with a lock-free free-list.
///
/// Slabs are pre-reserved at startup; `acquire` never allocates. Cloning the
/// pool clones a handle to the same free-list.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    pub fn new(slabs: usize, slab_size: usize) -> Self {
        let queue = ArrayQueue::new(slabs.max(1));
        for _ in 0..slabs {
            let _ = queue.push(vec![0u8; slab_size].into_boxed_slice());
        }
        Self {
            inner: Arc::new(PoolInner { slabs: queue, slab_size }),
        }
    }

    /// Takes a slab off the free-list with `headroom` bytes pre-consumed.
    pub fn acquire(&self, headroom: usize) -> Result<Buffer, NetError> {
        debug_assert!(headroom <= self.inner.slab_size);
        let slab = self.inner.slabs.pop().ok_or(NetError::PoolExhausted)?;
        Ok(Buffer {
            slab: Some(slab),
            head: headroom,
            len: 0,
            pool: Some(Arc::clone(&self.inner)),
        })
    }

    /// Acquires a buffer and copies `payload` into it.
    pub fn acquire_with(&self, headroom: usize, payload: &[u8]) -> Result<Buffer, NetError> {
        let mut buf = self.acquire(headroom)?;
        buf.fill(payload)?;
        Ok(buf)
    }

    /// Number of slabs currently free.
    pub fn available(&self) -> usize {
        self.inner.slabs.len()
    }

    pub fn slab_size(&self) -> usize {
        self.inner.slab_size
    }
}
