//! Fragment reassembly: partial-arrival state keyed by (source IP,
//! identification), with duplicate suppression and an adaptive give-up
//! timer per entry.

use crate::buffer::{Buffer, Payload};
use crate::error::{NetError, Outcome};
use crate::exec::DeferredTask;
use crate::stack::StackInner;
use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, trace};

fn frag_key(src_ip: Ipv4Addr, id: u16) -> u64 {
    (u64::from(u32::from(src_ip)) << 16) | u64::from(id)
}

struct EntryState {
    /// Unknown until the fragment with MF=0 arrives.
    whole_size: Option<u32>,
    /// Grows on demand as fragments land; its length is the high-water mark.
    data: Vec<u8>,
    /// Offsets received so far; rejects duplicates.
    seg_set: BTreeSet<u32>,
    received: u32,
    /// Adaptive time-to-live: shrinks as fragments arrive, grows on every
    /// idle re-check until it crosses the give-up deadline.
    ttl: Duration,
    closed: bool,
}

pub(crate) struct ReassemblyEntry {
    key: u64,
    src_ip: Ipv4Addr,
    proto: u8,
    state: Mutex<EntryState>,
}

impl ReassemblyEntry {
    fn new(key: u64, src_ip: Ipv4Addr, proto: u8, ttl: Duration) -> Self {
        Self {
            key,
            src_ip,
            proto,
            state: Mutex::new(EntryState {
                whole_size: None,
                data: Vec::new(),
                seg_set: BTreeSet::new(),
                received: 0,
                ttl,
                closed: false,
            }),
        }
    }
}

type Shard = CachePadded<Mutex<HashMap<u64, Arc<ReassemblyEntry>>>>;

/// The sharded reassembly table. The shard lock covers only table lookup
/// and mutation; entry contents are protected by the entry's own mutex.
pub(crate) struct ReassemblyTable {
    shards: Box<[Shard]>,
    mask: u64,
}

impl ReassemblyTable {
    pub(crate) fn new(shards: usize) -> Self {
        debug_assert!(shards.is_power_of_two());
        let shards = (0..shards)
            .map(|_| CachePadded::new(Mutex::new(HashMap::new())))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let mask = shards.len() as u64 - 1;
        Self { shards, mask }
    }

    fn shard(&self, key: u64) -> &Shard {
        let spread = key.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32;
        &self.shards[(spread & self.mask) as usize]
    }

    /// In-progress reassemblies, summed over all shards.
    pub(crate) fn pending(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Current adaptive TTL of the `(src_ip, id)` entry, if one is open.
    pub(crate) fn entry_ttl(&self, src_ip: Ipv4Addr, id: u16) -> Option<Duration> {
        let key = frag_key(src_ip, id);
        let entry = self.shard(key).lock().get(&key).cloned()?;
        let state = entry.state.lock();
        (!state.closed).then_some(state.ttl)
    }
}

/// Routes one validated fragment (or whole datagram) into the engine.
///
/// Unfragmented packets take the fast path straight to dispatch. Fragments
/// land in their `(src_ip, id)` entry; the completing fragment hands the
/// whole message to dispatch inline.
pub(crate) fn assemble(
    stack: &Arc<StackInner>,
    src_ip: Ipv4Addr,
    proto: u8,
    id: u16,
    buf: Buffer,
    offset: u32,
    more_frag: bool,
    dont_frag: bool,
) -> Result<Outcome, NetError> {
    if dont_frag || (!more_frag && offset == 0) {
        return super::handle(stack, src_ip, proto, Payload::Frame(buf));
    }

    let len = buf.valid_size() as u32;
    let key = frag_key(src_ip, id);
    let table = &stack.ipv4.reassembly;
    loop {
        let entry = {
            let mut shard = table.shard(key).lock();
            match shard.get(&key) {
                Some(entry) => Arc::clone(entry),
                None => {
                    if shard.len() >= stack.config.shard_capacity {
                        return Err(NetError::QueueFull);
                    }
                    let entry = Arc::new(ReassemblyEntry::new(
                        key,
                        src_ip,
                        proto,
                        stack.config.retry_recv,
                    ));
                    shard.insert(key, Arc::clone(&entry));
                    entry
                }
            }
        };

        let mut state = entry.state.lock();
        if state.closed {
            // Raced with a close between lookup and lock; the closer is
            // unlinking the entry right now, go find or create a fresh one.
            drop(state);
            continue;
        }
        // A duplicate must leave the entry untouched, so it is rejected
        // before any bookkeeping moves.
        if !state.seg_set.insert(offset) {
            debug!(%src_ip, id, offset, "duplicate fragment");
            return Err(NetError::DuplicateFragment(offset));
        }
        if state.seg_set.len() > 1 {
            // Another fragment arrived, wait less.
            state.ttl = state.ttl.div_f64(1.5);
        }
        if !more_frag && state.whole_size.is_none() {
            state.whole_size = Some(offset + len);
        }
        let needed = (offset + len) as usize;
        if state.data.len() < needed {
            state.data.resize(needed, 0);
        }
        state.data[offset as usize..needed].copy_from_slice(buf.payload());
        state.received += len;
        trace!(
            %src_ip, id, offset, len,
            received = state.received, whole = ?state.whole_size,
            "fragment stored"
        );

        let complete = state.whole_size == Some(state.received);
        let ttl = state.ttl;
        drop(state);
        drop(buf);

        if complete {
            finish(stack, &entry)?;
        } else {
            schedule_check(stack, &entry, ttl);
        }
        return Ok(Outcome::Retained);
    }
}

/// Hands a completed message to dispatch and tears the entry down. The
/// first caller to flip `closed` wins; everyone else is a no-op.
fn finish(stack: &Arc<StackInner>, entry: &Arc<ReassemblyEntry>) -> Result<Outcome, NetError> {
    let data = {
        let mut state = entry.state.lock();
        if state.closed {
            return Ok(Outcome::Retained);
        }
        state.closed = true;
        std::mem::take(&mut state.data)
    };
    unlink(stack, entry);
    debug!(src_ip = %entry.src_ip, size = data.len(), "reassembled a message");
    super::handle(stack, entry.src_ip, entry.proto, Payload::Assembled(data))
}

/// Discards a partial entry: give-up deadline crossed, or stack shutdown.
fn abandon(stack: &Arc<StackInner>, entry: &Arc<ReassemblyEntry>) {
    let received = {
        let mut state = entry.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.data = Vec::new();
        state.seg_set.clear();
        state.received
    };
    unlink(stack, entry);
    debug!(src_ip = %entry.src_ip, received, "gave up on a partial message");
}

fn unlink(stack: &StackInner, entry: &Arc<ReassemblyEntry>) {
    let mut shard = stack.ipv4.reassembly.shard(entry.key).lock();
    if let Some(current) = shard.get(&entry.key)
        && Arc::ptr_eq(current, entry)
    {
        shard.remove(&entry.key);
    }
}

fn schedule_check(stack: &Arc<StackInner>, entry: &Arc<ReassemblyEntry>, ttl: Duration) {
    let check = Box::new(ReassemblyCheck {
        stack: Arc::downgrade(stack),
        entry: Arc::clone(entry),
    });
    // During shutdown the close hook has already run; nothing left to do.
    let _ = stack.timer.submit_delayed(ttl, check);
}

struct ReassemblyCheck {
    stack: Weak<StackInner>,
    entry: Arc<ReassemblyEntry>,
}

enum Verdict {
    Finish,
    Abandon,
    Recheck(Duration),
    Done,
}

impl DeferredTask for ReassemblyCheck {
    fn process(self: Box<Self>) {
        let Some(stack) = self.stack.upgrade() else {
            return;
        };
        let verdict = {
            let mut state = self.entry.state.lock();
            if state.closed {
                Verdict::Done
            } else {
                state.ttl = state.ttl.mul_f64(1.5);
                if state.ttl >= stack.config.giveup_recv {
                    Verdict::Abandon
                } else if state.whole_size == Some(state.received) {
                    Verdict::Finish
                } else {
                    Verdict::Recheck(state.ttl)
                }
            }
        };
        match verdict {
            Verdict::Finish => {
                if let Err(err) = finish(&stack, &self.entry) {
                    debug!(error = %err, "error handling a reassembled message");
                }
            }
            Verdict::Abandon => abandon(&stack, &self.entry),
            Verdict::Recheck(ttl) => schedule_check(&stack, &self.entry, ttl),
            Verdict::Done => {}
        }
    }

    fn close(self: Box<Self>) {
        let Some(stack) = self.stack.upgrade() else {
            return;
        };
        abandon(&stack, &self.entry);
    }
}
