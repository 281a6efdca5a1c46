use crate::error::NetError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the whole stack.
///
/// Every timing constant the engines rely on lives here so that deployments
/// (and deterministic tests) agree on one set of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetConfig {
    /// Number of worker threads executing one-shot tasks.
    pub workers: usize,
    /// Capacity of the shared task queue.
    pub task_queue_size: usize,
    /// Number of reassembly shards. Must be a power of two.
    pub reassembly_shards: usize,
    /// Maximum in-progress reassemblies per shard.
    pub shard_capacity: usize,
    /// Number of transport message queues. Must be a power of two.
    pub transport_queues: usize,
    /// Capacity of each transport message queue.
    pub transport_queue_size: usize,
    /// Number of slabs pre-reserved in the buffer pool.
    pub pool_slabs: usize,
    /// Size of one pool slab in bytes. Bounds the largest logical datagram
    /// the send engine can slice, so it is several MTUs worth.
    pub slab_size: usize,
    /// Headroom consumed up-front on every acquired buffer, large enough
    /// for all lower-layer headers plus the device's own reserve.
    pub headroom: usize,
    /// IPv4 payload bytes per fragment (1500 minus the 20-byte header).
    pub mtu_payload: usize,
    /// Packets at most this big are guaranteed unfragmented end to end.
    pub min_no_frag: usize,
    /// First retry interval when a send attempt fails at the link layer.
    pub retry_send: Duration,
    /// Hard deadline after which an outgoing message is abandoned.
    pub giveup_send: Duration,
    /// Initial time-to-live of a partially reassembled message.
    pub retry_recv: Duration,
    /// Hard deadline after which a partial reassembly is discarded.
    pub giveup_recv: Duration,
    /// First retry interval while waiting for an ARP/NDP resolution.
    pub arp_wait: Duration,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            task_queue_size: 512,
            reassembly_shards: 16,
            shard_capacity: 1024,
            transport_queues: 16,
            transport_queue_size: 128,
            pool_slabs: 256,
            slab_size: 8192,
            headroom: 64,
            mtu_payload: 1480,
            min_no_frag: 576,
            retry_send: Duration::from_millis(50),
            giveup_send: Duration::from_secs(2),
            retry_recv: Duration::from_millis(100),
            giveup_recv: Duration::from_secs(10),
            arp_wait: Duration::from_millis(150),
        }
    }
}

impl NetConfig {
    pub fn validate(&self) -> Result<(), NetError> {
        if self.workers == 0 {
            return Err(NetError::Init("worker count must be at least 1"));
        }
        if self.task_queue_size == 0 || self.transport_queue_size == 0 {
            return Err(NetError::Init("queue sizes must be at least 1"));
        }
        if !self.reassembly_shards.is_power_of_two() {
            return Err(NetError::Init("reassembly shard count must be a power of two"));
        }
        if !self.transport_queues.is_power_of_two() {
            return Err(NetError::Init("transport queue count must be a power of two"));
        }
        if self.mtu_payload % 8 != 0 {
            return Err(NetError::Init("MTU payload must be a multiple of 8"));
        }
        if self.slab_size < self.headroom + self.mtu_payload {
            return Err(NetError::Init("slab too small for headroom plus one fragment"));
        }
        if self.giveup_send <= self.retry_send || self.giveup_recv <= self.retry_recv {
            return Err(NetError::Init("give-up deadline must exceed the first retry"));
        }
        Ok(())
    }
}
