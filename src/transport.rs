use crate::buffer::Payload;
use crate::error::NetError;
use crate::sync::BdQueue;
use std::net::IpAddr;

/// TCP header fields the downstream state machine needs; `None` for UDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpInfo {
    pub seqno: u32,
    pub ackno: u32,
    pub flags: u8,
    pub window: u16,
}

/// A verified transport segment waiting for its consumer.
///
/// The payload storage (frame buffer or reassembled bytes) is owned by the
/// message; popping it off the queue transfers that ownership onward.
#[derive(Debug)]
pub struct TransportMsg {
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub tcp: Option<TcpInfo>,
    payload: Payload,
    data_off: usize,
}

impl TransportMsg {
    pub fn new(
        src_ip: IpAddr,
        src_port: u16,
        dst_port: u16,
        tcp: Option<TcpInfo>,
        payload: Payload,
        data_off: usize,
    ) -> Self {
        Self {
            src_ip,
            src_port,
            dst_port,
            tcp,
            payload,
            data_off,
        }
    }

    /// The segment body, headers stripped.
    pub fn data(&self) -> &[u8] {
        &self.payload.bytes()[self.data_off..]
    }
}

/// Sharded message queues: one consumer per shard sees every segment of a
/// given flow in arrival order, because the shard index is a pure function
/// of the flow tuple.
pub struct TransportQueues {
    queues: Box<[BdQueue<TransportMsg>]>,
    mask: usize,
}

impl TransportQueues {
    /// `shards` must be a power of two.
    pub fn new(shards: usize, capacity: usize) -> Self {
        debug_assert!(shards.is_power_of_two());
        let queues = (0..shards)
            .map(|_| BdQueue::new(capacity))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            queues,
            mask: shards - 1,
        }
    }

    pub fn shard_of(&self, src_ip: IpAddr, src_port: u16, dst_port: u16) -> usize {
        let ip_sum: u64 = match src_ip {
            IpAddr::V4(ip) => u64::from(u32::from(ip)),
            IpAddr::V6(ip) => {
                let bits = u128::from(ip);
                (bits as u64) ^ ((bits >> 64) as u64)
            }
        };
        let sum = ip_sum
            .wrapping_add(u64::from(src_port))
            .wrapping_add(u64::from(dst_port));
        (sum as usize) & self.mask
    }

    /// Enqueues onto the flow's shard; the message comes back on overflow so
    /// the caller can drop its buffer.
    pub fn push(&self, msg: TransportMsg) -> Result<(), NetError> {
        let shard = self.shard_of(msg.src_ip, msg.src_port, msg.dst_port);
        self.queues[shard].push(msg).map_err(|_| NetError::QueueFull)
    }

    pub fn poll(&self, shard: usize) -> Option<TransportMsg> {
        self.queues[shard & self.mask].pop()
    }

    pub fn shards(&self) -> usize {
        self.queues.len()
    }
}
