//! The IPv4 engine: header validation and transport dispatch on the way up,
//! with the reassembly and slice/retry machinery in the submodules.

pub mod reassembly;
pub mod send;

use crate::buffer::{Buffer, Payload};
use crate::config::NetConfig;
use crate::error::{NetError, Outcome};
use crate::stack::StackInner;
use crate::wire::ipv4::{IPV4_HEADER_LEN, Ipv4Header, proto};
use crate::{icmp, tcp, udp};
use reassembly::ReassemblyTable;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use tracing::trace;

pub struct Ipv4 {
    pub addr: Ipv4Addr,
    /// Identification counter for outgoing messages; wraps at 16 bits.
    next_id: AtomicU16,
    pub(crate) reassembly: ReassemblyTable,
}

impl Ipv4 {
    pub fn new(addr: Ipv4Addr, config: &NetConfig) -> Self {
        Self {
            addr,
            next_id: AtomicU16::new(0),
            reassembly: ReassemblyTable::new(config.reassembly_shards),
        }
    }

    pub(crate) fn alloc_id(&self) -> u16 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Validates a received IPv4 packet and feeds it to the reassembly engine.
pub(crate) fn unmarshal(stack: &Arc<StackInner>, mut buf: Buffer) -> Result<Outcome, NetError> {
    let header = Ipv4Header::parse(buf.payload())?;
    if header.version != 4 {
        return Err(NetError::WrongField("version"));
    }
    let total_len = usize::from(header.total_len);
    if total_len != buf.valid_size() {
        return Err(NetError::WrongField("total length"));
    }
    if total_len < header.ihl {
        return Err(NetError::WrongField("total length"));
    }
    if !Ipv4Header::verify_checksum(buf.payload()) {
        return Err(NetError::WrongChecksum);
    }
    if header.dst != stack.ipv4.addr {
        return Err(NetError::WrongIpAddress);
    }
    if header.reserved_flag || (header.dont_fragment && header.more_fragments) {
        return Err(NetError::WrongField("fragment flags"));
    }

    // We just received a frame from this peer, so the link layer has seen
    // its MAC; a missing binding here is a local invariant violation.
    if stack.arp.lookup(header.src).is_err() {
        panic!(
            "received an IPv4 packet from {} without a MAC binding for it",
            header.src
        );
    }

    trace!(
        src = %header.src, id = header.id, offset = header.offset,
        mf = header.more_fragments, df = header.dont_fragment,
        len = total_len, "ipv4 packet"
    );
    buf.pull_header(header.ihl)?;
    reassembly::assemble(
        stack,
        header.src,
        header.proto,
        header.id,
        buf,
        header.offset,
        header.more_fragments,
        header.dont_fragment,
    )
}

/// Dispatches a complete IP message to its transport.
pub(crate) fn handle(
    stack: &Arc<StackInner>,
    src_ip: Ipv4Addr,
    protocol: u8,
    payload: Payload,
) -> Result<Outcome, NetError> {
    match protocol {
        proto::ICMP => icmp::unmarshal(stack, src_ip, payload),
        proto::UDP => udp::unmarshal(stack, IpAddr::V4(src_ip), payload),
        proto::TCP => tcp::unmarshal(stack, IpAddr::V4(src_ip), payload),
        other => Err(NetError::WrongProtocol(other)),
    }
}

/// Space the send path needs in front of an IPv4 payload.
pub(crate) const IPV4_SEND_RESERVE: usize =
    IPV4_HEADER_LEN + crate::wire::ethernet::ETHERNET_HEADER_LEN;
