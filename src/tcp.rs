use crate::buffer::{Buffer, Payload};
use crate::error::{NetError, Outcome};
use crate::ipv4::send::{IpDst, ip_marshal};
use crate::stack::StackInner;
use crate::transport::{TcpInfo, TransportMsg};
use crate::wire::checksum::{pseudo_checksum_v4, pseudo_checksum_v6};
use crate::wire::ipv4::proto;
use crate::wire::tcp::{TCP_HEADER_LEN, TCP_HEADER_MAX, TcpHeader};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing::warn;

/// Verifies a TCP segment and enqueues it on its flow's shard. The
/// connection state machine downstream owns everything past this point.
pub(crate) fn unmarshal(
    stack: &Arc<StackInner>,
    src_ip: IpAddr,
    payload: Payload,
) -> Result<Outcome, NetError> {
    let bytes = payload.bytes();
    let header = TcpHeader::parse(bytes)?;
    if header.reserved != 0 {
        return Err(NetError::WrongField("tcp reserved bits"));
    }
    if !(TCP_HEADER_LEN..=TCP_HEADER_MAX).contains(&header.data_offset)
        || header.data_offset > bytes.len()
    {
        return Err(NetError::WrongField("tcp data offset"));
    }
    let sum = match src_ip {
        IpAddr::V4(src) => pseudo_checksum_v4(src, stack.ipv4.addr, proto::TCP, bytes),
        IpAddr::V6(src) => pseudo_checksum_v6(src, stack.ipv6.addr, proto::TCP, bytes),
    };
    if sum != 0 {
        return Err(NetError::WrongChecksum);
    }
    let msg = TransportMsg::new(
        src_ip,
        header.src_port,
        header.dst_port,
        Some(TcpInfo {
            seqno: header.seqno,
            ackno: header.ackno,
            flags: header.flags,
            window: header.window,
        }),
        payload,
        header.data_offset,
    );
    if let Err(err) = stack.tcp.push(msg) {
        warn!("tcp message queue full, dropping the segment upstream");
        return Err(err);
    }
    Ok(Outcome::Retained)
}

/// Builds a TCP segment around `buf` and sends it through the IPv4 engine.
#[allow(clippy::too_many_arguments)]
pub(crate) fn marshal(
    stack: &Arc<StackInner>,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    seqno: u32,
    ackno: u32,
    flags: u8,
    window: u16,
    mut buf: Buffer,
) -> Result<Outcome, NetError> {
    let header = TcpHeader {
        src_port,
        dst_port,
        seqno,
        ackno,
        data_offset: TCP_HEADER_LEN,
        reserved: 0,
        flags,
        window,
        checksum: 0,
        urgent_ptr: 0,
    };
    header.emit(buf.push_header(TCP_HEADER_LEN)?);
    let sum = pseudo_checksum_v4(stack.ipv4.addr, dst_ip, proto::TCP, buf.payload());
    buf.payload_mut()[16..18].copy_from_slice(&sum.to_be_bytes());
    ip_marshal(stack, IpDst::V4(dst_ip), proto::TCP, buf)
}
