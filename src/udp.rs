use crate::buffer::{Buffer, Payload};
use crate::error::{NetError, Outcome};
use crate::ipv4::send::{IpDst, ip_marshal};
use crate::stack::StackInner;
use crate::transport::TransportMsg;
use crate::wire::checksum::{pseudo_checksum_v4, pseudo_checksum_v6};
use crate::wire::ipv4::proto;
use crate::wire::udp::{UDP_HEADER_LEN, UdpHeader};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

/// Verifies a UDP datagram and enqueues it for its consumer.
pub(crate) fn unmarshal(
    stack: &Arc<StackInner>,
    src_ip: IpAddr,
    payload: Payload,
) -> Result<Outcome, NetError> {
    let bytes = payload.bytes();
    let header = UdpHeader::parse(bytes)?;
    if usize::from(header.len) != bytes.len() {
        return Err(NetError::WrongField("udp length"));
    }
    // A zero checksum means the sender didn't compute one.
    if header.checksum != 0 {
        let sum = match src_ip {
            IpAddr::V4(src) => pseudo_checksum_v4(src, stack.ipv4.addr, proto::UDP, bytes),
            IpAddr::V6(src) => pseudo_checksum_v6(src, stack.ipv6.addr, proto::UDP, bytes),
        };
        if sum != 0 {
            return Err(NetError::WrongChecksum);
        }
    }
    let msg = TransportMsg::new(
        src_ip,
        header.src_port,
        header.dst_port,
        None,
        payload,
        UDP_HEADER_LEN,
    );
    stack.udp.push(msg)?;
    Ok(Outcome::Retained)
}

/// Wraps `buf` in a UDP header and sends it through the IPv4 engine.
pub(crate) fn marshal(
    stack: &Arc<StackInner>,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    mut buf: Buffer,
) -> Result<Outcome, NetError> {
    let len = (buf.valid_size() + UDP_HEADER_LEN) as u16;
    let header = UdpHeader {
        src_port,
        dst_port,
        len,
        checksum: 0,
    };
    header.emit(buf.push_header(UDP_HEADER_LEN)?);
    let sum = pseudo_checksum_v4(stack.ipv4.addr, dst_ip, proto::UDP, buf.payload());
    // All-zero is reserved for "no checksum"; transmit its complement.
    let sum = if sum == 0 { 0xFFFF } else { sum };
    buf.payload_mut()[6..8].copy_from_slice(&sum.to_be_bytes());
    ip_marshal(stack, IpDst::V4(dst_ip), proto::UDP, buf)
}
