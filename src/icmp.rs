use crate::buffer::Payload;
use crate::error::{NetError, Outcome};
use crate::ipv4::send::{IpDst, ip_marshal};
use crate::stack::StackInner;
use crate::wire::checksum::internet_checksum;
use crate::wire::icmp::{ECHO_REPLY, ECHO_REQUEST, ICMP_HEADER_LEN, IcmpHeader};
use crate::wire::ipv4::proto;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::debug;

/// Handles an ICMPv4 message. Echo requests are answered through the send
/// engine; everything else is dropped.
pub(crate) fn unmarshal(
    stack: &Arc<StackInner>,
    src_ip: Ipv4Addr,
    payload: Payload,
) -> Result<Outcome, NetError> {
    let bytes = payload.bytes();
    let header = IcmpHeader::parse(bytes)?;
    if internet_checksum(bytes) != 0 {
        return Err(NetError::WrongChecksum);
    }
    match header.icmp_type {
        ECHO_REQUEST => {
            debug!(%src_ip, ident = header.ident, seqno = header.seqno, "echo request");
            send_echo(
                stack,
                src_ip,
                ECHO_REPLY,
                header.ident,
                header.seqno,
                &bytes[ICMP_HEADER_LEN..],
            )?;
            Ok(Outcome::Delivered)
        }
        ECHO_REPLY => {
            debug!(%src_ip, ident = header.ident, seqno = header.seqno, "echo reply");
            Ok(Outcome::Delivered)
        }
        _ => Err(NetError::NotImplemented),
    }
}

/// Builds an echo message and sends it via the IPv4 engine.
pub(crate) fn send_echo(
    stack: &Arc<StackInner>,
    dst_ip: Ipv4Addr,
    icmp_type: u8,
    ident: u16,
    seqno: u16,
    data: &[u8],
) -> Result<Outcome, NetError> {
    let mut buf = stack.pool.acquire(stack.config.headroom)?;
    let header = IcmpHeader {
        icmp_type,
        code: 0,
        checksum: 0,
        ident,
        seqno,
    };
    let mut message = vec![0u8; ICMP_HEADER_LEN + data.len()];
    header.emit(&mut message);
    message[ICMP_HEADER_LEN..].copy_from_slice(data);
    let sum = internet_checksum(&message);
    message[2..4].copy_from_slice(&sum.to_be_bytes());
    buf.fill(&message)?;
    ip_marshal(stack, IpDst::V4(dst_ip), proto::ICMP, buf)
}
