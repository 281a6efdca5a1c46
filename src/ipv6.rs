//! Thin IPv6 sibling of the IPv4 engine: fixed-header validation and
//! dispatch on receive, single-frame sends (no fragmentation), and the NDP
//! neighbor solicit/advertise pair behind the address-resolution gate.

use crate::buffer::{Buffer, Payload};
use crate::error::{NetError, Outcome};
use crate::stack::StackInner;
use crate::wire::checksum::pseudo_checksum_v6;
use crate::wire::ethernet::ETHERNET_HEADER_LEN;
use crate::wire::icmp::{
    NDP_NEIGHBOR_ADVERTISE, NDP_NEIGHBOR_SOLICIT, NDP_PACKET_LEN, NdpPacket,
};
use crate::wire::ipv6::{IPV6_HEADER_LEN, Ipv6Header};
use crate::wire::{EtherType, MacAddr};
use crate::{tcp, udp};
use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct Ipv6 {
    pub addr: Ipv6Addr,
}

pub(crate) fn unmarshal(stack: &Arc<StackInner>, mut buf: Buffer) -> Result<Outcome, NetError> {
    let header = Ipv6Header::parse(buf.payload())?;
    if header.version != 6 {
        return Err(NetError::WrongField("version"));
    }
    if usize::from(header.payload_len) != buf.valid_size() - IPV6_HEADER_LEN {
        return Err(NetError::WrongField("payload length"));
    }
    let multicast = header.dst.octets()[0] == 0xFF;
    if header.dst != stack.ipv6.addr && !multicast {
        return Err(NetError::WrongIpAddress);
    }
    buf.pull_header(IPV6_HEADER_LEN)?;
    match header.next_header {
        crate::wire::ipv4::proto::ICMPV6 => {
            ndp_unmarshal(stack, header.src, header.dst, Payload::Frame(buf))
        }
        crate::wire::ipv4::proto::UDP => {
            udp::unmarshal(stack, IpAddr::V6(header.src), Payload::Frame(buf))
        }
        crate::wire::ipv4::proto::TCP => {
            tcp::unmarshal(stack, IpAddr::V6(header.src), Payload::Frame(buf))
        }
        other => Err(NetError::WrongProtocol(other)),
    }
}

fn ndp_unmarshal(
    stack: &Arc<StackInner>,
    src: Ipv6Addr,
    dst: Ipv6Addr,
    payload: Payload,
) -> Result<Outcome, NetError> {
    let bytes = payload.bytes();
    if pseudo_checksum_v6(src, dst, crate::wire::ipv4::proto::ICMPV6, bytes) != 0 {
        return Err(NetError::WrongChecksum);
    }
    let packet = NdpPacket::parse(bytes)?;
    match packet.ndp_type {
        NDP_NEIGHBOR_SOLICIT => {
            stack.arp.learn_v6(src, packet.link_addr);
            if packet.target == stack.ipv6.addr {
                debug!(%src, "answering a neighbor solicitation");
                if let Err(err) = send_neighbor_advertise(stack, src, packet.link_addr) {
                    warn!(error = %err, "failed to advertise our address");
                }
            }
            Ok(Outcome::Delivered)
        }
        NDP_NEIGHBOR_ADVERTISE => {
            stack.arp.learn_v6(packet.target, packet.link_addr);
            Ok(Outcome::Delivered)
        }
        _ => Err(NetError::NotImplemented),
    }
}

/// Sends the payload as exactly one frame, building the header through an
/// in-place window so the owner can retry the buffer untouched on failure.
pub(crate) fn send_once(
    stack: &StackInner,
    dst: Ipv6Addr,
    dst_mac: MacAddr,
    next_header: u8,
    buf: &mut Buffer,
) -> Result<(), NetError> {
    let len = buf.valid_size();
    let window = buf.frame_window(0, len, ETHERNET_HEADER_LEN + IPV6_HEADER_LEN);
    let header = Ipv6Header {
        version: 6,
        payload_len: len as u16,
        next_header,
        hop_limit: 0xFF,
        src: stack.ipv6.addr,
        dst,
    };
    header.emit(&mut window[ETHERNET_HEADER_LEN..ETHERNET_HEADER_LEN + IPV6_HEADER_LEN]);
    stack.ether.marshal_into(dst_mac, EtherType::IPV6, window)
}

/// Solicits the MAC of `target` via its solicited-node multicast group.
pub(crate) fn send_neighbor_solicit(stack: &StackInner, target: Ipv6Addr) -> Result<(), NetError> {
    let dst = solicited_node(target);
    let packet = NdpPacket {
        ndp_type: NDP_NEIGHBOR_SOLICIT,
        target,
        link_addr: stack.ether.mac,
    };
    debug!(%target, "sending a neighbor solicitation");
    transmit_ndp(stack, dst, multicast_mac(dst), &packet)
}

fn send_neighbor_advertise(
    stack: &StackInner,
    dst: Ipv6Addr,
    dst_mac: MacAddr,
) -> Result<(), NetError> {
    let packet = NdpPacket {
        ndp_type: NDP_NEIGHBOR_ADVERTISE,
        target: stack.ipv6.addr,
        link_addr: stack.ether.mac,
    };
    transmit_ndp(stack, dst, dst_mac, &packet)
}

fn transmit_ndp(
    stack: &StackInner,
    dst: Ipv6Addr,
    dst_mac: MacAddr,
    packet: &NdpPacket,
) -> Result<(), NetError> {
    let mut message = [0u8; NDP_PACKET_LEN];
    packet.emit(&mut message);
    let sum = pseudo_checksum_v6(
        stack.ipv6.addr,
        dst,
        crate::wire::ipv4::proto::ICMPV6,
        &message,
    );
    message[2..4].copy_from_slice(&sum.to_be_bytes());

    let mut buf = stack.pool.acquire(stack.config.headroom)?;
    buf.fill(&message)?;
    let header = Ipv6Header {
        version: 6,
        payload_len: NDP_PACKET_LEN as u16,
        next_header: crate::wire::ipv4::proto::ICMPV6,
        hop_limit: 0xFF,
        src: stack.ipv6.addr,
        dst,
    };
    header.emit(buf.push_header(IPV6_HEADER_LEN)?);
    stack.ether.marshal(dst_mac, EtherType::IPV6, buf)
}

/// RFC 4291 solicited-node multicast address: ff02::1:ff00:0/104 plus the
/// low 24 bits of the target.
fn solicited_node(target: Ipv6Addr) -> Ipv6Addr {
    let o = target.octets();
    Ipv6Addr::new(
        0xFF02,
        0,
        0,
        0,
        0,
        1,
        0xFF00 | u16::from(o[13]),
        (u16::from(o[14]) << 8) | u16::from(o[15]),
    )
}

/// Ethernet mapping of an IPv6 multicast address: 33:33 plus the low 32
/// bits of the group.
fn multicast_mac(group: Ipv6Addr) -> MacAddr {
    let o = group.octets();
    MacAddr([0x33, 0x33, o[12], o[13], o[14], o[15]])
}
