use std::net::{Ipv4Addr, Ipv6Addr};
use wirestack::wire::checksum::{internet_checksum, pseudo_checksum_v4, pseudo_checksum_v6};
use wirestack::wire::ethernet::{ETHERNET_HEADER_LEN, EthernetHeader};
use wirestack::wire::icmp::{NDP_NEIGHBOR_SOLICIT, NDP_PACKET_LEN, NdpPacket};
use wirestack::wire::ipv4::{IPV4_HEADER_LEN, Ipv4Header};
use wirestack::wire::ipv6::{IPV6_HEADER_LEN, Ipv6Header};
use wirestack::wire::tcp::{TCP_HEADER_LEN, TcpHeader};
use wirestack::wire::udp::{UDP_HEADER_LEN, UdpHeader};
use wirestack::wire::{EtherType, MacAddr};
use wirestack::NetError;

#[test]
fn test_mac_addr_u64_roundtrip() {
    let mac = MacAddr([0x02, 0x1A, 0x2B, 0x3C, 0x4D, 0x5E]);
    assert_eq!(MacAddr::from_u64(mac.to_u64()), mac);
    assert_eq!(MacAddr::from_u64(MacAddr::BROADCAST.to_u64()), MacAddr::BROADCAST);
    assert!(MacAddr::NULL.is_null());
    assert!(MacAddr::BROADCAST.is_broadcast());
}

#[test]
fn test_ethernet_header_roundtrip() {
    let header = EthernetHeader {
        dst: MacAddr([1, 2, 3, 4, 5, 6]),
        src: MacAddr([7, 8, 9, 10, 11, 12]),
        ethertype: EtherType::IPV4,
    };
    let mut out = [0u8; ETHERNET_HEADER_LEN + 1];
    header.emit(&mut out);
    assert_eq!(EthernetHeader::parse(&out).unwrap(), header);
}

#[test]
fn test_ethernet_too_short() {
    assert_eq!(
        EthernetHeader::parse(&[0; ETHERNET_HEADER_LEN]).unwrap_err(),
        NetError::FrameTooShort
    );
}

// Worked RFC 1071 example: the checksum of this well-known header is
// 0xB861.
#[test]
fn test_internet_checksum_reference_vector() {
    let header: [u8; 20] = [
        0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xC0, 0xA8, 0x00,
        0x01, 0xC0, 0xA8, 0x00, 0xC7,
    ];
    assert_eq!(internet_checksum(&header), 0xB861);

    let mut with_sum = header;
    with_sum[10..12].copy_from_slice(&0xB861u16.to_be_bytes());
    assert_eq!(internet_checksum(&with_sum), 0);
}

#[test]
fn test_internet_checksum_odd_length() {
    // The trailing byte is padded as the high half of a final word.
    assert_eq!(internet_checksum(&[0xFF]), !0xFF00);
}

#[test]
fn test_ipv4_header_roundtrip() {
    let header = Ipv4Header {
        version: 4,
        ihl: IPV4_HEADER_LEN,
        tos: 0,
        total_len: 1500,
        id: 0x7777,
        reserved_flag: false,
        dont_fragment: false,
        more_fragments: true,
        offset: 2960,
        ttl: 0xFF,
        proto: 17,
        checksum: 0,
        src: Ipv4Addr::new(10, 0, 0, 1),
        dst: Ipv4Addr::new(10, 0, 0, 2),
    };
    let mut out = [0u8; IPV4_HEADER_LEN];
    header.emit(&mut out);
    assert!(Ipv4Header::verify_checksum(&out));

    let parsed = Ipv4Header::parse(&out).unwrap();
    assert_eq!(parsed.version, 4);
    assert_eq!(parsed.ihl, IPV4_HEADER_LEN);
    assert_eq!(parsed.total_len, 1500);
    assert_eq!(parsed.id, 0x7777);
    assert!(parsed.more_fragments);
    assert!(!parsed.dont_fragment);
    assert_eq!(parsed.offset, 2960);
    assert_eq!(parsed.src, header.src);
    assert_eq!(parsed.dst, header.dst);
}

#[test]
fn test_ipv4_rejects_bad_ihl() {
    let mut out = [0u8; IPV4_HEADER_LEN];
    Ipv4Header {
        version: 4,
        ihl: IPV4_HEADER_LEN,
        tos: 0,
        total_len: 20,
        id: 0,
        reserved_flag: false,
        dont_fragment: true,
        more_fragments: false,
        offset: 0,
        ttl: 64,
        proto: 6,
        checksum: 0,
        src: Ipv4Addr::UNSPECIFIED,
        dst: Ipv4Addr::UNSPECIFIED,
    }
    .emit(&mut out);
    out[0] = 0x44; // ihl = 16 bytes, below the minimum
    assert_eq!(
        Ipv4Header::parse(&out).unwrap_err(),
        NetError::WrongField("header length")
    );
}

#[test]
fn test_ipv6_header_roundtrip() {
    let header = Ipv6Header {
        version: 6,
        payload_len: 512,
        next_header: 17,
        hop_limit: 64,
        src: Ipv6Addr::new(0xFE80, 0, 0, 0, 0, 0, 0, 1),
        dst: Ipv6Addr::new(0xFE80, 0, 0, 0, 0, 0, 0, 2),
    };
    let mut out = [0u8; IPV6_HEADER_LEN];
    header.emit(&mut out);
    let parsed = Ipv6Header::parse(&out).unwrap();
    assert_eq!(parsed.version, 6);
    assert_eq!(parsed.payload_len, 512);
    assert_eq!(parsed.next_header, 17);
    assert_eq!(parsed.src, header.src);
    assert_eq!(parsed.dst, header.dst);
}

#[test]
fn test_udp_pseudo_header_checksum_roundtrip() {
    let src = Ipv4Addr::new(192, 168, 0, 1);
    let dst = Ipv4Addr::new(192, 168, 0, 2);
    let mut datagram = vec![0u8; UDP_HEADER_LEN + 5];
    UdpHeader {
        src_port: 5353,
        dst_port: 53,
        len: datagram.len() as u16,
        checksum: 0,
    }
    .emit(&mut datagram);
    datagram[UDP_HEADER_LEN..].copy_from_slice(b"query");
    let sum = pseudo_checksum_v4(src, dst, 17, &datagram);
    datagram[6..8].copy_from_slice(&sum.to_be_bytes());

    assert_eq!(pseudo_checksum_v4(src, dst, 17, &datagram), 0);
    // A flipped payload bit must break the sum.
    datagram[UDP_HEADER_LEN] ^= 0x01;
    assert_ne!(pseudo_checksum_v4(src, dst, 17, &datagram), 0);
}

#[test]
fn test_tcp_header_roundtrip() {
    let header = TcpHeader {
        src_port: 443,
        dst_port: 51000,
        seqno: 0xDEAD_BEEF,
        ackno: 0x0102_0304,
        data_offset: TCP_HEADER_LEN,
        reserved: 0,
        flags: 0x18,
        window: 0xFFFF,
        checksum: 0,
        urgent_ptr: 0,
    };
    let mut out = [0u8; TCP_HEADER_LEN];
    header.emit(&mut out);
    let parsed = TcpHeader::parse(&out).unwrap();
    assert_eq!(parsed.src_port, 443);
    assert_eq!(parsed.dst_port, 51000);
    assert_eq!(parsed.seqno, 0xDEAD_BEEF);
    assert_eq!(parsed.ackno, 0x0102_0304);
    assert_eq!(parsed.data_offset, TCP_HEADER_LEN);
    assert_eq!(parsed.reserved, 0);
    assert_eq!(parsed.flags, 0x18);
    assert_eq!(parsed.window, 0xFFFF);
}

#[test]
fn test_ndp_packet_roundtrip() {
    let src = Ipv6Addr::new(0xFE80, 0, 0, 0, 0, 0, 0, 1);
    let dst = Ipv6Addr::new(0xFF02, 0, 0, 0, 0, 1, 0xFF00, 2);
    let packet = NdpPacket {
        ndp_type: NDP_NEIGHBOR_SOLICIT,
        target: Ipv6Addr::new(0xFE80, 0, 0, 0, 0, 0, 0, 2),
        link_addr: MacAddr([2, 0, 0, 0, 0, 9]),
    };
    let mut out = [0u8; NDP_PACKET_LEN];
    packet.emit(&mut out);
    let sum = pseudo_checksum_v6(src, dst, 58, &out);
    out[2..4].copy_from_slice(&sum.to_be_bytes());

    assert_eq!(pseudo_checksum_v6(src, dst, 58, &out), 0);
    let parsed = NdpPacket::parse(&out).unwrap();
    assert_eq!(parsed.ndp_type, NDP_NEIGHBOR_SOLICIT);
    assert_eq!(parsed.target, packet.target);
    assert_eq!(parsed.link_addr, packet.link_addr);
}
