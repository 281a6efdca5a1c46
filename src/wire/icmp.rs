use super::MacAddr;
use crate::error::NetError;
use std::net::Ipv6Addr;

pub const ICMP_HEADER_LEN: usize = 8;

pub const ECHO_REPLY: u8 = 0;
pub const ECHO_REQUEST: u8 = 8;

/// ICMPv4 header: type, code, checksum and the 4 rest-of-header bytes
/// (identifier and sequence number for echo).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpHeader {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub ident: u16,
    pub seqno: u16,
}

impl IcmpHeader {
    pub fn parse(data: &[u8]) -> Result<Self, NetError> {
        if data.len() < ICMP_HEADER_LEN {
            return Err(NetError::FrameTooShort);
        }
        Ok(Self {
            icmp_type: data[0],
            code: data[1],
            checksum: u16::from_be_bytes([data[2], data[3]]),
            ident: u16::from_be_bytes([data[4], data[5]]),
            seqno: u16::from_be_bytes([data[6], data[7]]),
        })
    }

    /// Writes the header with a zero checksum; the caller computes the sum
    /// over the full message afterwards.
    pub fn emit(&self, out: &mut [u8]) {
        out[0] = self.icmp_type;
        out[1] = self.code;
        out[2..4].copy_from_slice(&[0, 0]);
        out[4..6].copy_from_slice(&self.ident.to_be_bytes());
        out[6..8].copy_from_slice(&self.seqno.to_be_bytes());
    }
}

// NDP (ICMPv6) neighbor discovery, RFC 4861. Only the solicit/advertise
// pair the address-resolution gate needs.

pub const NDP_NEIGHBOR_SOLICIT: u8 = 135;
pub const NDP_NEIGHBOR_ADVERTISE: u8 = 136;

/// Neighbor solicitation/advertisement body: 4 reserved bytes, the target
/// address, and a single link-layer address option.
pub const NDP_PACKET_LEN: usize = 4 + 4 + 16 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdpPacket {
    pub ndp_type: u8,
    pub target: Ipv6Addr,
    /// Source (solicit) or target (advertise) link-layer address option.
    pub link_addr: MacAddr,
}

impl NdpPacket {
    pub fn parse(data: &[u8]) -> Result<Self, NetError> {
        if data.len() < NDP_PACKET_LEN {
            return Err(NetError::FrameTooShort);
        }
        let ndp_type = data[0];
        if ndp_type != NDP_NEIGHBOR_SOLICIT && ndp_type != NDP_NEIGHBOR_ADVERTISE {
            return Err(NetError::NotImplemented);
        }
        let mut target = [0u8; 16];
        target.copy_from_slice(&data[8..24]);
        Ok(Self {
            ndp_type,
            target: Ipv6Addr::from(target),
            link_addr: MacAddr::from_slice(&data[26..32]),
        })
    }

    /// Writes the message with a zero checksum; ICMPv6 checksums include the
    /// IPv6 pseudo-header, so the caller fills it in.
    pub fn emit(&self, out: &mut [u8]) {
        out[..NDP_PACKET_LEN].fill(0);
        out[0] = self.ndp_type;
        if self.ndp_type == NDP_NEIGHBOR_ADVERTISE {
            // Solicited + override flags.
            out[4] = 0x60;
        }
        out[8..24].copy_from_slice(&self.target.octets());
        // Option: type 1 (source lladdr) for solicit, 2 (target lladdr)
        // for advertise, length 1 unit of 8 bytes.
        out[24] = if self.ndp_type == NDP_NEIGHBOR_SOLICIT { 1 } else { 2 };
        out[25] = 1;
        out[26..32].copy_from_slice(&self.link_addr.0);
    }
}
