use crate::buffer::Buffer;
use crate::error::{NetError, Outcome};
use crate::stack::{NetDevice, StackInner};
use crate::wire::ethernet::{ETHERNET_HEADER_LEN, EthernetHeader};
use crate::wire::{EtherType, MacAddr};
use crate::{arp, ipv4, ipv6};
use std::sync::Arc;
use tracing::trace;

/// The link layer: frame validation and EtherType dispatch on the way up,
/// header construction and device hand-off on the way down.
pub struct Ethernet {
    pub mac: MacAddr,
    device: Arc<dyn NetDevice>,
}

impl Ethernet {
    pub fn new(mac: MacAddr, device: Arc<dyn NetDevice>) -> Self {
        Self { mac, device }
    }

    /// Prepends the Ethernet header into the buffer's headroom and hands the
    /// frame to the device.
    pub fn marshal(
        &self,
        dst: MacAddr,
        ethertype: EtherType,
        mut buf: Buffer,
    ) -> Result<(), NetError> {
        let header = EthernetHeader {
            dst,
            src: self.mac,
            ethertype,
        };
        header.emit(buf.push_header(ETHERNET_HEADER_LEN)?);
        self.device.transmit(buf.payload())
    }

    /// Writes the Ethernet header into the first 14 bytes of a frame built
    /// in place and transmits it. The caller keeps ownership of the
    /// underlying buffer, so a failed send can be retried at the same spot.
    pub fn marshal_into(
        &self,
        dst: MacAddr,
        ethertype: EtherType,
        frame: &mut [u8],
    ) -> Result<(), NetError> {
        let header = EthernetHeader {
            dst,
            src: self.mac,
            ethertype,
        };
        header.emit(&mut frame[..ETHERNET_HEADER_LEN]);
        self.device.transmit(frame)
    }
}

/// Parses a received frame and dispatches on its EtherType.
pub(crate) fn unmarshal(stack: &Arc<StackInner>, mut buf: Buffer) -> Result<Outcome, NetError> {
    let header = EthernetHeader::parse(buf.payload())?;
    if header.dst != stack.ether.mac && !header.dst.is_broadcast() {
        return Err(NetError::WrongMac);
    }
    trace!(src = %header.src, ethertype = header.ethertype.0, "frame received");
    buf.pull_header(ETHERNET_HEADER_LEN)?;
    match header.ethertype {
        EtherType::ARP => arp::unmarshal(stack, buf),
        EtherType::IPV4 => ipv4::unmarshal(stack, buf),
        EtherType::IPV6 => ipv6::unmarshal(stack, buf),
        EtherType(other) => Err(NetError::UnknownEtherType(other)),
    }
}
