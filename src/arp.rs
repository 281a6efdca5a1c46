use crate::buffer::Buffer;
use crate::error::{NetError, Outcome};
use crate::stack::StackInner;
use crate::sync::{Insert, InsertPolicy, LockFreeTable};
use crate::wire::arp::{ARP_PACKET_LEN, ArpPacket, OP_REPLY, OP_REQUEST};
use crate::wire::{EtherType, MacAddr};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::{debug, error, warn};

const ARP_BUCKETS: usize = 64;
const ARP_CAPACITY: usize = 1024;

/// The IP-to-MAC binding store.
///
/// IPv4 bindings live in the lock-free table so the receive path never
/// blocks on a lookup. IPv6 neighbor keys are 128-bit and do not fit the
/// pointer-keyed table; they take a brief read lock instead.
pub struct Arp {
    pub my_ip: Ipv4Addr,
    table: LockFreeTable,
    v6_neighbors: RwLock<HashMap<Ipv6Addr, MacAddr>>,
}

impl Arp {
    pub fn new(my_ip: Ipv4Addr) -> Result<Self, NetError> {
        Ok(Self {
            my_ip,
            table: LockFreeTable::new(ARP_BUCKETS, ARP_CAPACITY, InsertPolicy::Overwrite)?,
            v6_neighbors: RwLock::new(HashMap::new()),
        })
    }

    pub fn learn(&self, ip: Ipv4Addr, mac: MacAddr) {
        match self.table.insert(u64::from(u32::from(ip)), mac.to_u64()) {
            Ok(Insert::Inserted) => debug!(%ip, %mac, "learned binding"),
            Ok(_) => {}
            // The table never unlearns, so a full cell store is permanent.
            Err(_) => error!(%ip, "binding table out of cells, binding lost"),
        }
    }

    /// The gating lookup: `NoMacAddress` tells the sender to defer.
    pub fn lookup(&self, ip: Ipv4Addr) -> Result<MacAddr, NetError> {
        self.table
            .get(u64::from(u32::from(ip)))
            .map(MacAddr::from_u64)
            .ok_or(NetError::NoMacAddress)
    }

    pub fn learn_v6(&self, ip: Ipv6Addr, mac: MacAddr) {
        self.v6_neighbors.write().insert(ip, mac);
        debug!(%ip, %mac, "learned v6 neighbor");
    }

    pub fn lookup_v6(&self, ip: Ipv6Addr) -> Result<MacAddr, NetError> {
        self.v6_neighbors
            .read()
            .get(&ip)
            .copied()
            .ok_or(NetError::NoMacAddress)
    }
}

/// Handles a received ARP packet: learn the sender's binding, answer
/// requests addressed to us.
pub(crate) fn unmarshal(stack: &Arc<StackInner>, buf: Buffer) -> Result<Outcome, NetError> {
    let packet = ArpPacket::parse(buf.payload())?;
    if packet.op != OP_REQUEST && packet.op != OP_REPLY {
        return Err(NetError::WrongField("arp operation"));
    }
    stack.arp.learn(packet.sender_ip, packet.sender_mac);
    drop(buf);

    if packet.op == OP_REQUEST && packet.target_ip == stack.arp.my_ip {
        let reply = ArpPacket {
            op: OP_REPLY,
            sender_mac: stack.ether.mac,
            sender_ip: stack.arp.my_ip,
            target_mac: packet.sender_mac,
            target_ip: packet.sender_ip,
        };
        if let Err(err) = transmit(stack, packet.sender_mac, &reply) {
            warn!(error = %err, "failed to answer an ARP request");
        }
    }
    Ok(Outcome::Delivered)
}

/// Broadcasts a request for `target_ip`.
pub(crate) fn send_request(stack: &StackInner, target_ip: Ipv4Addr) -> Result<(), NetError> {
    let request = ArpPacket {
        op: OP_REQUEST,
        sender_mac: stack.ether.mac,
        sender_ip: stack.arp.my_ip,
        target_mac: MacAddr::NULL,
        target_ip,
    };
    debug!(%target_ip, "sending ARP request");
    transmit(stack, MacAddr::BROADCAST, &request)
}

fn transmit(stack: &StackInner, dst: MacAddr, packet: &ArpPacket) -> Result<(), NetError> {
    let mut buf = stack.pool.acquire(stack.config.headroom)?;
    let mut body = [0u8; ARP_PACKET_LEN];
    packet.emit(&mut body);
    buf.fill(&body)?;
    stack.ether.marshal(dst, EtherType::ARP, buf)
}
