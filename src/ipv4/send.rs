//! The send engine: ARP-gated, MTU-sliced, retried with exponential
//! backoff, abandoned after a hard deadline.
//!
//! Every wakeup for a given record travels through exactly one outstanding
//! deferred task, so a record is never sliced by two workers at once.

use super::IPV4_SEND_RESERVE;
use crate::buffer::Buffer;
use crate::error::{NetError, Outcome};
use crate::exec::{DeferredTask, Task};
use crate::stack::StackInner;
use crate::wire::ethernet::ETHERNET_HEADER_LEN;
use crate::wire::ipv4::{IPV4_HEADER_LEN, Ipv4Header};
use crate::wire::{EtherType, MacAddr};
use crate::{arp, ipv6};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

/// Next-hop destination of an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpDst {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

/// An outgoing logical datagram working its way through ARP resolution,
/// slicing and retries. Owned by whichever task currently holds it; the
/// buffer is released when the record is dropped.
pub(crate) struct IpSend {
    dst: IpDst,
    proto: u8,
    /// IPv4 only; v6 never fragments.
    id: u16,
    buf: Buffer,
    /// Advances in 8-byte-aligned steps, except for the final slice.
    sent_size: usize,
    dst_mac: Option<MacAddr>,
    retry_interval: std::time::Duration,
}

/// Entry point: assign an id, resolve the next hop, and either start
/// sending immediately or park the message behind the ARP/NDP gate.
pub(crate) fn ip_marshal(
    stack: &Arc<StackInner>,
    dst: IpDst,
    proto: u8,
    buf: Buffer,
) -> Result<Outcome, NetError> {
    debug_assert!(buf.headroom() >= IPV4_SEND_RESERVE);
    let id = match dst {
        IpDst::V4(_) => stack.ipv4.alloc_id(),
        IpDst::V6(_) => 0,
    };
    let mut msg = Box::new(IpSend {
        dst,
        proto,
        id,
        buf,
        sent_size: 0,
        dst_mac: None,
        retry_interval: stack.config.retry_send,
    });

    match mac_lookup(stack, dst) {
        Ok(mac) => {
            msg.dst_mac = Some(mac);
            let weak = Arc::downgrade(stack);
            let task = Task::new(move || {
                if let Some(stack) = weak.upgrade() {
                    check_send_message(&stack, msg);
                }
            });
            // A rejected task drops the record, and with it the buffer.
            stack.exec.submit(task).map_err(|_| NetError::QueueFull)?;
            Ok(Outcome::Retained)
        }
        Err(NetError::NoMacAddress) => {
            msg.retry_interval = stack.config.arp_wait;
            defer_get_mac(stack, msg);
            Ok(Outcome::Retained)
        }
        Err(other) => Err(other),
    }
}

/// Looks up the next hop's MAC; on a miss, a resolution request goes out
/// right away and the caller gets `NoMacAddress` to gate on.
fn mac_lookup(stack: &Arc<StackInner>, dst: IpDst) -> Result<MacAddr, NetError> {
    let looked = match dst {
        IpDst::V4(ip) => stack.arp.lookup(ip),
        IpDst::V6(ip) => stack.arp.lookup_v6(ip),
    };
    if looked.is_err() {
        let sent = match dst {
            IpDst::V4(ip) => arp::send_request(stack, ip),
            IpDst::V6(ip) => ipv6::send_neighbor_solicit(stack, ip),
        };
        if let Err(err) = sent {
            warn!(error = %err, "could not send a resolution request");
        }
    }
    looked
}

/// Terminal state of a record, reached on completion, give-up, or
/// cancellation. Dropping the record releases the buffer.
pub(crate) fn close_sending_message(msg: Box<IpSend>) {
    if matches!(msg.dst, IpDst::V4(_)) && msg.sent_size != msg.buf.valid_size() {
        info!(
            sent = msg.sent_size,
            whole = msg.buf.valid_size(),
            "abandoning an IP message before it was fully sent"
        );
    }
}

/// Deferred tick while the next hop's MAC is unknown.
fn check_get_mac(stack: &Arc<StackInner>, mut msg: Box<IpSend>) {
    debug_assert!(msg.dst_mac.is_none());
    let looked = match msg.dst {
        IpDst::V4(ip) => stack.arp.lookup(ip),
        IpDst::V6(ip) => stack.arp.lookup_v6(ip),
    };
    match looked {
        Err(_) => {
            msg.retry_interval *= 2;
            if msg.retry_interval >= stack.config.giveup_send {
                close_sending_message(msg);
                return;
            }
            submit_resolution_request(stack, msg.dst);
            debug!(
                interval_ms = msg.retry_interval.as_millis() as u64,
                "no MAC for the next hop yet, will look again"
            );
            defer_get_mac(stack, msg);
        }
        Ok(mac) => {
            msg.dst_mac = Some(mac);
            msg.retry_interval = stack.config.retry_send;
            defer_send(stack, msg);
        }
    }
}

fn submit_resolution_request(stack: &Arc<StackInner>, dst: IpDst) {
    let weak = Arc::downgrade(stack);
    let task = Task::new(move || {
        let Some(stack) = weak.upgrade() else {
            return;
        };
        let sent = match dst {
            IpDst::V4(ip) => arp::send_request(&stack, ip),
            IpDst::V6(ip) => ipv6::send_neighbor_solicit(&stack, ip),
        };
        if let Err(err) = sent {
            warn!(error = %err, "could not send a resolution request");
        }
    });
    if stack.exec.submit(task).is_err() {
        warn!("task queue full, skipping a resolution request this round");
    }
}

/// Deferred tick once the MAC is known: push out the remaining slices and
/// either finish, or back off and reschedule.
fn check_send_message(stack: &Arc<StackInner>, mut msg: Box<IpSend>) {
    if msg.retry_interval > stack.config.giveup_send {
        close_sending_message(msg);
        return;
    }
    match msg.dst {
        IpDst::V6(dst) => {
            let Some(mac) = msg.dst_mac else {
                close_sending_message(msg);
                return;
            };
            match ipv6::send_once(stack, dst, mac, msg.proto, &mut msg.buf) {
                Ok(()) => {
                    trace!(size = msg.buf.valid_size(), "sent an IPv6 message");
                    close_sending_message(msg);
                }
                Err(err) => {
                    msg.retry_interval *= 2;
                    debug!(error = %err, "IPv6 send failed, backing off");
                    defer_send(stack, msg);
                }
            }
        }
        IpDst::V4(dst) => {
            if let Err(err) = ipv4_slice(stack, &mut msg, dst) {
                msg.retry_interval *= 2;
                debug!(error = %err, "slice send failed, backing off");
            }
            if msg.sent_size == msg.buf.valid_size() {
                trace!(size = msg.sent_size, id = msg.id, "finished sending an IP message");
                close_sending_message(msg);
                return;
            }
            defer_send(stack, msg);
        }
    }
}

/// Sends every remaining slice in order. On a link-layer failure the loop
/// stops with `sent_size` at the failed boundary so a retry resumes there.
fn ipv4_slice(stack: &StackInner, msg: &mut IpSend, dst: Ipv4Addr) -> Result<(), NetError> {
    let whole = msg.buf.valid_size();
    debug_assert!(msg.sent_size < whole);
    debug_assert_eq!(msg.sent_size % 8, 0);
    let mtu = stack.config.mtu_payload;
    let Some(mac) = msg.dst_mac else {
        return Err(NetError::NoMacAddress);
    };
    while msg.sent_size < whole {
        let remaining = whole - msg.sent_size;
        let last = remaining <= mtu;
        let seg = if last { remaining } else { mtu };
        send_fragment(stack, &mut msg.buf, dst, mac, msg.id, msg.proto, msg.sent_size, seg, last)?;
        msg.sent_size += seg;
    }
    Ok(())
}

/// Builds one fragment's headers in place and transmits it.
///
/// The IPv4 header lands in the 20 bytes before the slice: headroom for the
/// first fragment, already-sent payload for the rest. Overwriting sent
/// bytes is fine, the retry loop never goes backwards.
#[allow(clippy::too_many_arguments)]
fn send_fragment(
    stack: &StackInner,
    buf: &mut Buffer,
    dst: Ipv4Addr,
    dst_mac: MacAddr,
    id: u16,
    proto: u8,
    from: usize,
    seg: usize,
    last: bool,
) -> Result<(), NetError> {
    let pkt_len = seg + IPV4_HEADER_LEN;
    let header = Ipv4Header {
        version: 4,
        ihl: IPV4_HEADER_LEN,
        tos: 0,
        total_len: pkt_len as u16,
        id,
        reserved_flag: false,
        // Guaranteed-unfragmented only for small single-slice messages.
        dont_fragment: pkt_len <= stack.config.min_no_frag && from == 0,
        more_fragments: !last,
        offset: from as u32,
        ttl: 0xFF,
        proto,
        checksum: 0,
        src: stack.ipv4.addr,
        dst,
    };
    let window = buf.frame_window(from, seg, IPV4_SEND_RESERVE);
    header.emit(&mut window[ETHERNET_HEADER_LEN..ETHERNET_HEADER_LEN + IPV4_HEADER_LEN]);
    trace!(
        offset = from, seg, last, id,
        "sending a fragment"
    );
    stack.ether.marshal_into(dst_mac, EtherType::IPV4, window)
}

fn defer_get_mac(stack: &Arc<StackInner>, msg: Box<IpSend>) {
    let interval = msg.retry_interval;
    let tick = Box::new(GetMacTick {
        stack: Arc::downgrade(stack),
        msg,
    });
    // On shutdown submit_delayed already ran the close hook.
    let _ = stack.timer.submit_delayed(interval, tick);
}

fn defer_send(stack: &Arc<StackInner>, msg: Box<IpSend>) {
    let interval = msg.retry_interval;
    let tick = Box::new(SendTick {
        stack: Arc::downgrade(stack),
        msg,
    });
    let _ = stack.timer.submit_delayed(interval, tick);
}

struct GetMacTick {
    stack: Weak<StackInner>,
    msg: Box<IpSend>,
}

impl DeferredTask for GetMacTick {
    fn process(self: Box<Self>) {
        match self.stack.upgrade() {
            Some(stack) => check_get_mac(&stack, self.msg),
            None => close_sending_message(self.msg),
        }
    }

    fn close(self: Box<Self>) {
        close_sending_message(self.msg);
    }
}

struct SendTick {
    stack: Weak<StackInner>,
    msg: Box<IpSend>,
}

impl DeferredTask for SendTick {
    fn process(self: Box<Self>) {
        match self.stack.upgrade() {
            Some(stack) => check_send_message(&stack, self.msg),
            None => close_sending_message(self.msg),
        }
    }

    fn close(self: Box<Self>) {
        close_sending_message(self.msg);
    }
}
