//! Test support: a recording device and on-the-wire frame builders for
//! driving the stack without hardware.

use crate::buffer::Buffer;
use crate::error::{NetError, Outcome};
use crate::stack::{NetDevice, NetStack};
use crate::wire::checksum::{internet_checksum, pseudo_checksum_v4};
use crate::wire::ethernet::{ETHERNET_HEADER_LEN, EthernetHeader};
use crate::wire::ipv4::{IPV4_HEADER_LEN, Ipv4Header, proto};
use crate::wire::udp::{UDP_HEADER_LEN, UdpHeader};
use crate::wire::{EtherType, MacAddr};
use parking_lot::{Condvar, Mutex};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// A device that logs every transmitted frame. Sends can be paused (the
/// transmitting worker blocks) or made to fail a set number of times.
#[derive(Default)]
pub struct RecordingDevice {
    frames: Mutex<Vec<Vec<u8>>>,
    fail_budget: AtomicUsize,
    paused: Mutex<bool>,
    resume: Condvar,
    waiting: AtomicUsize,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().clone()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }

    /// Makes the next `n` transmissions fail with `DeviceSend`.
    pub fn fail_times(&self, n: usize) {
        self.fail_budget.store(n, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        *self.paused.lock() = true;
    }

    pub fn resume(&self) {
        *self.paused.lock() = false;
        self.resume.notify_all();
    }

    /// Transmitters currently blocked on a paused device.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Spins until `n` frames have been recorded or `timeout` elapses.
    pub fn wait_for_frames(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.frame_count() >= n {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.frame_count() >= n
    }
}

impl NetDevice for RecordingDevice {
    fn transmit(&self, frame: &[u8]) -> Result<(), NetError> {
        let mut paused = self.paused.lock();
        while *paused {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            self.resume.wait(&mut paused);
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }
        drop(paused);
        let failing = self
            .fail_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(NetError::DeviceSend);
        }
        self.frames.lock().push(frame.to_vec());
        Ok(())
    }
}

/// Hands a raw frame to the stack the way a driver would: copied into a
/// pool buffer with the configured headroom already consumed.
pub fn deliver(stack: &NetStack, frame: &[u8]) -> Result<Outcome, NetError> {
    let mut buf = stack.pool().acquire(stack.config().headroom)?;
    buf.fill(frame)?;
    stack.frame_unmarshal(buf)
}

/// Adaptive TTL of the open reassembly entry for `(src_ip, id)`, if any.
/// Lets tests pin the entry bookkeeping down, e.g. that a duplicate
/// fragment changes nothing.
pub fn reassembly_ttl(stack: &NetStack, src_ip: Ipv4Addr, id: u16) -> Option<Duration> {
    stack.inner().ipv4.reassembly.entry_ttl(src_ip, id)
}

/// A standalone buffer holding `payload`, with enough headroom for every
/// header the send path prepends.
pub fn payload_buffer(payload: &[u8]) -> Buffer {
    let mut buf = Buffer::standalone(payload.len() + 128, 128);
    buf.fill(payload).expect("payload fits");
    buf
}

/// Builds a UDP datagram (header + body) with its pseudo-header checksum.
pub fn build_udp_datagram(
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    body: &[u8],
) -> Vec<u8> {
    let mut datagram = vec![0u8; UDP_HEADER_LEN + body.len()];
    UdpHeader {
        src_port,
        dst_port,
        len: datagram.len() as u16,
        checksum: 0,
    }
    .emit(&mut datagram);
    datagram[UDP_HEADER_LEN..].copy_from_slice(body);
    let sum = pseudo_checksum_v4(src_ip, dst_ip, proto::UDP, &datagram);
    let sum = if sum == 0 { 0xFFFF } else { sum };
    datagram[6..8].copy_from_slice(&sum.to_be_bytes());
    datagram
}

/// Wraps one slice of an IP payload into a complete Ethernet+IPv4 frame.
#[allow(clippy::too_many_arguments)]
pub fn build_ipv4_frame(
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    protocol: u8,
    id: u16,
    offset: u32,
    more_fragments: bool,
    dont_fragment: bool,
    slice: &[u8],
) -> Vec<u8> {
    let mut frame = vec![0u8; ETHERNET_HEADER_LEN + IPV4_HEADER_LEN + slice.len()];
    EthernetHeader {
        dst: dst_mac,
        src: src_mac,
        ethertype: EtherType::IPV4,
    }
    .emit(&mut frame);
    Ipv4Header {
        version: 4,
        ihl: IPV4_HEADER_LEN,
        tos: 0,
        total_len: (IPV4_HEADER_LEN + slice.len()) as u16,
        id,
        reserved_flag: false,
        dont_fragment,
        more_fragments,
        offset,
        ttl: 0x40,
        proto: protocol,
        checksum: 0,
        src: src_ip,
        dst: dst_ip,
    }
    .emit(&mut frame[ETHERNET_HEADER_LEN..]);
    frame[ETHERNET_HEADER_LEN + IPV4_HEADER_LEN..].copy_from_slice(slice);
    frame
}

/// Parses a recorded frame back into its Ethernet and IPv4 headers plus the
/// IP payload slice.
pub fn parse_ipv4_frame(frame: &[u8]) -> (EthernetHeader, Ipv4Header, Vec<u8>) {
    let ether = EthernetHeader::parse(frame).expect("ethernet header");
    let ip = Ipv4Header::parse(&frame[ETHERNET_HEADER_LEN..]).expect("ipv4 header");
    assert_eq!(
        internet_checksum(&frame[ETHERNET_HEADER_LEN..ETHERNET_HEADER_LEN + ip.ihl]),
        0,
        "emitted header checksum must hold"
    );
    let payload = frame[ETHERNET_HEADER_LEN + ip.ihl..].to_vec();
    (ether, ip, payload)
}
