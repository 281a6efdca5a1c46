use crate::arp::Arp;
use crate::buffer::{Buffer, BufferPool};
use crate::config::NetConfig;
use crate::error::{NetError, Outcome};
use crate::ethernet::Ethernet;
use crate::exec::{ThreadPool, Timer};
use crate::ipv4::Ipv4;
use crate::ipv4::send::{IpDst, ip_marshal};
use crate::ipv6::Ipv6;
use crate::transport::{TransportMsg, TransportQueues};
use crate::wire::MacAddr;
use crate::{ethernet, icmp, tcp, udp};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::{debug, info};

/// The device driver boundary.
///
/// Egress: the stack calls `transmit` with a complete frame; the driver
/// copies it out (into its ring, a socket, a test log). The frame borrow
/// keeps ownership with the send records so retries resume in place.
/// Ingress: the driver acquires a pool buffer, consumes its headroom, and
/// calls [`NetStack::frame_unmarshal`].
pub trait NetDevice: Send + Sync {
    fn transmit(&self, frame: &[u8]) -> Result<(), NetError>;
}

/// Process-wide state, owned by the composition root and passed by
/// reference into every entry point. Deferred continuations hold `Weak`
/// handles so the timer heap never keeps the stack alive.
pub(crate) struct StackInner {
    pub(crate) config: NetConfig,
    pub(crate) pool: BufferPool,
    pub(crate) exec: Arc<ThreadPool>,
    pub(crate) timer: Timer,
    pub(crate) ether: Ethernet,
    pub(crate) arp: Arp,
    pub(crate) ipv4: Ipv4,
    pub(crate) ipv6: Ipv6,
    pub(crate) udp: TransportQueues,
    pub(crate) tcp: TransportQueues,
}

/// The composition root: owns the buffer pool, the event core and every
/// protocol layer.
pub struct NetStack {
    inner: Arc<StackInner>,
}

impl NetStack {
    pub(crate) fn inner(&self) -> &Arc<StackInner> {
        &self.inner
    }
}

impl NetStack {
    pub fn new(
        config: NetConfig,
        mac: MacAddr,
        ipv4_addr: Ipv4Addr,
        ipv6_addr: Ipv6Addr,
        device: Arc<dyn NetDevice>,
    ) -> Result<Self, NetError> {
        config.validate()?;
        let pool = BufferPool::new(config.pool_slabs, config.slab_size);
        let exec = Arc::new(ThreadPool::new(config.workers, config.task_queue_size));
        let timer = Timer::new(Arc::clone(&exec));
        let inner = Arc::new(StackInner {
            ether: Ethernet::new(mac, device),
            arp: Arp::new(ipv4_addr)?,
            ipv4: Ipv4::new(ipv4_addr, &config),
            ipv6: Ipv6 { addr: ipv6_addr },
            udp: TransportQueues::new(config.transport_queues, config.transport_queue_size),
            tcp: TransportQueues::new(config.transport_queues, config.transport_queue_size),
            pool,
            exec,
            timer,
            config,
        });
        info!(%mac, %ipv4_addr, %ipv6_addr, "network stack initialized");
        Ok(Self { inner })
    }

    /// Ingress entry point: one received frame, one owned buffer. This is
    /// the single place that interprets layer outcomes; errors are logged
    /// and the frame is dropped (the buffer recycles itself wherever its
    /// ownership ends).
    pub fn frame_unmarshal(&self, buf: Buffer) -> Result<Outcome, NetError> {
        match ethernet::unmarshal(&self.inner, buf) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                debug!(error = %err, "dropping a received frame");
                Err(err)
            }
        }
    }

    /// Sends `buf` as one logical IPv4 datagram, slicing and retrying as
    /// needed. The buffer must have been acquired with the stack's
    /// headroom; ownership transfers to the send engine.
    pub fn send_ipv4(&self, dst: Ipv4Addr, proto: u8, buf: Buffer) -> Result<Outcome, NetError> {
        ip_marshal(&self.inner, IpDst::V4(dst), proto, buf)
    }

    /// Sends `buf` as a single IPv6 packet (no fragmentation).
    pub fn send_ipv6(
        &self,
        dst: Ipv6Addr,
        next_header: u8,
        buf: Buffer,
    ) -> Result<Outcome, NetError> {
        ip_marshal(&self.inner, IpDst::V6(dst), next_header, buf)
    }

    /// Wraps `buf` in a UDP datagram and sends it over IPv4.
    pub fn send_udp(
        &self,
        dst: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        buf: Buffer,
    ) -> Result<Outcome, NetError> {
        udp::marshal(&self.inner, dst, src_port, dst_port, buf)
    }

    /// Builds and sends a TCP segment over IPv4.
    #[allow(clippy::too_many_arguments)]
    pub fn send_tcp(
        &self,
        dst: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        seqno: u32,
        ackno: u32,
        flags: u8,
        window: u16,
        buf: Buffer,
    ) -> Result<Outcome, NetError> {
        tcp::marshal(
            &self.inner,
            dst,
            src_port,
            dst_port,
            seqno,
            ackno,
            flags,
            window,
            buf,
        )
    }

    /// Sends an ICMP echo request.
    pub fn send_echo_request(
        &self,
        dst: Ipv4Addr,
        ident: u16,
        seqno: u16,
        data: &[u8],
    ) -> Result<Outcome, NetError> {
        icmp::send_echo(
            &self.inner,
            dst,
            crate::wire::icmp::ECHO_REQUEST,
            ident,
            seqno,
            data,
        )
    }

    /// Drains one verified UDP message from the given shard.
    pub fn poll_udp(&self, shard: usize) -> Option<TransportMsg> {
        self.inner.udp.poll(shard)
    }

    /// Drains one verified TCP message from the given shard.
    pub fn poll_tcp(&self, shard: usize) -> Option<TransportMsg> {
        self.inner.tcp.poll(shard)
    }

    pub fn transport_shards(&self) -> usize {
        self.inner.udp.shards()
    }

    /// Installs an IP-to-MAC binding, as an ARP reply or NDP advertisement
    /// would.
    pub fn learn_neighbor(&self, ip: IpAddr, mac: MacAddr) {
        match ip {
            IpAddr::V4(ip) => self.inner.arp.learn(ip, mac),
            IpAddr::V6(ip) => self.inner.arp.learn_v6(ip, mac),
        }
    }

    pub fn lookup_neighbor(&self, ip: IpAddr) -> Option<MacAddr> {
        match ip {
            IpAddr::V4(ip) => self.inner.arp.lookup(ip).ok(),
            IpAddr::V6(ip) => self.inner.arp.lookup_v6(ip).ok(),
        }
    }

    /// Acquires a payload buffer with the stack's configured headroom.
    pub fn acquire_buffer(&self) -> Result<Buffer, NetError> {
        self.inner.pool.acquire(self.inner.config.headroom)
    }

    pub fn pool(&self) -> &BufferPool {
        &self.inner.pool
    }

    pub fn config(&self) -> &NetConfig {
        &self.inner.config
    }

    /// Deferred tasks waiting on a deadline.
    pub fn pending_deferred(&self) -> usize {
        self.inner.timer.pending()
    }

    /// Reassemblies with fragments still outstanding.
    pub fn pending_reassemblies(&self) -> usize {
        self.inner.ipv4.reassembly.pending()
    }

    /// Stops the timer (running every remaining close hook exactly once),
    /// then the workers.
    pub fn shutdown(&self) {
        self.inner.timer.shutdown();
        self.inner.exec.shutdown();
    }
}

impl Drop for NetStack {
    fn drop(&mut self) {
        self.shutdown();
    }
}
