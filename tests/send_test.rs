use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;
use wirestack::testing::{RecordingDevice, parse_ipv4_frame, payload_buffer};
use wirestack::wire::arp::{ArpPacket, OP_REQUEST};
use wirestack::wire::ethernet::ETHERNET_HEADER_LEN;
use wirestack::wire::ipv4::proto;
use wirestack::{EtherType, MacAddr, NetConfig, NetError, NetStack, Outcome};

const OUR_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 1]);
const PEER_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 2]);
const OUR_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const PEER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
const OUR_V6: Ipv6Addr = Ipv6Addr::new(0xFE80, 0, 0, 0, 0, 0, 0, 1);

fn make_stack(config: NetConfig) -> (NetStack, Arc<RecordingDevice>) {
    let device = Arc::new(RecordingDevice::new());
    let device_dyn: Arc<dyn wirestack::NetDevice> = device.clone();
    let stack = NetStack::new(config, OUR_MAC, OUR_IP, OUR_V6, device_dyn).unwrap();
    (stack, device)
}

fn ethertype_of(frame: &[u8]) -> u16 {
    u16::from_be_bytes([frame[12], frame[13]])
}

fn ipv4_frames(device: &RecordingDevice) -> Vec<Vec<u8>> {
    device
        .frames()
        .into_iter()
        .filter(|f| ethertype_of(f) == EtherType::IPV4.0)
        .collect()
}

fn arp_requests(device: &RecordingDevice) -> Vec<ArpPacket> {
    device
        .frames()
        .into_iter()
        .filter(|f| ethertype_of(f) == EtherType::ARP.0)
        .map(|f| ArpPacket::parse(&f[ETHERNET_HEADER_LEN..]).unwrap())
        .filter(|p| p.op == OP_REQUEST)
        .collect()
}

#[test]
fn test_slicing_4000_bytes() {
    let (stack, device) = make_stack(NetConfig::default());
    stack.learn_neighbor(IpAddr::V4(PEER_IP), PEER_MAC);

    let payload: Vec<u8> = (0..4000u32).map(|i| (i % 241) as u8).collect();
    let outcome = stack
        .send_ipv4(PEER_IP, proto::UDP, payload_buffer(&payload))
        .unwrap();
    assert_eq!(outcome, Outcome::Retained);

    assert!(device.wait_for_frames(3, Duration::from_secs(2)));
    std::thread::sleep(Duration::from_millis(50));
    let frames = ipv4_frames(&device);
    assert_eq!(frames.len(), 3, "exactly ceil(4000/1480) frames");

    let mut reassembled = vec![0u8; 4000];
    let mut ids = Vec::new();
    let expected = [(0u32, true, 1480), (1480, true, 1480), (2960, false, 1040)];
    for (frame, (offset, mf, len)) in frames.iter().zip(expected) {
        let (ether, ip, slice) = parse_ipv4_frame(frame);
        assert_eq!(ether.dst, PEER_MAC);
        assert_eq!(ether.src, OUR_MAC);
        assert_eq!(ip.src, OUR_IP);
        assert_eq!(ip.dst, PEER_IP);
        assert_eq!(ip.offset, offset);
        assert_eq!(ip.more_fragments, mf);
        assert!(!ip.dont_fragment);
        assert_eq!(slice.len(), len);
        ids.push(ip.id);
        reassembled[offset as usize..offset as usize + len].copy_from_slice(&slice);
    }
    assert!(ids.windows(2).all(|w| w[0] == w[1]), "one id per message");
    assert_eq!(reassembled, payload);
}

#[test]
fn test_small_send_sets_dont_fragment() {
    let (stack, device) = make_stack(NetConfig::default());
    stack.learn_neighbor(IpAddr::V4(PEER_IP), PEER_MAC);

    stack
        .send_ipv4(PEER_IP, proto::UDP, payload_buffer(&[0xAA; 100]))
        .unwrap();
    assert!(device.wait_for_frames(1, Duration::from_secs(2)));
    let frames = ipv4_frames(&device);
    assert_eq!(frames.len(), 1);
    let (_, ip, slice) = parse_ipv4_frame(&frames[0]);
    assert!(ip.dont_fragment, "120-byte packet fits the no-frag guarantee");
    assert!(!ip.more_fragments);
    assert_eq!(ip.offset, 0);
    assert_eq!(slice.len(), 100);
}

#[test]
fn test_single_slice_above_576_has_no_df() {
    let (stack, device) = make_stack(NetConfig::default());
    stack.learn_neighbor(IpAddr::V4(PEER_IP), PEER_MAC);

    stack
        .send_ipv4(PEER_IP, proto::UDP, payload_buffer(&[0xBB; 1000]))
        .unwrap();
    assert!(device.wait_for_frames(1, Duration::from_secs(2)));
    let frames = ipv4_frames(&device);
    assert_eq!(frames.len(), 1);
    let (_, ip, _) = parse_ipv4_frame(&frames[0]);
    assert!(!ip.dont_fragment);
    assert!(!ip.more_fragments);
}

#[test]
fn test_arp_miss_then_hit() {
    let config = NetConfig {
        arp_wait: Duration::from_millis(100),
        retry_send: Duration::from_millis(5),
        ..NetConfig::default()
    };
    let (stack, device) = make_stack(config);

    let payload = vec![0x77u8; 100];
    let outcome = stack
        .send_ipv4(PEER_IP, proto::UDP, payload_buffer(&payload))
        .unwrap();
    assert_eq!(outcome, Outcome::Retained);

    // One ARP request goes out immediately.
    assert!(device.wait_for_frames(1, Duration::from_secs(1)));
    let requests = arp_requests(&device);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].target_ip, PEER_IP);
    assert!(ipv4_frames(&device).is_empty());

    // The binding shows up (as an ARP reply would install it); the next
    // firing transitions to sending.
    stack.learn_neighbor(IpAddr::V4(PEER_IP), PEER_MAC);
    std::thread::sleep(Duration::from_millis(500));

    let frames = ipv4_frames(&device);
    assert_eq!(frames.len(), 1, "exactly one datagram on the wire");
    let (ether, ip, slice) = parse_ipv4_frame(&frames[0]);
    assert_eq!(ether.dst, PEER_MAC);
    assert_eq!(ip.dst, PEER_IP);
    assert_eq!(slice, payload);
    assert_eq!(stack.pending_deferred(), 0);
}

#[test]
fn test_send_giveup_closes_once_and_frees_buffer() {
    let config = NetConfig {
        arp_wait: Duration::from_millis(10),
        retry_send: Duration::from_millis(5),
        giveup_send: Duration::from_millis(50),
        ..NetConfig::default()
    };
    let slabs = config.pool_slabs;
    let (stack, device) = make_stack(config);

    let mut buf = stack.acquire_buffer().unwrap();
    buf.fill(&[0x11; 200]).unwrap();
    stack.send_ipv4(PEER_IP, proto::UDP, buf).unwrap();

    std::thread::sleep(Duration::from_millis(400));

    // Backoff 10 -> 20 -> 40 -> 80 crosses the 50ms deadline at the third
    // firing: requests at t=0, t=10, t=30 and nothing after.
    assert_eq!(arp_requests(&device).len(), 3);
    assert!(ipv4_frames(&device).is_empty(), "gave up silently");
    assert_eq!(stack.pending_deferred(), 0);
    assert_eq!(stack.pool().available(), slabs, "record released its buffer");
}

#[test]
fn test_link_failure_backoff_resumes_at_boundary() {
    let config = NetConfig {
        retry_send: Duration::from_millis(5),
        ..NetConfig::default()
    };
    let (stack, device) = make_stack(config);
    stack.learn_neighbor(IpAddr::V4(PEER_IP), PEER_MAC);

    let payload: Vec<u8> = (0..3000u32).map(|i| (i % 239) as u8).collect();
    device.fail_times(1);
    stack
        .send_ipv4(PEER_IP, proto::UDP, payload_buffer(&payload))
        .unwrap();

    assert!(device.wait_for_frames(3, Duration::from_secs(2)));
    std::thread::sleep(Duration::from_millis(50));
    let frames = ipv4_frames(&device);
    assert_eq!(frames.len(), 3);

    // The first attempt died before anything hit the wire, so the retry
    // started over at offset 0 and every slice is present exactly once.
    let offsets: Vec<u32> = frames.iter().map(|f| parse_ipv4_frame(f).1.offset).collect();
    assert_eq!(offsets, vec![0, 1480, 2960]);
    let mut reassembled = vec![0u8; 3000];
    for frame in &frames {
        let (_, ip, slice) = parse_ipv4_frame(frame);
        reassembled[ip.offset as usize..ip.offset as usize + slice.len()]
            .copy_from_slice(&slice);
    }
    assert_eq!(reassembled, payload);
}

#[test]
fn test_queue_full_backpressure_restores_pool() {
    let config = NetConfig {
        workers: 1,
        task_queue_size: 1,
        ..NetConfig::default()
    };
    let slabs = config.pool_slabs;
    let (stack, device) = make_stack(config);
    stack.learn_neighbor(IpAddr::V4(PEER_IP), PEER_MAC);

    device.pause();
    let send = |n: u8| {
        let mut buf = stack.acquire_buffer().unwrap();
        buf.fill(&[n; 64]).unwrap();
        stack.send_ipv4(PEER_IP, proto::UDP, buf)
    };

    // First message: its task is picked up by the lone worker, which then
    // blocks inside the paused device.
    send(1).unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while device.waiting() == 0 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(device.waiting(), 1);

    // Second fills the single queue slot; the third bounces and must give
    // its buffer back to the pool.
    send(2).unwrap();
    assert_eq!(send(3).unwrap_err(), NetError::QueueFull);
    assert_eq!(stack.pool().available(), slabs - 2);

    device.resume();
    assert!(device.wait_for_frames(2, Duration::from_secs(2)));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(stack.pool().available(), slabs);
}
