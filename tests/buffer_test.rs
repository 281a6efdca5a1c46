use wirestack::NetError;
use wirestack::buffer::{Buffer, BufferPool};

#[test]
fn test_pool_inventory_restored_on_drop() {
    let pool = BufferPool::new(4, 256);
    assert_eq!(pool.available(), 4);
    let a = pool.acquire(32).unwrap();
    let b = pool.acquire(32).unwrap();
    assert_eq!(pool.available(), 2);
    drop(a);
    assert_eq!(pool.available(), 3);
    drop(b);
    assert_eq!(pool.available(), 4);
}

#[test]
fn test_pool_exhaustion() {
    let pool = BufferPool::new(1, 128);
    let held = pool.acquire(0).unwrap();
    assert_eq!(pool.acquire(0).unwrap_err(), NetError::PoolExhausted);
    drop(held);
    assert!(pool.acquire(0).is_ok());
}

#[test]
fn test_headroom_bookkeeping() {
    let pool = BufferPool::new(1, 256);
    let mut buf = pool.acquire(64).unwrap();
    assert_eq!(buf.headroom(), 64);
    assert_eq!(buf.valid_size(), 0);

    buf.fill(&[0xAB; 100]).unwrap();
    assert_eq!(buf.valid_size(), 100);

    // Descend: prepend a 20-byte header.
    let header = buf.push_header(20).unwrap();
    assert_eq!(header.len(), 20);
    header.fill(0x11);
    assert_eq!(buf.headroom(), 44);
    assert_eq!(buf.valid_size(), 120);
    assert_eq!(buf.payload()[0], 0x11);
    assert_eq!(buf.payload()[20], 0xAB);

    // Ascend: strip it again.
    buf.pull_header(20).unwrap();
    assert_eq!(buf.headroom(), 64);
    assert_eq!(buf.valid_size(), 100);
    assert_eq!(buf.payload()[0], 0xAB);
}

#[test]
fn test_push_header_beyond_headroom_fails() {
    let mut buf = Buffer::standalone(64, 8);
    buf.fill(&[0; 16]).unwrap();
    assert_eq!(buf.push_header(9).unwrap_err(), NetError::FrameTooShort);
    // The failed push must not have moved anything.
    assert_eq!(buf.headroom(), 8);
    assert_eq!(buf.valid_size(), 16);
}

#[test]
fn test_pull_header_beyond_payload_fails() {
    let mut buf = Buffer::standalone(64, 8);
    buf.fill(&[0; 4]).unwrap();
    assert_eq!(buf.pull_header(5).unwrap_err(), NetError::FrameTooShort);
}

#[test]
fn test_fill_too_large() {
    let mut buf = Buffer::standalone(32, 16);
    assert_eq!(buf.fill(&[0; 17]).unwrap_err(), NetError::FrameTooShort);
}

#[test]
fn test_frame_window_reaches_into_headroom() {
    let mut buf = Buffer::standalone(256, 64);
    let payload: Vec<u8> = (0..100u8).collect();
    buf.fill(&payload).unwrap();

    let window = buf.frame_window(0, 100, 34);
    assert_eq!(window.len(), 134);
    assert_eq!(&window[34..], &payload[..]);

    // A window into the middle overlays the bytes before `from`.
    let window = buf.frame_window(40, 60, 34);
    assert_eq!(window.len(), 94);
    assert_eq!(&window[34..], &payload[40..]);
}

#[test]
fn test_acquire_with_copies_payload() {
    let pool = BufferPool::new(2, 128);
    let buf = pool.acquire_with(16, b"hello").unwrap();
    assert_eq!(buf.payload(), b"hello");
    assert_eq!(buf.headroom(), 16);
}
