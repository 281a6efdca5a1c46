use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use wirestack::sync::BdQueue;

#[test]
fn test_queue_push_pop() {
    let queue = BdQueue::new(4);
    assert!(queue.is_empty());
    queue.push(1u32).unwrap();
    queue.push(2).unwrap();
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.pop(), Some(1));
    assert_eq!(queue.pop(), Some(2));
    assert_eq!(queue.pop(), None);
}

#[test]
fn test_queue_full_hands_back_element() {
    let queue = BdQueue::new(2);
    queue.push("a").unwrap();
    queue.push("b").unwrap();
    let rejected = queue.push("c").unwrap_err();
    assert_eq!(rejected, "c");
    assert_eq!(queue.capacity(), 2);
}

#[test]
fn test_queue_pop_empty_never_blocks() {
    let queue: BdQueue<u8> = BdQueue::new(1);
    assert_eq!(queue.pop(), None);
    queue.push(7).unwrap();
    assert_eq!(queue.pop(), Some(7));
    assert_eq!(queue.pop(), None);
}

#[test]
fn test_queue_mpmc_each_element_consumed_once() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 1000;
    let queue = Arc::new(BdQueue::new(PRODUCERS * PER_PRODUCER));
    let consumed = Arc::new(AtomicUsize::new(0));
    let sum = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for p in 0..PRODUCERS {
        let queue = Arc::clone(&queue);
        handles.push(thread::spawn(move || {
            for i in 0..PER_PRODUCER {
                queue.push(p * PER_PRODUCER + i).unwrap();
            }
        }));
    }
    for _ in 0..PRODUCERS {
        let queue = Arc::clone(&queue);
        let consumed = Arc::clone(&consumed);
        let sum = Arc::clone(&sum);
        handles.push(thread::spawn(move || {
            while consumed.load(Ordering::SeqCst) < PRODUCERS * PER_PRODUCER {
                if let Some(v) = queue.pop() {
                    consumed.fetch_add(1, Ordering::SeqCst);
                    sum.fetch_add(v, Ordering::SeqCst);
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let total = PRODUCERS * PER_PRODUCER;
    assert_eq!(consumed.load(Ordering::SeqCst), total);
    // Sum of 0..total: every element observed exactly once.
    assert_eq!(sum.load(Ordering::SeqCst), total * (total - 1) / 2);
}
