//! Concurrent producer acceptance tests.
//!
//! Producers push through the shared queue from other threads while the
//! dispatcher drains it, the way interrupt handlers enqueue work on the
//! rover.
//!
//! # Acceptance Criteria
//!
//! - Every accepted entry is invoked exactly once
//! - Each producer's entries are invoked in that producer's push order
//! - Rejected pushes leave the queue consistent

use super::common::{dispatcher_with, Recorder};
use rk_common::error::KernelError;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const PRODUCERS: u16 = 4;
const PER_PRODUCER: u16 = 200;

#[test]
fn test_concurrent_producers_while_draining() {
    let module = Recorder::new("sink");
    let (mut dispatcher, _) = dispatcher_with(16, &[(1, module.clone())]);
    let queue = Arc::clone(dispatcher.queue());

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    // Service encodes producer and sequence number
                    let service = p * 1000 + seq;
                    loop {
                        match queue.push_back(1, service) {
                            Ok(_) => break,
                            Err(KernelError::QueueFull { .. }) => thread::yield_now(),
                            Err(e) => panic!("unexpected push error: {e}"),
                        }
                    }
                }
            })
        })
        .collect();

    let deadline = Instant::now() + Duration::from_secs(20);
    let total = usize::from(PRODUCERS * PER_PRODUCER);
    while module.calls().len() < total && Instant::now() < deadline {
        dispatcher.poll();
        thread::yield_now();
    }

    for producer in producers {
        producer.join().unwrap();
    }
    dispatcher.poll();

    let services = module.services();
    assert_eq!(services.len(), total);
    for p in 0..PRODUCERS {
        let mine: Vec<_> = services
            .iter()
            .copied()
            .filter(|s| s / 1000 == p)
            .collect();
        let expected: Vec<_> = (0..PER_PRODUCER).map(|seq| p * 1000 + seq).collect();
        assert_eq!(mine, expected);
    }
    assert!(queue.is_empty());
}

#[test]
fn test_full_queue_rejections_are_clean() {
    let (dispatcher, _) = dispatcher_with(8, &[]);
    let queue = Arc::clone(dispatcher.queue());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                (0..10)
                    .filter(|_| queue.push_back_sync(1, 0, 1_000).is_ok())
                    .count()
            })
        })
        .collect();

    let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(accepted, 8);
    assert_eq!(queue.len(), 8);
    assert!(matches!(
        queue.push_back(1, 0),
        Err(KernelError::QueueFull { capacity: 8 })
    ));
}
