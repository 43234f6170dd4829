//! Producer and consumer on separate threads over one ring

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use supercan::slot::FrameSlot;
use supercan::{HeapRegion, RingChannel, Slot, SuperCanError, WakeEvent};

const COUNT: u32 = 20_000;

fn run(capacity: u32) {
    let _ = env_logger::builder().is_test(true).try_init();

    let region = Arc::new(HeapRegion::new(capacity).unwrap());
    let channel = RingChannel::new(region, capacity).unwrap();
    let wake = Arc::new(WakeEvent::new());

    let mut producer = channel.producer(wake.clone());
    let mut consumer = channel.consumer(wake);

    let handle = thread::spawn(move || {
        for i in 0..COUNT {
            let slot = Slot::Rx(FrameSlot {
                timestamp_us: i,
                can_id: i & 0x7FF,
                track_id: i,
                dlc: 4,
                ..Default::default()
            });
            while !producer.try_push(&slot).unwrap() {
                thread::yield_now();
            }
        }
    });

    let deadline = Instant::now() + Duration::from_secs(30);
    let mut expected = 0u32;
    while expected < COUNT {
        assert!(Instant::now() < deadline, "stalled at {}", expected);

        let mut got = 0;
        for slot in consumer.drain().unwrap() {
            match slot {
                Slot::Rx(s) => {
                    assert_eq!(s.track_id, expected);
                    assert_eq!(s.timestamp_us, expected);
                    assert_eq!(s.can_id, expected & 0x7FF);
                    assert_eq!(s.dlc, 4);
                }
                other => panic!("unexpected slot {:?}", other),
            }
            expected += 1;
            got += 1;
        }
        if got == 0 {
            consumer.wait(Duration::from_millis(5));
        }
    }

    handle.join().unwrap();
    assert_eq!(consumer.pending().unwrap(), 0);
    assert_eq!(channel.occupancy().unwrap(), 0);
}

#[test]
fn test_threads_default_capacity() {
    run(supercan::DEFAULT_RING_CAPACITY);
}

#[test]
fn test_threads_tiny_ring() {
    run(2);
}

#[test]
fn test_threads_small_ring() {
    run(8);
}

#[test]
fn test_non_power_of_two_capacity_rejected() {
    let region = Arc::new(HeapRegion::new(8).unwrap());
    let err = RingChannel::new(region, 7).unwrap_err();
    assert!(matches!(err, SuperCanError::InvalidCapacity(7)));
}
