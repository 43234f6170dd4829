//! SuperCAN loopback example
//!
//! This example runs a stand-in device server on a thread and talks to it
//! through in-process rings:
//! - Configuring bit timing and going on bus
//! - Sending classic and CAN-FD frames
//! - Receiving TX receipts and looped back frames
//!
//! Run with `RUST_LOG=debug` to see the control traffic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::info;
use supercan::slot::FrameSlot;
use supercan::structures::DeviceCapability;
use supercan::{
    BusConfig, CanEvent, CanFrame, ControlTransport, HeapRegion, RingChannel, RingConsumer,
    RingProducer, ScDevice, Slot, WakeEvent, SC_FEATURE_FLAG_FDF, SC_FEATURE_FLAG_TXR,
};

const CAPACITY: u32 = 64;

/// Control side of the stand-in server: accepts everything and logs it
struct LoggingControl;

impl ControlTransport for LoggingControl {
    fn acquire_config_access(&mut self) -> supercan::Result<bool> {
        Ok(true)
    }

    fn release_config_access(&mut self) -> supercan::Result<()> {
        Ok(())
    }

    fn control_out(&mut self, msg: &[u8]) -> supercan::Result<()> {
        info!("control {:02x?}", msg);
        Ok(())
    }
}

/// CAN info of an 80 MHz M_CAN device
fn can_info() -> [u8; 28] {
    let mut msg = [0u8; 28];
    msg[0] = supercan::constants::SC_MSG_CAN_INFO;
    msg[1] = 28;
    msg[2..4].copy_from_slice(&64u16.to_le_bytes());
    msg[4..8].copy_from_slice(&80_000_000u32.to_le_bytes());
    msg[8..10].copy_from_slice(&512u16.to_le_bytes()); // nominal brp max
    msg[10..12].copy_from_slice(&256u16.to_le_bytes()); // nominal tseg1 max
    msg[12] = 2; // nominal tseg1 min
    msg[13] = 1; // nominal brp min
    msg[14] = 128; // nominal sjw max
    msg[15] = 2; // nominal tseg2 min
    msg[16] = 128; // nominal tseg2 max
    msg[17] = 32; // data brp max
    msg[18] = 1; // data brp min
    msg[19] = 1; // data tseg1 min
    msg[20] = 32; // data tseg1 max
    msg[21] = 16; // data sjw max
    msg[22] = 1; // data tseg2 min
    msg[23] = 16; // data tseg2 max
    msg[24] = 32; // tx fifo
    msg[25] = 32; // rx fifo
    msg
}

/// Echo every transmitted frame back as a receipt and as a received frame
fn serve(mut from_client: RingConsumer, mut to_client: RingProducer, running: Arc<AtomicBool>) {
    let start = Instant::now();
    while running.load(Ordering::Relaxed) {
        let drained = from_client.drain().map(|slots| slots.collect::<Vec<_>>());
        let pending = match drained {
            Ok(slots) => slots,
            Err(e) => {
                eprintln!("server: {}", e);
                from_client.reset();
                continue;
            }
        };

        for slot in pending {
            if let Slot::Tx(frame) = slot {
                let now = start.elapsed().as_micros() as u32;
                let receipt = FrameSlot {
                    timestamp_us: now,
                    echo: true,
                    ..frame.clone()
                };
                let rx = FrameSlot {
                    timestamp_us: now,
                    echo: false,
                    track_id: 0,
                    ..frame
                };
                for slot in [Slot::Tx(receipt), Slot::Rx(rx)] {
                    loop {
                        match to_client.try_push(&slot) {
                            Ok(true) => break,
                            Ok(false) => thread::sleep(Duration::from_millis(1)),
                            Err(e) => {
                                eprintln!("server: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
        }

        from_client.wait(Duration::from_millis(10));
    }
}

fn main() {
    // Initialize logging
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> supercan::Result<()> {
    let rx = RingChannel::new(Arc::new(HeapRegion::new(CAPACITY)?), CAPACITY)?;
    let tx = RingChannel::new(Arc::new(HeapRegion::new(CAPACITY)?), CAPACITY)?;
    let rx_wake = Arc::new(WakeEvent::new());
    let tx_wake = Arc::new(WakeEvent::new());

    let running = Arc::new(AtomicBool::new(true));
    let server = {
        let from_client = tx.consumer(tx_wake.clone());
        let to_client = rx.producer(rx_wake.clone());
        let running = running.clone();
        thread::spawn(move || serve(from_client, to_client, running))
    };

    let capability = DeviceCapability::unpack(&can_info())?
        .with_features(SC_FEATURE_FLAG_FDF | SC_FEATURE_FLAG_TXR);
    println!("Device: {}", capability);

    let mut dev = ScDevice::new(
        LoggingControl,
        capability,
        rx.consumer(rx_wake),
        tx.producer(tx_wake),
    );

    dev.configure(&BusConfig::fd(500_000, 2_000_000))?;
    if let (Some(nominal), Some(data)) = (dev.last_timing(), dev.last_data_timing()) {
        println!("Nominal: {}", nominal);
        println!("Data:    {}", data);
    }

    let data: [u8; 8] = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0];
    let frames = [
        // Standard frame format with data
        CanFrame::with_data(0x7FF, &data),
        // Standard frame format without data
        CanFrame::with_data(0x7FF, &[]),
        // Extended frame format with data
        CanFrame::with_data(0x12345678, &data).extended(),
        // Remote transmission request
        CanFrame::remote(0x123, 4),
        // CAN-FD with bit rate switch
        CanFrame::with_fd_data(0x100, &[0xAA; 24], true),
    ];

    for frame in &frames {
        let track_id = dev.send(frame)?;
        println!("TX  [{}] {}", track_id, frame);
    }

    let expected = frames.len() * 2;
    let mut seen = 0;
    while seen < expected {
        match dev.read(Duration::from_millis(500)) {
            Ok(events) => {
                for event in events {
                    match event {
                        CanEvent::Rx(frame) => println!("RX  {}", frame),
                        CanEvent::Tx {
                            track_id, dropped, ..
                        } => println!("ACK [{}]{}", track_id, if dropped { " dropped" } else { "" }),
                        CanEvent::Status(status) => println!("ST  {}", status),
                        CanEvent::Error(error) => println!("ERR {:?}", error),
                    }
                    seen += 1;
                }
            }
            Err(e) if e.is_timeout() => {
                println!("Timed out waiting for loopback");
                break;
            }
            Err(e) => return Err(e),
        }
    }

    dev.stop()?;
    running.store(false, Ordering::Relaxed);
    let _ = server.join();
    println!("Done");
    Ok(())
}
