//! SuperCAN client core for Rust
//!
//! This crate implements the client side of the SuperCAN device server
//! protocol: the shared-memory rings that carry CAN frames and bus events
//! between the server and a client, the reconstruction of 64-bit timestamps
//! from the device's wrapping 32-bit counter, and the bit-timing solver that
//! turns a requested bitrate into register values the hardware accepts.
//!
//! # Features
//!
//! - Lock-free single-producer / single-consumer rings over any shared region
//! - Classic CAN and CAN-FD frame codec with full validation
//! - Monotonic timestamps across counter wraparound
//! - Nominal and data phase bit-timing solver
//! - POSIX shared memory regions on unix
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use supercan::{
//!     BusConfig, CanEvent, CanFrame, ControlTransport, DeviceCapability, HeapRegion,
//!     RingChannel, ScDevice, WakeEvent, DEFAULT_RING_CAPACITY,
//! };
//!
//! struct Server;
//!
//! impl ControlTransport for Server {
//!     fn acquire_config_access(&mut self) -> supercan::Result<bool> {
//!         Ok(true)
//!     }
//!     fn release_config_access(&mut self) -> supercan::Result<()> {
//!         Ok(())
//!     }
//!     fn control_out(&mut self, _msg: &[u8]) -> supercan::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> supercan::Result<()> {
//!     # let can_info = [0u8; 28];
//!     let capability = DeviceCapability::unpack(&can_info)?;
//!
//!     let rx = RingChannel::new(
//!         Arc::new(HeapRegion::new(DEFAULT_RING_CAPACITY)?),
//!         DEFAULT_RING_CAPACITY,
//!     )?;
//!     let tx = RingChannel::new(
//!         Arc::new(HeapRegion::new(DEFAULT_RING_CAPACITY)?),
//!         DEFAULT_RING_CAPACITY,
//!     )?;
//!     let rx_wake = Arc::new(WakeEvent::new());
//!     let tx_wake = Arc::new(WakeEvent::new());
//!
//!     let mut dev = ScDevice::new(Server, capability, rx.consumer(rx_wake), tx.producer(tx_wake));
//!
//!     // 500 kbit/s, default sample point
//!     dev.configure(&BusConfig::default())?;
//!
//!     let data = [0x12, 0x34, 0x56, 0x78];
//!     let track_id = dev.send(&CanFrame::with_data(0x123, &data))?;
//!     println!("queued as {}", track_id);
//!
//!     loop {
//!         match dev.read(Duration::from_millis(100)) {
//!             Ok(events) => {
//!                 for event in events {
//!                     if let CanEvent::Rx(frame) = event {
//!                         println!("RX  {}", frame);
//!                     }
//!                 }
//!             }
//!             Err(e) if e.is_timeout() => continue,
//!             Err(e) => return Err(e),
//!         }
//!     }
//! }
//! ```

pub mod bittiming;
pub mod constants;
pub mod device;
pub mod error;
pub mod frame;
pub mod region;
pub mod ring;
pub mod slot;
pub mod structures;
pub mod timestamp;
pub mod wake;

// Re-export main types at crate root
pub use constants::{
    // Masks
    CAN_EFF_MASK,
    CAN_SFF_MASK,
    // Sizes
    CANFD_MAX_DLEN,
    CAN_MAX_DLEN,
    DEFAULT_RING_CAPACITY,
    // Frame flags
    SC_CAN_FRAME_FLAG_BRS,
    SC_CAN_FRAME_FLAG_DRP,
    SC_CAN_FRAME_FLAG_ESI,
    SC_CAN_FRAME_FLAG_EXT,
    SC_CAN_FRAME_FLAG_FDF,
    SC_CAN_FRAME_FLAG_RTR,
    // Bus status
    SC_CAN_STATUS_BUS_OFF,
    SC_CAN_STATUS_ERROR_ACTIVE,
    SC_CAN_STATUS_ERROR_PASSIVE,
    SC_CAN_STATUS_ERROR_WARNING,
    // Feature flags
    SC_FEATURE_FLAG_DAR,
    SC_FEATURE_FLAG_EHD,
    SC_FEATURE_FLAG_EXT_LOOP_MODE,
    SC_FEATURE_FLAG_FDF,
    SC_FEATURE_FLAG_FLT,
    SC_FEATURE_FLAG_GEN,
    SC_FEATURE_FLAG_MON_MODE,
    SC_FEATURE_FLAG_RES_MODE,
    SC_FEATURE_FLAG_TXR,
};

pub use bittiming::{
    default_sample_point, solve, solve_fd, BitTimingConstraints, BitTimingSettings,
    BitTimingTarget, FdBitTiming, Phase,
};
pub use device::{BusConfig, ConfigAccess, ControlTransport, ScDevice};
pub use error::{NoSolutionReason, Result, SuperCanError};
pub use frame::{CanEvent, CanFrame};
#[cfg(unix)]
pub use region::MappedRegion;
pub use region::{HeapRegion, SharedRegion};
pub use ring::{RingChannel, RingConsumer, RingProducer};
pub use slot::Slot;
pub use structures::{BusError, BusErrorKind, BusState, BusStatus, DeviceCapability, DeviceInfo};
pub use timestamp::TimestampTracker;
pub use wake::{NoWake, WakeEvent, WakeSignal};
