//! SuperCAN client device
//!
//! `ScDevice` ties the pieces together for one CAN channel: the control
//! transport used to configure the device, the receive and transmit rings
//! shared with the device server, and the timestamp tracker.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use log::{debug, warn};

use crate::bittiming::{solve, solve_fd, BitTimingSettings, BitTimingTarget, Phase};
use crate::constants::*;
use crate::error::{Result, SuperCanError};
use crate::frame::{decode_slot, encode, CanEvent, CanFrame};
use crate::ring::{RingConsumer, RingProducer};
use crate::slot::Slot;
use crate::structures::{pack_bittiming, BusRequest, DeviceCapability, FeaturesRequest};
use crate::timestamp::TimestampTracker;

/// Control channel to the device server
///
/// Configuration messages are only accepted from the client that currently
/// holds configuration access.
pub trait ControlTransport {
    /// Try to take configuration access
    ///
    /// Returns `false` when another client holds it.
    fn acquire_config_access(&mut self) -> Result<bool>;

    /// Give configuration access back
    fn release_config_access(&mut self) -> Result<()>;

    /// Send one packed control message
    fn control_out(&mut self, msg: &[u8]) -> Result<()>;
}

/// Configuration access held for the lifetime of the guard
pub struct ConfigAccess<'a, T: ControlTransport> {
    transport: &'a mut T,
}

impl<'a, T: ControlTransport> ConfigAccess<'a, T> {
    /// Acquire configuration access
    ///
    /// Fails with `ConfigAccessDenied` when another client holds it.
    pub fn acquire(transport: &'a mut T) -> Result<Self> {
        if !transport.acquire_config_access()? {
            return Err(SuperCanError::ConfigAccessDenied);
        }
        Ok(Self { transport })
    }
}

impl<T: ControlTransport> Deref for ConfigAccess<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.transport
    }
}

impl<T: ControlTransport> DerefMut for ConfigAccess<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.transport
    }
}

impl<T: ControlTransport> Drop for ConfigAccess<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.transport.release_config_access() {
            warn!("failed to release configuration access: {}", e);
        }
    }
}

/// Bus configuration applied by [`ScDevice::configure`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusConfig {
    /// Nominal (arbitration) phase target
    pub nominal: BitTimingTarget,
    /// Data phase target, `Some` to run the bus in CAN-FD mode
    pub data: Option<BitTimingTarget>,
    /// Features to enable (SC_FEATURE_FLAG_*); FDF follows `data`
    pub features: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::classic(500_000)
    }
}

impl BusConfig {
    /// Classic CAN at the given bitrate
    pub fn classic(bitrate: u32) -> Self {
        Self {
            nominal: BitTimingTarget::new(bitrate),
            data: None,
            features: SC_FEATURE_FLAG_TXR,
        }
    }

    /// CAN-FD with the given nominal and data bitrates
    pub fn fd(nominal_bitrate: u32, data_bitrate: u32) -> Self {
        Self {
            nominal: BitTimingTarget::new(nominal_bitrate),
            data: Some(BitTimingTarget::new(data_bitrate)),
            features: SC_FEATURE_FLAG_TXR,
        }
    }

    pub fn with_features(mut self, features: u32) -> Self {
        self.features = features;
        self
    }

    pub fn is_fd(&self) -> bool {
        self.data.is_some()
    }
}

/// SuperCAN client for one CAN channel
pub struct ScDevice<T: ControlTransport> {
    control: T,
    capability: DeviceCapability,
    rx: RingConsumer,
    tx: RingProducer,
    tracker: TimestampTracker,
    on_bus: bool,
    fd_mode: bool,
    next_track_id: u32,
    last_timing: Option<BitTimingSettings>,
    last_data_timing: Option<BitTimingSettings>,
}

impl<T: ControlTransport> ScDevice<T> {
    /// Create a client over an already established device session
    ///
    /// # Arguments
    /// * `control` - Control channel to the device server
    /// * `capability` - CAN info reported by the device, with feature flags attached
    /// * `rx` - Consumer side of the ring the server fills
    /// * `tx` - Producer side of the ring the server drains
    pub fn new(
        control: T,
        capability: DeviceCapability,
        rx: RingConsumer,
        tx: RingProducer,
    ) -> Self {
        Self {
            control,
            capability,
            rx,
            tx,
            tracker: TimestampTracker::new(),
            on_bus: false,
            fd_mode: false,
            next_track_id: 0,
            last_timing: None,
            last_data_timing: None,
        }
    }

    /// Configure bit timing and features, then go on bus
    ///
    /// The device is taken off bus first, so this also reconfigures a running
    /// channel. Configuration access is released on every exit path.
    ///
    /// # Example
    /// ```ignore
    /// dev.configure(&BusConfig::fd(500_000, 2_000_000))?;
    /// ```
    pub fn configure(&mut self, config: &BusConfig) -> Result<()> {
        if config.data.is_some() && !self.capability.supports_fd() {
            return Err(SuperCanError::FdNotSupported);
        }

        let mut access = ConfigAccess::acquire(&mut self.control)?;

        access.control_out(&BusRequest { on: false }.pack())?;
        self.on_bus = false;

        let (nominal, data) = match config.data {
            Some(ref data_target) => {
                let fd = solve_fd(
                    &self.capability.nominal_constraints(),
                    &self.capability.data_constraints(),
                    &config.nominal,
                    data_target,
                )?;
                (fd.nominal, Some(fd.data))
            }
            None => (
                solve(
                    &self.capability.nominal_constraints(),
                    &config.nominal,
                    Phase::Nominal,
                )?,
                None,
            ),
        };

        access.control_out(&pack_bittiming(SC_MSG_NM_BITTIMING, &nominal))?;
        if let Some(ref data) = data {
            access.control_out(&pack_bittiming(SC_MSG_DT_BITTIMING, data))?;
        }

        let mut features = config.features & !SC_FEATURE_FLAG_FDF;
        if data.is_some() {
            features |= SC_FEATURE_FLAG_FDF;
        }
        let unsupported = features & !self.capability.features;
        if unsupported != 0 {
            warn!(
                "device does not offer features 0x{:08x}, requesting anyway",
                unsupported
            );
        }
        access.control_out(&FeaturesRequest::clear().pack())?;
        access.control_out(&FeaturesRequest::enable(features).pack())?;

        access.control_out(&BusRequest { on: true }.pack())?;
        drop(access);

        debug!(
            "on bus: nominal {} data {} features 0x{:08x}",
            nominal,
            data.map_or_else(|| "-".to_string(), |d| d.to_string()),
            features
        );

        self.on_bus = true;
        self.fd_mode = data.is_some();
        self.last_timing = Some(nominal);
        self.last_data_timing = data;
        Ok(())
    }

    /// Go off bus
    pub fn stop(&mut self) -> Result<()> {
        let mut access = ConfigAccess::acquire(&mut self.control)?;
        access.control_out(&BusRequest { on: false }.pack())?;
        drop(access);

        if self.on_bus {
            debug!("off bus");
        }
        self.on_bus = false;
        Ok(())
    }

    /// Queue a frame for transmission
    ///
    /// Returns the track id the device will report back in the TX receipt.
    pub fn send(&mut self, frame: &CanFrame) -> Result<u32> {
        if !self.on_bus {
            return Err(SuperCanError::NotOnBus);
        }
        if frame.is_fd() && !self.fd_mode {
            return Err(SuperCanError::InvalidFrame("CAN-FD frame on a classic bus"));
        }

        let mut slot = encode(frame)?;
        let track_id = self.next_track_id;
        slot.track_id = track_id;

        if !self.tx.try_push(&Slot::Tx(slot))? {
            return Err(SuperCanError::ChannelFull);
        }
        self.next_track_id = self.next_track_id.wrapping_add(1);
        Ok(track_id)
    }

    /// Drain everything currently in the receive ring
    pub fn receive(&mut self) -> Result<Vec<CanEvent>> {
        let tracker = &mut self.tracker;
        let events: Vec<CanEvent> = self
            .rx
            .drain()?
            .filter_map(|slot| decode_slot(&slot, tracker))
            .collect();

        for event in &events {
            if let CanEvent::Status(status) = event {
                debug!("{}", status);
            }
        }
        Ok(events)
    }

    /// Receive events, waiting up to `timeout` for the first one
    pub fn read(&mut self, timeout: Duration) -> Result<Vec<CanEvent>> {
        let events = self.receive()?;
        if !events.is_empty() {
            return Ok(events);
        }

        self.rx.wait(timeout);
        let events = self.receive()?;
        if events.is_empty() {
            return Err(SuperCanError::ReadTimeout);
        }
        Ok(events)
    }

    /// Discard pending receive slots and restart timestamp tracking
    ///
    /// Recovers a receive ring flagged as corrupt. Only allowed off bus.
    /// Returns the number of discarded slots.
    pub fn reset_rx(&mut self) -> Result<u32> {
        if self.on_bus {
            return Err(SuperCanError::AlreadyOnBus);
        }
        let dropped = self.rx.reset();
        self.tracker.reset();
        Ok(dropped)
    }

    pub fn capability(&self) -> &DeviceCapability {
        &self.capability
    }

    pub fn control(&self) -> &T {
        &self.control
    }

    pub fn is_on_bus(&self) -> bool {
        self.on_bus
    }

    /// Check if the bus runs in CAN-FD mode
    pub fn is_fd_mode(&self) -> bool {
        self.fd_mode
    }

    /// Nominal timing applied by the last successful `configure`
    pub fn last_timing(&self) -> Option<BitTimingSettings> {
        self.last_timing
    }

    /// Data phase timing applied by the last successful `configure`
    pub fn last_data_timing(&self) -> Option<BitTimingSettings> {
        self.last_data_timing
    }
}

impl<T: ControlTransport> std::fmt::Debug for ScDevice<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScDevice")
            .field("on_bus", &self.on_bus)
            .field("fd_mode", &self.fd_mode)
            .field("can_clk_hz", &self.capability.can_clk_hz)
            .field("features", &format_args!("0x{:08x}", self.capability.features))
            .field("next_track_id", &self.next_track_id)
            .finish()
    }
}

impl<T: ControlTransport> Drop for ScDevice<T> {
    fn drop(&mut self) {
        if self.on_bus {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::HeapRegion;
    use crate::ring::RingChannel;
    use crate::slot::{ErrorSlot, FrameSlot, StatusSlot};
    use crate::wake::{NoWake, WakeEvent};
    use std::sync::Arc;

    #[derive(Default)]
    struct MockTransport {
        deny: bool,
        held: bool,
        acquired: usize,
        released: usize,
        fail_on: Option<u8>,
        sent: Vec<Vec<u8>>,
    }

    impl ControlTransport for MockTransport {
        fn acquire_config_access(&mut self) -> Result<bool> {
            if self.deny {
                return Ok(false);
            }
            assert!(!self.held, "configuration access taken twice");
            self.held = true;
            self.acquired += 1;
            Ok(true)
        }

        fn release_config_access(&mut self) -> Result<()> {
            assert!(self.held, "configuration access released while not held");
            self.held = false;
            self.released += 1;
            Ok(())
        }

        fn control_out(&mut self, msg: &[u8]) -> Result<()> {
            assert!(self.held, "control message sent without configuration access");
            if self.fail_on == Some(msg[0]) {
                return Err(SuperCanError::Control {
                    request: msg[0],
                    reason: "rejected".to_string(),
                });
            }
            self.sent.push(msg.to_vec());
            Ok(())
        }
    }

    fn capability(features: u32) -> DeviceCapability {
        DeviceCapability {
            msg_buffer_size: 64,
            can_clk_hz: 80_000_000,
            nmbt_brp_min: 1,
            nmbt_brp_max: 0x200,
            nmbt_tseg1_min: 2,
            nmbt_tseg1_max: 0x100,
            nmbt_tseg2_min: 2,
            nmbt_tseg2_max: 0x80,
            nmbt_sjw_max: 0x80,
            dtbt_brp_min: 1,
            dtbt_brp_max: 0x20,
            dtbt_tseg1_min: 1,
            dtbt_tseg1_max: 0x20,
            dtbt_tseg2_min: 1,
            dtbt_tseg2_max: 0x10,
            dtbt_sjw_max: 0x10,
            tx_fifo_size: 32,
            rx_fifo_size: 32,
            features,
        }
    }

    struct Harness {
        dev: ScDevice<MockTransport>,
        /// Server side: fills the client's receive ring
        server_tx: RingProducer,
        /// Server side: drains the client's transmit ring
        server_rx: RingConsumer,
    }

    fn harness(transport: MockTransport, features: u32, capacity: u32) -> Harness {
        let rx_ring = RingChannel::new(Arc::new(HeapRegion::new(capacity).unwrap()), capacity)
            .unwrap();
        let tx_ring = RingChannel::new(Arc::new(HeapRegion::new(capacity).unwrap()), capacity)
            .unwrap();
        let rx_wake = Arc::new(WakeEvent::new());

        let dev = ScDevice::new(
            transport,
            capability(features),
            rx_ring.consumer(rx_wake.clone()),
            tx_ring.producer(Arc::new(NoWake)),
        );
        Harness {
            dev,
            server_tx: rx_ring.producer(rx_wake),
            server_rx: tx_ring.consumer(Arc::new(NoWake)),
        }
    }

    fn ids(sent: &[Vec<u8>]) -> Vec<u8> {
        sent.iter().map(|m| m[0]).collect()
    }

    #[test]
    fn test_configure_classic_sequence() {
        let mut h = harness(MockTransport::default(), SC_FEATURE_FLAG_TXR, 8);
        h.dev.configure(&BusConfig::default()).unwrap();

        let control = h.dev.control();
        assert_eq!(
            ids(&control.sent),
            vec![SC_MSG_BUS, SC_MSG_NM_BITTIMING, SC_MSG_FEATURES, SC_MSG_FEATURES, SC_MSG_BUS]
        );
        assert_eq!(control.sent[0], BusRequest { on: false }.pack().to_vec());
        assert_eq!(control.sent[4], BusRequest { on: true }.pack().to_vec());
        assert_eq!(control.sent[2], FeaturesRequest::clear().pack().to_vec());
        assert_eq!(
            control.sent[3],
            FeaturesRequest::enable(SC_FEATURE_FLAG_TXR).pack().to_vec()
        );

        let expected = solve(
            &capability(0).nominal_constraints(),
            &BitTimingTarget::new(500_000),
            Phase::Nominal,
        )
        .unwrap();
        assert_eq!(
            control.sent[1],
            pack_bittiming(SC_MSG_NM_BITTIMING, &expected).to_vec()
        );
        assert_eq!(control.acquired, 1);
        assert_eq!(control.released, 1);

        assert!(h.dev.is_on_bus());
        assert!(!h.dev.is_fd_mode());
        assert_eq!(h.dev.last_timing(), Some(expected));
        assert_eq!(h.dev.last_data_timing(), None);
    }

    #[test]
    fn test_configure_fd_sequence() {
        let features = SC_FEATURE_FLAG_TXR | SC_FEATURE_FLAG_FDF;
        let mut h = harness(MockTransport::default(), features, 8);
        h.dev.configure(&BusConfig::fd(500_000, 2_000_000)).unwrap();

        let control = h.dev.control();
        assert_eq!(
            ids(&control.sent),
            vec![
                SC_MSG_BUS,
                SC_MSG_NM_BITTIMING,
                SC_MSG_DT_BITTIMING,
                SC_MSG_FEATURES,
                SC_MSG_FEATURES,
                SC_MSG_BUS
            ]
        );
        assert_eq!(control.sent[4], FeaturesRequest::enable(features).pack().to_vec());

        let data = h.dev.last_data_timing().unwrap();
        assert_eq!(data.bitrate(80_000_000), 2_000_000);
        assert_eq!(
            control.sent[2],
            pack_bittiming(SC_MSG_DT_BITTIMING, &data).to_vec()
        );
        assert!(h.dev.is_fd_mode());
    }

    #[test]
    fn test_configure_access_denied() {
        let transport = MockTransport {
            deny: true,
            ..Default::default()
        };
        let mut h = harness(transport, SC_FEATURE_FLAG_TXR, 8);
        let err = h.dev.configure(&BusConfig::default()).unwrap_err();
        assert!(matches!(err, SuperCanError::ConfigAccessDenied));
        assert!(h.dev.control().sent.is_empty());
        assert!(!h.dev.is_on_bus());
    }

    #[test]
    fn test_configure_fd_not_supported() {
        let mut h = harness(MockTransport::default(), SC_FEATURE_FLAG_TXR, 8);
        let err = h.dev.configure(&BusConfig::fd(500_000, 2_000_000)).unwrap_err();
        assert!(matches!(err, SuperCanError::FdNotSupported));
        assert!(h.dev.control().sent.is_empty());
        assert_eq!(h.dev.control().acquired, 0);
    }

    #[test]
    fn test_configure_releases_access_on_error() {
        let transport = MockTransport {
            fail_on: Some(SC_MSG_FEATURES),
            ..Default::default()
        };
        let mut h = harness(transport, SC_FEATURE_FLAG_TXR, 8);
        let err = h.dev.configure(&BusConfig::default()).unwrap_err();
        assert!(matches!(err, SuperCanError::Control { request: SC_MSG_FEATURES, .. }));

        let control = h.dev.control();
        assert_eq!(control.acquired, 1);
        assert_eq!(control.released, 1);
        assert!(!control.held);
        assert!(!h.dev.is_on_bus());
        assert_eq!(h.dev.last_timing(), None);
    }

    #[test]
    fn test_configure_releases_access_on_solver_error() {
        let mut h = harness(MockTransport::default(), SC_FEATURE_FLAG_TXR, 8);
        let config = BusConfig::classic(499_979);
        let err = h.dev.configure(&config).unwrap_err();
        assert!(err.is_bit_timing_error());

        let control = h.dev.control();
        assert_eq!(ids(&control.sent), vec![SC_MSG_BUS]);
        assert_eq!(control.released, 1);
    }

    #[test]
    fn test_stop() {
        let mut h = harness(MockTransport::default(), SC_FEATURE_FLAG_TXR, 8);
        h.dev.configure(&BusConfig::default()).unwrap();
        h.dev.stop().unwrap();

        assert!(!h.dev.is_on_bus());
        let control = h.dev.control();
        assert_eq!(control.sent.last().unwrap(), &BusRequest { on: false }.pack().to_vec());
        assert_eq!(control.acquired, 2);
        assert_eq!(control.released, 2);
    }

    #[test]
    fn test_send_requires_bus() {
        let mut h = harness(MockTransport::default(), SC_FEATURE_FLAG_TXR, 8);
        let err = h.dev.send(&CanFrame::with_data(0x123, &[1])).unwrap_err();
        assert!(matches!(err, SuperCanError::NotOnBus));
    }

    #[test]
    fn test_send_fd_on_classic_bus() {
        let mut h = harness(MockTransport::default(), SC_FEATURE_FLAG_TXR, 8);
        h.dev.configure(&BusConfig::default()).unwrap();
        let frame = CanFrame::with_fd_data(0x123, &[0u8; 12], true);
        let err = h.dev.send(&frame).unwrap_err();
        assert!(matches!(err, SuperCanError::InvalidFrame(_)));
    }

    #[test]
    fn test_send_assigns_track_ids() {
        let mut h = harness(MockTransport::default(), SC_FEATURE_FLAG_TXR, 4);
        h.dev.configure(&BusConfig::default()).unwrap();

        assert_eq!(h.dev.send(&CanFrame::with_data(0x100, &[1])).unwrap(), 0);
        assert_eq!(h.dev.send(&CanFrame::with_data(0x101, &[2, 3])).unwrap(), 1);

        let slots: Vec<Slot> = h.server_rx.drain().unwrap().collect();
        assert_eq!(slots.len(), 2);
        match &slots[1] {
            Slot::Tx(s) => {
                assert_eq!(s.can_id, 0x101);
                assert_eq!(s.track_id, 1);
                assert_eq!(s.dlc, 2);
                assert_eq!(&s.data[..2], &[2, 3]);
            }
            other => panic!("unexpected slot {:?}", other),
        }
    }

    #[test]
    fn test_send_channel_full() {
        let mut h = harness(MockTransport::default(), SC_FEATURE_FLAG_TXR, 2);
        h.dev.configure(&BusConfig::default()).unwrap();

        let frame = CanFrame::with_data(0x7FF, &[]);
        h.dev.send(&frame).unwrap();
        h.dev.send(&frame).unwrap();
        let err = h.dev.send(&frame).unwrap_err();
        assert!(matches!(err, SuperCanError::ChannelFull));

        // The failed push does not consume a track id
        h.server_rx.drain().unwrap().for_each(drop);
        assert_eq!(h.dev.send(&frame).unwrap(), 2);
    }

    #[test]
    fn test_receive_events() {
        let mut h = harness(MockTransport::default(), SC_FEATURE_FLAG_TXR, 8);
        assert!(h.dev.receive().unwrap().is_empty());

        let mut rx = FrameSlot {
            timestamp_us: 100,
            can_id: 0x321,
            dlc: 3,
            ..Default::default()
        };
        rx.data[..3].copy_from_slice(&[7, 8, 9]);
        let echo = FrameSlot {
            timestamp_us: 200,
            can_id: 0x10,
            echo: true,
            track_id: 5,
            ..Default::default()
        };
        let status = StatusSlot {
            timestamp_us: 300,
            bus_status: SC_CAN_STATUS_ERROR_WARNING,
            ..Default::default()
        };

        assert!(h.server_tx.try_push(&Slot::Rx(rx)).unwrap());
        assert!(h.server_tx.try_push(&Slot::Tx(echo)).unwrap());
        assert!(h.server_tx.try_push(&Slot::Status(status)).unwrap());

        let events = h.dev.receive().unwrap();
        assert_eq!(events.len(), 3);
        match &events[0] {
            CanEvent::Rx(frame) => {
                assert_eq!(frame.can_id, 0x321);
                assert_eq!(frame.data(), &[7, 8, 9]);
                assert_eq!(frame.timestamp_us, 100);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(
            events[1],
            CanEvent::Tx { track_id: 5, echo: true, dropped: false, .. }
        ));
        assert!(matches!(events[2], CanEvent::Status(_)));
        assert_eq!(events[2].timestamp_us(), 300);
        assert!(h.dev.receive().unwrap().is_empty());
    }

    #[test]
    fn test_receive_drops_empty_error_slots() {
        let mut h = harness(MockTransport::default(), SC_FEATURE_FLAG_TXR, 8);
        let none = ErrorSlot {
            timestamp_us: 10,
            code: SC_CAN_ERROR_NONE,
            ..Default::default()
        };
        let ack = ErrorSlot {
            timestamp_us: 20,
            code: SC_CAN_ERROR_ACK,
            ..Default::default()
        };
        assert!(h.server_tx.try_push(&Slot::Error(none)).unwrap());
        assert!(h.server_tx.try_push(&Slot::Error(ack)).unwrap());

        let events = h.dev.receive().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp_us(), 20);
        assert!(matches!(events[0], CanEvent::Error(_)));
    }

    #[test]
    fn test_read_timeout() {
        let mut h = harness(MockTransport::default(), SC_FEATURE_FLAG_TXR, 8);
        let err = h.dev.read(Duration::from_millis(10)).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_read_wakes_on_push() {
        let mut h = harness(MockTransport::default(), SC_FEATURE_FLAG_TXR, 8);
        let mut server = h.server_tx;
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            let slot = FrameSlot {
                can_id: 0x42,
                ..Default::default()
            };
            assert!(server.try_push(&Slot::Rx(slot)).unwrap());
        });

        let events = h.dev.read(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_reset_rx() {
        let mut h = harness(MockTransport::default(), SC_FEATURE_FLAG_TXR, 8);
        h.dev.configure(&BusConfig::default()).unwrap();
        let err = h.dev.reset_rx().unwrap_err();
        assert!(matches!(err, SuperCanError::AlreadyOnBus));

        h.dev.stop().unwrap();
        let slot = FrameSlot::default();
        assert!(h.server_tx.try_push(&Slot::Rx(slot.clone())).unwrap());
        assert!(h.server_tx.try_push(&Slot::Rx(slot)).unwrap());
        assert_eq!(h.dev.reset_rx().unwrap(), 2);
        assert!(h.dev.receive().unwrap().is_empty());
    }
}
