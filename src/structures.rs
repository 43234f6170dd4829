//! SuperCAN protocol structures
//!
//! This module contains the device description messages consumed by the
//! client, the packers for the configuration messages it sends, and the bus
//! status and error events surfaced from the receive ring.
//!
//! Multi-byte message fields are little-endian.

use crate::bittiming::{BitTimingConstraints, BitTimingSettings};
use crate::constants::*;
use crate::error::{Result, SuperCanError};
use crate::slot::{ErrorSlot, StatusSlot};

fn check_len(data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected {
        return Err(SuperCanError::InvalidResponse {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Device information
///
/// Unpacked from the 60-byte SC_MSG_DEVICE_INFO response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Features that are always on (SC_FEATURE_FLAG_*)
    pub feat_perm: u16,
    /// Features that can be switched with SC_MSG_FEATURES
    pub feat_conf: u16,
    /// Serial number bytes
    pub serial_number: Vec<u8>,
    /// Firmware version (major, minor, patch)
    pub fw_version: (u8, u8, u8),
    /// Device name
    pub name: String,
}

impl DeviceInfo {
    /// Unpack from a device info message
    pub fn unpack(data: &[u8]) -> Result<Self> {
        check_len(data, SC_MSG_DEVICE_INFO_SIZE)?;

        let sn_len = usize::from(data[7]).min(16);
        let name_len = usize::from(data[27]).min(32);

        Ok(Self {
            feat_perm: u16::from_le_bytes([data[2], data[3]]),
            feat_conf: u16::from_le_bytes([data[4], data[5]]),
            serial_number: data[8..8 + sn_len].to_vec(),
            fw_version: (data[24], data[25], data[26]),
            name: String::from_utf8_lossy(&data[28..28 + name_len]).into_owned(),
        })
    }

    /// All features the device offers, permanent or configurable
    pub fn features(&self) -> u32 {
        u32::from(self.feat_perm | self.feat_conf)
    }

    /// Check whether a feature is available
    pub fn has_feature(&self, flag: u32) -> bool {
        self.features() & flag != 0
    }

    /// Serial number as hex string
    pub fn serial_string(&self) -> String {
        self.serial_number
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect()
    }
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Name: {}\nSerial: {}\nFW Version: {}.{}.{}\nFeatures: perm=0x{:04x} conf=0x{:04x}",
            self.name,
            self.serial_string(),
            self.fw_version.0,
            self.fw_version.1,
            self.fw_version.2,
            self.feat_perm,
            self.feat_conf
        )
    }
}

/// CAN capability including bit timing constraints
///
/// Unpacked from the 28-byte SC_MSG_CAN_INFO response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapability {
    /// Device command buffer size
    pub msg_buffer_size: u16,
    /// CAN clock frequency in Hz
    pub can_clk_hz: u32,
    pub nmbt_brp_min: u8,
    pub nmbt_brp_max: u16,
    pub nmbt_tseg1_min: u8,
    pub nmbt_tseg1_max: u16,
    pub nmbt_tseg2_min: u8,
    pub nmbt_tseg2_max: u8,
    pub nmbt_sjw_max: u8,
    pub dtbt_brp_min: u8,
    pub dtbt_brp_max: u8,
    pub dtbt_tseg1_min: u8,
    pub dtbt_tseg1_max: u8,
    pub dtbt_tseg2_min: u8,
    pub dtbt_tseg2_max: u8,
    pub dtbt_sjw_max: u8,
    /// Device TX FIFO depth
    pub tx_fifo_size: u8,
    /// Device RX FIFO depth
    pub rx_fifo_size: u8,
    /// Device feature flags, filled in from DeviceInfo
    pub features: u32,
}

impl DeviceCapability {
    /// Unpack from a CAN info message
    pub fn unpack(data: &[u8]) -> Result<Self> {
        check_len(data, SC_MSG_CAN_INFO_SIZE)?;

        Ok(Self {
            msg_buffer_size: u16::from_le_bytes([data[2], data[3]]),
            can_clk_hz: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            nmbt_brp_max: u16::from_le_bytes([data[8], data[9]]),
            nmbt_tseg1_max: u16::from_le_bytes([data[10], data[11]]),
            nmbt_tseg1_min: data[12],
            nmbt_brp_min: data[13],
            nmbt_sjw_max: data[14],
            nmbt_tseg2_min: data[15],
            nmbt_tseg2_max: data[16],
            dtbt_brp_max: data[17],
            dtbt_brp_min: data[18],
            dtbt_tseg1_min: data[19],
            dtbt_tseg1_max: data[20],
            dtbt_sjw_max: data[21],
            dtbt_tseg2_min: data[22],
            dtbt_tseg2_max: data[23],
            tx_fifo_size: data[24],
            rx_fifo_size: data[25],
            features: 0,
        })
    }

    /// Attach the feature flags reported in the device info
    pub fn with_features(mut self, features: u32) -> Self {
        self.features = features;
        self
    }

    /// Check if the device can do CAN-FD
    pub fn supports_fd(&self) -> bool {
        self.features & SC_FEATURE_FLAG_FDF != 0
    }

    /// Nominal phase solver constraints
    pub fn nominal_constraints(&self) -> BitTimingConstraints {
        BitTimingConstraints {
            clock_hz: self.can_clk_hz,
            brp_min: u32::from(self.nmbt_brp_min),
            brp_max: u32::from(self.nmbt_brp_max),
            brp_step: 1,
            tseg1_min: u32::from(self.nmbt_tseg1_min),
            tseg1_max: u32::from(self.nmbt_tseg1_max),
            tseg2_min: u32::from(self.nmbt_tseg2_min),
            tseg2_max: u32::from(self.nmbt_tseg2_max),
            sjw_max: u32::from(self.nmbt_sjw_max),
        }
    }

    /// Data phase solver constraints
    pub fn data_constraints(&self) -> BitTimingConstraints {
        BitTimingConstraints {
            clock_hz: self.can_clk_hz,
            brp_min: u32::from(self.dtbt_brp_min),
            brp_max: u32::from(self.dtbt_brp_max),
            brp_step: 1,
            tseg1_min: u32::from(self.dtbt_tseg1_min),
            tseg1_max: u32::from(self.dtbt_tseg1_max),
            tseg2_min: u32::from(self.dtbt_tseg2_min),
            tseg2_max: u32::from(self.dtbt_tseg2_max),
            sjw_max: u32::from(self.dtbt_sjw_max),
        }
    }

    /// Get clock frequency in MHz
    pub fn clock_mhz(&self) -> f32 {
        self.can_clk_hz as f32 / 1_000_000.0
    }
}

impl std::fmt::Display for DeviceCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Clock: {} Hz ({:.1} MHz)\n\
             Nominal BRP: {} - {}\n\
             Nominal TSEG1: {} - {}\n\
             Nominal TSEG2: {} - {}\n\
             Nominal SJW (max): {}",
            self.can_clk_hz,
            self.clock_mhz(),
            self.nmbt_brp_min,
            self.nmbt_brp_max,
            self.nmbt_tseg1_min,
            self.nmbt_tseg1_max,
            self.nmbt_tseg2_min,
            self.nmbt_tseg2_max,
            self.nmbt_sjw_max
        )?;

        if self.supports_fd() {
            write!(
                f,
                "\nData Phase (CAN FD):\n\
                   DBRP: {} - {}\n\
                   DTSEG1: {} - {}\n\
                   DTSEG2: {} - {}\n\
                   DSJW (max): {}",
                self.dtbt_brp_min,
                self.dtbt_brp_max,
                self.dtbt_tseg1_min,
                self.dtbt_tseg1_max,
                self.dtbt_tseg2_min,
                self.dtbt_tseg2_max,
                self.dtbt_sjw_max
            )?;
        }

        write!(f, "\nFIFO: tx={} rx={}", self.tx_fifo_size, self.rx_fifo_size)
    }
}

/// Pack a nominal or data bit timing message
///
/// # Arguments
/// * `id` - SC_MSG_NM_BITTIMING or SC_MSG_DT_BITTIMING
/// * `settings` - Solved register values
pub fn pack_bittiming(id: u8, settings: &BitTimingSettings) -> [u8; SC_MSG_BITTIMING_SIZE] {
    let mut buf = [0u8; SC_MSG_BITTIMING_SIZE];
    buf[0] = id;
    buf[1] = SC_MSG_BITTIMING_SIZE as u8;
    buf[2] = settings.sjw as u8;
    buf[3] = settings.tseg2 as u8;
    buf[4..6].copy_from_slice(&(settings.brp as u16).to_le_bytes());
    buf[6..8].copy_from_slice(&(settings.tseg1 as u16).to_le_bytes());
    buf
}

/// Feature flag update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeaturesRequest {
    /// SC_FEAT_OP_CLEAR or SC_FEAT_OP_OR
    pub op: u8,
    /// Feature flags (SC_FEATURE_FLAG_*)
    pub flags: u32,
}

impl FeaturesRequest {
    /// Clear all configurable features
    pub fn clear() -> Self {
        Self {
            op: SC_FEAT_OP_CLEAR,
            flags: 0,
        }
    }

    /// Enable the given features
    pub fn enable(flags: u32) -> Self {
        Self {
            op: SC_FEAT_OP_OR,
            flags,
        }
    }

    /// Pack into bytes for the control channel
    pub fn pack(&self) -> [u8; SC_MSG_FEATURES_SIZE] {
        let mut buf = [0u8; SC_MSG_FEATURES_SIZE];
        buf[0] = SC_MSG_FEATURES;
        buf[1] = SC_MSG_FEATURES_SIZE as u8;
        buf[3] = self.op;
        buf[4..8].copy_from_slice(&self.flags.to_le_bytes());
        buf
    }
}

/// Go on or off bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusRequest {
    pub on: bool,
}

impl BusRequest {
    /// Pack into bytes for the control channel
    pub fn pack(&self) -> [u8; SC_MSG_BUS_SIZE] {
        let mut buf = [0u8; SC_MSG_BUS_SIZE];
        buf[0] = SC_MSG_BUS;
        buf[1] = SC_MSG_BUS_SIZE as u8;
        buf[2..4].copy_from_slice(&u16::from(self.on).to_le_bytes());
        buf
    }
}

/// CAN bus state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    ErrorActive,
    ErrorWarning,
    ErrorPassive,
    BusOff,
    Unknown,
}

impl BusState {
    /// Map a bus status code
    pub fn from_code(code: u8) -> Self {
        match code {
            SC_CAN_STATUS_ERROR_ACTIVE => BusState::ErrorActive,
            SC_CAN_STATUS_ERROR_WARNING => BusState::ErrorWarning,
            SC_CAN_STATUS_ERROR_PASSIVE => BusState::ErrorPassive,
            SC_CAN_STATUS_BUS_OFF => BusState::BusOff,
            _ => BusState::Unknown,
        }
    }
}

/// Bus status event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStatus {
    /// Device timestamp extended to 64 bits
    pub timestamp_us: u64,
    pub state: BusState,
    /// Raw bus status code
    pub code: u8,
    /// Status flags (SC_CAN_STATUS_FLAG_*)
    pub flags: u8,
    /// Frames lost on the way to the host since the last status
    pub rx_lost: u16,
    /// Frames dropped on the way to the bus since the last status
    pub tx_dropped: u16,
    /// RX error counter
    pub rx_errors: u8,
    /// TX error counter
    pub tx_errors: u8,
    pub rx_fifo_size: u8,
    pub tx_fifo_size: u8,
}

impl BusStatus {
    /// Build from a status slot and its extended timestamp
    pub fn from_slot(slot: &StatusSlot, timestamp_us: u64) -> Self {
        Self {
            timestamp_us,
            state: BusState::from_code(slot.bus_status),
            code: slot.bus_status,
            flags: slot.flags,
            rx_lost: slot.rx_lost,
            tx_dropped: slot.tx_dropped,
            rx_errors: slot.rx_errors,
            tx_errors: slot.tx_errors,
            rx_fifo_size: slot.rx_fifo_size,
            tx_fifo_size: slot.tx_fifo_size,
        }
    }

    /// Get human-readable state name
    pub fn state_name(&self) -> &'static str {
        bus_status_name(self.code)
    }

    /// Check if the device lost track of TX receipts
    pub fn is_txr_desync(&self) -> bool {
        self.flags & SC_CAN_STATUS_FLAG_TXR_DESYNC != 0
    }

    /// Check if the device interrupt queue overflowed
    pub fn is_irq_queue_full(&self) -> bool {
        self.flags & SC_CAN_STATUS_FLAG_IRQ_QUEUE_FULL != 0
    }

    /// Check if bus is off (TEC > 255)
    pub fn is_bus_off(&self) -> bool {
        self.state == BusState::BusOff
    }
}

impl std::fmt::Display for BusStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "State: {}\nRX Error Counter: {}\nTX Error Counter: {}\nRX lost: {}\nTX dropped: {}",
            self.state_name(),
            self.rx_errors,
            self.tx_errors,
            self.rx_lost,
            self.tx_dropped
        )
    }
}

/// Cause of a bus error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusErrorKind {
    Ack,
    Bit0,
    Bit1,
    Form,
    Stuff,
    Crc,
    Other(u8),
}

impl BusErrorKind {
    /// Map an error code
    pub fn from_code(code: u8) -> Self {
        match code {
            SC_CAN_ERROR_ACK => BusErrorKind::Ack,
            SC_CAN_ERROR_BIT0 => BusErrorKind::Bit0,
            SC_CAN_ERROR_BIT1 => BusErrorKind::Bit1,
            SC_CAN_ERROR_FORM => BusErrorKind::Form,
            SC_CAN_ERROR_STUFF => BusErrorKind::Stuff,
            SC_CAN_ERROR_CRC => BusErrorKind::Crc,
            other => BusErrorKind::Other(other),
        }
    }
}

/// Bus error event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusError {
    /// Device timestamp extended to 64 bits
    pub timestamp_us: u64,
    pub kind: BusErrorKind,
    /// Error happened while transmitting
    pub tx: bool,
    /// Error happened in the CAN-FD data phase
    pub data_phase: bool,
}

impl BusError {
    /// Build from an error slot and its extended timestamp
    pub fn from_slot(slot: &ErrorSlot, timestamp_us: u64) -> Self {
        Self {
            timestamp_us,
            kind: BusErrorKind::from_code(slot.code),
            tx: slot.flags & SC_CAN_ERROR_FLAG_RXTX_TX != 0,
            data_phase: slot.flags & SC_CAN_ERROR_FLAG_NMDT_DT != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn can_info_bytes() -> [u8; SC_MSG_CAN_INFO_SIZE] {
        let mut data = [0u8; SC_MSG_CAN_INFO_SIZE];
        data[0] = SC_MSG_CAN_INFO;
        data[1] = SC_MSG_CAN_INFO_SIZE as u8;
        data[2..4].copy_from_slice(&64u16.to_le_bytes());
        data[4..8].copy_from_slice(&80_000_000u32.to_le_bytes());
        data[8..10].copy_from_slice(&512u16.to_le_bytes()); // nm brp max
        data[10..12].copy_from_slice(&256u16.to_le_bytes()); // nm tseg1 max
        data[12] = 2; // nm tseg1 min
        data[13] = 1; // nm brp min
        data[14] = 128; // nm sjw max
        data[15] = 2; // nm tseg2 min
        data[16] = 128; // nm tseg2 max
        data[17] = 32; // dt brp max
        data[18] = 1; // dt brp min
        data[19] = 1; // dt tseg1 min
        data[20] = 32; // dt tseg1 max
        data[21] = 16; // dt sjw max
        data[22] = 1; // dt tseg2 min
        data[23] = 16; // dt tseg2 max
        data[24] = 8;
        data[25] = 16;
        data
    }

    #[test]
    fn test_device_info_unpack() {
        let mut data = [0u8; SC_MSG_DEVICE_INFO_SIZE];
        data[0] = SC_MSG_DEVICE_INFO;
        data[1] = 60;
        data[2..4].copy_from_slice(&(SC_FEATURE_FLAG_FDF as u16).to_le_bytes());
        data[4..6].copy_from_slice(&(SC_FEATURE_FLAG_TXR as u16).to_le_bytes());
        data[7] = 4;
        data[8..12].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        data[24..27].copy_from_slice(&[0, 5, 1]);
        data[27] = 8;
        data[28..36].copy_from_slice(b"SuperCAN");

        let info = DeviceInfo::unpack(&data).unwrap();
        assert_eq!(info.serial_string(), "DEADBEEF");
        assert_eq!(info.fw_version, (0, 5, 1));
        assert_eq!(info.name, "SuperCAN");
        assert!(info.has_feature(SC_FEATURE_FLAG_FDF));
        assert!(info.has_feature(SC_FEATURE_FLAG_TXR));
        assert!(!info.has_feature(SC_FEATURE_FLAG_DAR));
    }

    #[test]
    fn test_short_messages_rejected() {
        assert!(matches!(
            DeviceInfo::unpack(&[0u8; 12]),
            Err(SuperCanError::InvalidResponse { expected: 60, actual: 12 })
        ));
        assert!(DeviceCapability::unpack(&[0u8; 27]).is_err());
    }

    #[test]
    fn test_device_capability_unpack() {
        let cap = DeviceCapability::unpack(&can_info_bytes()).unwrap();
        assert_eq!(cap.msg_buffer_size, 64);
        assert_eq!(cap.clock_mhz(), 80.0);
        assert!(!cap.supports_fd());

        let nm = cap.nominal_constraints();
        assert_eq!(nm.clock_hz, 80_000_000);
        assert_eq!((nm.brp_min, nm.brp_max, nm.brp_step), (1, 512, 1));
        assert_eq!((nm.tseg1_min, nm.tseg1_max), (2, 256));
        assert_eq!((nm.tseg2_min, nm.tseg2_max, nm.sjw_max), (2, 128, 128));

        let dt = cap.data_constraints();
        assert_eq!((dt.brp_min, dt.brp_max), (1, 32));
        assert_eq!((dt.tseg1_min, dt.tseg1_max), (1, 32));
        assert_eq!((dt.tseg2_min, dt.tseg2_max, dt.sjw_max), (1, 16, 16));

        let cap = cap.with_features(SC_FEATURE_FLAG_FDF | SC_FEATURE_FLAG_TXR);
        assert!(cap.supports_fd());
    }

    #[test]
    fn test_pack_bittiming() {
        let settings = BitTimingSettings {
            brp: 0x0102,
            tseg1: 0x0127,
            tseg2: 32,
            sjw: 4,
        };
        let packed = pack_bittiming(SC_MSG_NM_BITTIMING, &settings);
        assert_eq!(packed, [0x10, 8, 4, 32, 0x02, 0x01, 0x27, 0x01]);
    }

    #[test]
    fn test_pack_features_and_bus() {
        let packed = FeaturesRequest::enable(SC_FEATURE_FLAG_TXR | SC_FEATURE_FLAG_FDF).pack();
        assert_eq!(packed, [SC_MSG_FEATURES, 8, 0, SC_FEAT_OP_OR, 0x11, 0, 0, 0]);
        assert_eq!(FeaturesRequest::clear().pack()[3], SC_FEAT_OP_CLEAR);

        assert_eq!(BusRequest { on: true }.pack(), [SC_MSG_BUS, 4, 1, 0]);
        assert_eq!(BusRequest { on: false }.pack(), [SC_MSG_BUS, 4, 0, 0]);
    }

    #[test]
    fn test_bus_status_from_slot() {
        let slot = StatusSlot {
            timestamp_us: 1,
            flags: SC_CAN_STATUS_FLAG_TXR_DESYNC,
            bus_status: SC_CAN_STATUS_ERROR_WARNING,
            rx_lost: 2,
            tx_dropped: 3,
            rx_errors: 97,
            tx_errors: 0,
            rx_fifo_size: 0,
            tx_fifo_size: 0,
        };
        let status = BusStatus::from_slot(&slot, 1 << 32 | 1);
        assert_eq!(status.state, BusState::ErrorWarning);
        assert_eq!(status.state_name(), "ERROR_WARNING");
        assert_eq!(status.timestamp_us, (1 << 32) + 1);
        assert!(status.is_txr_desync());
        assert!(!status.is_irq_queue_full());
        assert!(!status.is_bus_off());
        assert_eq!(BusState::from_code(9), BusState::Unknown);
    }

    #[test]
    fn test_bus_error_from_slot() {
        let slot = ErrorSlot {
            timestamp_us: 5,
            flags: SC_CAN_ERROR_FLAG_NMDT_DT,
            code: SC_CAN_ERROR_BIT0,
        };
        let error = BusError::from_slot(&slot, 5);
        assert_eq!(error.kind, BusErrorKind::Bit0);
        assert!(!error.tx);
        assert!(error.data_phase);
        assert_eq!(BusErrorKind::from_code(0x42), BusErrorKind::Other(0x42));
    }
}
