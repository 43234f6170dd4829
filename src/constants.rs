//! SuperCAN protocol constants
//!
//! This module contains the constants shared between the device server and its
//! clients: shared-memory slot tags and layout, CAN frame flags, bus status and
//! error codes, feature flags, control message ids and bit-timing defaults.

// ============================================================================
// Shared-memory slot type tags (first byte of every slot)
// ============================================================================

/// Unused slot
pub const SC_MM_DATA_TYPE_NONE: u8 = 0x00;
/// CAN bus status event
pub const SC_MM_DATA_TYPE_CAN_STATUS: u8 = 0x01;
/// Received CAN frame
pub const SC_MM_DATA_TYPE_CAN_RX: u8 = 0x02;
/// Transmitted CAN frame (TX request or TX echo)
pub const SC_MM_DATA_TYPE_CAN_TX: u8 = 0x03;
/// CAN bus error event
pub const SC_MM_DATA_TYPE_CAN_ERROR: u8 = 0x04;
/// Server log message (not surfaced by this crate)
pub const SC_MM_DATA_TYPE_LOG_DATA: u8 = 0x10;

// ============================================================================
// Shared-memory ring layout
// ============================================================================
//
// Native to this crate. The Windows device server uses 88-byte slots with a
// 64-bit timestamp, so its rings are not interchangeable with these.

/// Size of one ring slot in bytes
pub const SC_MM_SLOT_SIZE: usize = 80;
/// Size of the ring header in bytes
pub const SC_MM_HEADER_SIZE: usize = 8;
/// Byte offset of the put index within the ring header
pub const SC_MM_PUT_INDEX_OFFSET: usize = 0;
/// Byte offset of the get index within the ring header
pub const SC_MM_GET_INDEX_OFFSET: usize = 4;
/// Byte offset of the first slot
pub const SC_MM_SLOTS_OFFSET: usize = SC_MM_HEADER_SIZE;

/// Byte offset of the type tag within a slot
pub const SC_MM_SLOT_TYPE_OFFSET: usize = 0;
/// Byte offset of the DLC within a frame slot
pub const SC_MM_SLOT_DLC_OFFSET: usize = 1;
/// Byte offset of the flags byte within a slot
pub const SC_MM_SLOT_FLAGS_OFFSET: usize = 2;
/// Byte offset of the echo marker / bus status / error code
pub const SC_MM_SLOT_INFO_OFFSET: usize = 3;
/// Byte offset of the raw 32-bit microsecond timestamp
pub const SC_MM_SLOT_TIMESTAMP_OFFSET: usize = 4;
/// Byte offset of the CAN identifier within a frame slot
pub const SC_MM_SLOT_CAN_ID_OFFSET: usize = 8;
/// Byte offset of the track id within a TX slot
pub const SC_MM_SLOT_TRACK_ID_OFFSET: usize = 12;
/// Byte offset of the payload within a frame slot
pub const SC_MM_SLOT_DATA_OFFSET: usize = 16;

/// Default number of slots for in-process channels
pub const DEFAULT_RING_CAPACITY: u32 = 256;

// ============================================================================
// CAN frame flags (flags byte of RX/TX slots)
// ============================================================================

/// Extended (29 bit id) frame
pub const SC_CAN_FRAME_FLAG_EXT: u8 = 0x01;
/// Remote request frame
pub const SC_CAN_FRAME_FLAG_RTR: u8 = 0x02;
/// CAN-FD frame
pub const SC_CAN_FRAME_FLAG_FDF: u8 = 0x04;
/// CAN-FD bitrate switching
pub const SC_CAN_FRAME_FLAG_BRS: u8 = 0x08;
/// Error state indicator
pub const SC_CAN_FRAME_FLAG_ESI: u8 = 0x10;
/// Frame was dropped by the device (TX echo only)
pub const SC_CAN_FRAME_FLAG_DRP: u8 = 0x20;

// ============================================================================
// CAN ID masks
// ============================================================================

/// Standard frame format mask (11-bit ID)
pub const CAN_SFF_MASK: u32 = 0x0000_07FF;
/// Extended frame format mask (29-bit ID)
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;

// ============================================================================
// CAN payload definitions
// ============================================================================

/// Maximum data length for classic CAN
pub const CAN_MAX_DLEN: usize = 8;
/// Maximum DLC for CAN FD
pub const CANFD_MAX_DLC: u8 = 15;
/// Maximum data length for CAN FD
pub const CANFD_MAX_DLEN: usize = 64;

/// DLC to data length conversion table
pub const CANFD_DLC_TO_LEN: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

// ============================================================================
// CAN bus status (bus status byte of status slots)
// ============================================================================

/// Normal operation
pub const SC_CAN_STATUS_ERROR_ACTIVE: u8 = 0x0;
/// TEC/REC > 96
pub const SC_CAN_STATUS_ERROR_WARNING: u8 = 0x1;
/// TEC/REC > 127
pub const SC_CAN_STATUS_ERROR_PASSIVE: u8 = 0x2;
/// TEC > 255
pub const SC_CAN_STATUS_BUS_OFF: u8 = 0x3;

/// No USB buffer space to queue a TX receipt
pub const SC_CAN_STATUS_FLAG_TXR_DESYNC: u8 = 0x1;
/// No space in the device interrupt queue
pub const SC_CAN_STATUS_FLAG_IRQ_QUEUE_FULL: u8 = 0x2;

// ============================================================================
// CAN bus errors (error code byte of error slots)
// ============================================================================

/// No error
pub const SC_CAN_ERROR_NONE: u8 = 0x0;
/// More than 5 equal bits in a sequence
pub const SC_CAN_ERROR_STUFF: u8 = 0x1;
/// Fixed format part of a frame has the wrong format
pub const SC_CAN_ERROR_FORM: u8 = 0x2;
/// Transmitted frame was not acknowledged
pub const SC_CAN_ERROR_ACK: u8 = 0x3;
/// Sent recessive, monitored dominant
pub const SC_CAN_ERROR_BIT1: u8 = 0x4;
/// Sent dominant, monitored recessive
pub const SC_CAN_ERROR_BIT0: u8 = 0x5;
/// CRC mismatch
pub const SC_CAN_ERROR_CRC: u8 = 0x6;

/// Error on transmit, if unset on receive
pub const SC_CAN_ERROR_FLAG_RXTX_TX: u8 = 0x1;
/// Error during data phase, if unset during arbitration
pub const SC_CAN_ERROR_FLAG_NMDT_DT: u8 = 0x2;

// ============================================================================
// Device feature flags
// ============================================================================

/// Device supports CAN-FD
pub const SC_FEATURE_FLAG_FDF: u32 = 0x0001;
/// Device supports disabling protocol exception handling
pub const SC_FEATURE_FLAG_EHD: u32 = 0x0002;
/// Device supports disabling automatic re-transmissions
pub const SC_FEATURE_FLAG_DAR: u32 = 0x0004;
/// Device supports RX message filters
pub const SC_FEATURE_FLAG_FLT: u32 = 0x0008;
/// Device supports transmission receipts
pub const SC_FEATURE_FLAG_TXR: u32 = 0x0010;
/// Device supports TX message generators
pub const SC_FEATURE_FLAG_GEN: u32 = 0x0020;
/// Device supports monitoring mode
pub const SC_FEATURE_FLAG_MON_MODE: u32 = 0x0100;
/// Device supports restricted mode
pub const SC_FEATURE_FLAG_RES_MODE: u32 = 0x0200;
/// Device supports external loopback mode
pub const SC_FEATURE_FLAG_EXT_LOOP_MODE: u32 = 0x0400;

/// Clear optional features
pub const SC_FEAT_OP_CLEAR: u8 = 0x00;
/// Add features
pub const SC_FEAT_OP_OR: u8 = 0x01;

// ============================================================================
// Control message ids
// ============================================================================

/// Device information
pub const SC_MSG_DEVICE_INFO: u8 = 0x03;
/// CAN information (clock, bit-timing ranges)
pub const SC_MSG_CAN_INFO: u8 = 0x04;
/// Nominal bit timing
pub const SC_MSG_NM_BITTIMING: u8 = 0x10;
/// Data phase bit timing
pub const SC_MSG_DT_BITTIMING: u8 = 0x11;
/// Feature flags
pub const SC_MSG_FEATURES: u8 = 0x13;
/// Go on / off bus
pub const SC_MSG_BUS: u8 = 0x1e;

/// Size of the device info message
pub const SC_MSG_DEVICE_INFO_SIZE: usize = 60;
/// Size of the CAN info message
pub const SC_MSG_CAN_INFO_SIZE: usize = 28;
/// Size of a bit-timing message
pub const SC_MSG_BITTIMING_SIZE: usize = 8;
/// Size of the features message
pub const SC_MSG_FEATURES_SIZE: usize = 8;
/// Size of the bus message
pub const SC_MSG_BUS_SIZE: usize = 4;

// ============================================================================
// Bit timing
// ============================================================================

/// Highest nominal (arbitration) bitrate
pub const CAN_NOMINAL_BITRATE_MAX: u32 = 1_000_000;
/// Highest CAN-FD data phase bitrate
pub const CAN_DATA_BITRATE_MAX: u32 = 15_000_000;

/// Sample point resolution used by the solver (per mille)
pub const CAN_SAMPLE_POINT_SCALE: u32 = 1000;

/// Get the CiA recommended nominal sample point (per mille) for a bitrate
pub fn nominal_sample_point_permille(bitrate: u32) -> u32 {
    if bitrate > 800_000 {
        750
    } else if bitrate > 500_000 {
        800
    } else {
        875
    }
}

/// Get the recommended data phase sample point (per mille) for a bitrate
pub fn data_sample_point_permille(bitrate: u32) -> u32 {
    if bitrate <= 2_000_000 {
        700
    } else {
        750
    }
}

/// Get human-readable name for a bus status code
pub fn bus_status_name(status: u8) -> &'static str {
    match status {
        SC_CAN_STATUS_ERROR_ACTIVE => "ERROR_ACTIVE",
        SC_CAN_STATUS_ERROR_WARNING => "ERROR_WARNING",
        SC_CAN_STATUS_ERROR_PASSIVE => "ERROR_PASSIVE",
        SC_CAN_STATUS_BUS_OFF => "BUS_OFF",
        _ => "UNKNOWN",
    }
}
