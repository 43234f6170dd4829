//! Shared-memory ring slots
//!
//! Every ring slot is a fixed 80-byte record whose first byte tags the kind of
//! payload. This is the layout of this crate's rings, not of the SuperCAN
//! Windows server's 88-byte records: the timestamp is the raw 32-bit device
//! counter and every kind shares one header. Both peers of a ring must use
//! it byte for byte:
//!
//! ```text
//! offset size  RX / TX          status                    error
//! 0      1     type tag         type tag                  type tag
//! 1      1     dlc              reserved                  reserved
//! 2      1     frame flags      status flags              error flags
//! 3      1     echo (TX)        bus status                error code
//! 4      4     timestamp_us     timestamp_us              timestamp_us
//! 8      4     can id           rx_lost u16, tx_dropped u16
//! 12     4     track id (TX)    rx_err, tx_err, rx_fifo, tx_fifo
//! 16     64    payload
//! ```
//!
//! All multi-byte fields are little-endian.

use crate::constants::*;
use crate::error::{Result, SuperCanError};

/// Raw bytes of one slot
pub type RawSlot = [u8; SC_MM_SLOT_SIZE];

/// RX or TX frame record
#[derive(Clone, PartialEq, Eq)]
pub struct FrameSlot {
    /// Raw device timestamp in microseconds
    pub timestamp_us: u32,
    /// CAN identifier without flags
    pub can_id: u32,
    /// Data length code
    pub dlc: u8,
    /// Frame flags (SC_CAN_FRAME_FLAG_*)
    pub flags: u8,
    /// TX only: set when the receiving client originated the frame
    pub echo: bool,
    /// TX only: client assigned id used to match echoes to requests
    pub track_id: u32,
    /// Payload, only the first `dlc_to_len(dlc)` bytes are meaningful
    pub data: [u8; CANFD_MAX_DLEN],
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self {
            timestamp_us: 0,
            can_id: 0,
            dlc: 0,
            flags: 0,
            echo: false,
            track_id: 0,
            data: [0u8; CANFD_MAX_DLEN],
        }
    }
}

impl std::fmt::Debug for FrameSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSlot")
            .field("timestamp_us", &self.timestamp_us)
            .field("can_id", &format_args!("0x{:08X}", self.can_id))
            .field("dlc", &self.dlc)
            .field("flags", &format_args!("0x{:02X}", self.flags))
            .field("echo", &self.echo)
            .field("track_id", &self.track_id)
            .finish()
    }
}

/// Bus status record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSlot {
    pub timestamp_us: u32,
    /// Status flags (SC_CAN_STATUS_FLAG_*)
    pub flags: u8,
    /// Bus status code (SC_CAN_STATUS_*)
    pub bus_status: u8,
    /// Frames CAN -> USB lost since the last status
    pub rx_lost: u16,
    /// Frames USB -> CAN dropped since the last status
    pub tx_dropped: u16,
    pub rx_errors: u8,
    pub tx_errors: u8,
    pub rx_fifo_size: u8,
    pub tx_fifo_size: u8,
}

/// Bus error record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorSlot {
    pub timestamp_us: u32,
    /// Error flags (SC_CAN_ERROR_FLAG_*)
    pub flags: u8,
    /// Error code (SC_CAN_ERROR_*)
    pub code: u8,
}

/// One decoded ring slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    /// Frame received from the bus
    Rx(FrameSlot),
    /// TX request (client to server) or TX echo (server to client)
    Tx(FrameSlot),
    /// Bus status change
    Status(StatusSlot),
    /// Bus error
    Error(ErrorSlot),
}

impl Slot {
    /// Type tag written to the first slot byte
    pub fn type_tag(&self) -> u8 {
        match self {
            Slot::Rx(_) => SC_MM_DATA_TYPE_CAN_RX,
            Slot::Tx(_) => SC_MM_DATA_TYPE_CAN_TX,
            Slot::Status(_) => SC_MM_DATA_TYPE_CAN_STATUS,
            Slot::Error(_) => SC_MM_DATA_TYPE_CAN_ERROR,
        }
    }

    /// Raw device timestamp of the record
    pub fn timestamp_us(&self) -> u32 {
        match self {
            Slot::Rx(s) | Slot::Tx(s) => s.timestamp_us,
            Slot::Status(s) => s.timestamp_us,
            Slot::Error(s) => s.timestamp_us,
        }
    }

    /// Pack into the shared slot layout
    pub fn pack(&self) -> RawSlot {
        let mut buf = [0u8; SC_MM_SLOT_SIZE];
        buf[SC_MM_SLOT_TYPE_OFFSET] = self.type_tag();
        buf[SC_MM_SLOT_TIMESTAMP_OFFSET..SC_MM_SLOT_TIMESTAMP_OFFSET + 4]
            .copy_from_slice(&self.timestamp_us().to_le_bytes());

        match self {
            Slot::Rx(s) | Slot::Tx(s) => {
                buf[SC_MM_SLOT_DLC_OFFSET] = s.dlc;
                buf[SC_MM_SLOT_FLAGS_OFFSET] = s.flags;
                buf[SC_MM_SLOT_INFO_OFFSET] = u8::from(s.echo);
                buf[SC_MM_SLOT_CAN_ID_OFFSET..SC_MM_SLOT_CAN_ID_OFFSET + 4]
                    .copy_from_slice(&s.can_id.to_le_bytes());
                buf[SC_MM_SLOT_TRACK_ID_OFFSET..SC_MM_SLOT_TRACK_ID_OFFSET + 4]
                    .copy_from_slice(&s.track_id.to_le_bytes());
                buf[SC_MM_SLOT_DATA_OFFSET..].copy_from_slice(&s.data);
            }
            Slot::Status(s) => {
                buf[SC_MM_SLOT_FLAGS_OFFSET] = s.flags;
                buf[SC_MM_SLOT_INFO_OFFSET] = s.bus_status;
                buf[8..10].copy_from_slice(&s.rx_lost.to_le_bytes());
                buf[10..12].copy_from_slice(&s.tx_dropped.to_le_bytes());
                buf[12] = s.rx_errors;
                buf[13] = s.tx_errors;
                buf[14] = s.rx_fifo_size;
                buf[15] = s.tx_fifo_size;
            }
            Slot::Error(s) => {
                buf[SC_MM_SLOT_FLAGS_OFFSET] = s.flags;
                buf[SC_MM_SLOT_INFO_OFFSET] = s.code;
            }
        }

        buf
    }

    /// Unpack from the shared slot layout
    ///
    /// Returns `Ok(None)` for slots that carry no CAN data (unused or log
    /// records, or tags this crate does not know).
    pub fn unpack(buf: &[u8]) -> Result<Option<Slot>> {
        if buf.len() < SC_MM_SLOT_SIZE {
            return Err(SuperCanError::InvalidResponse {
                expected: SC_MM_SLOT_SIZE,
                actual: buf.len(),
            });
        }

        let timestamp_us = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let slot = match buf[SC_MM_SLOT_TYPE_OFFSET] {
            tag @ (SC_MM_DATA_TYPE_CAN_RX | SC_MM_DATA_TYPE_CAN_TX) => {
                let mut data = [0u8; CANFD_MAX_DLEN];
                data.copy_from_slice(&buf[SC_MM_SLOT_DATA_OFFSET..SC_MM_SLOT_SIZE]);
                let frame = FrameSlot {
                    timestamp_us,
                    can_id: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
                    dlc: buf[SC_MM_SLOT_DLC_OFFSET],
                    flags: buf[SC_MM_SLOT_FLAGS_OFFSET],
                    echo: buf[SC_MM_SLOT_INFO_OFFSET] != 0,
                    track_id: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
                    data,
                };
                if tag == SC_MM_DATA_TYPE_CAN_RX {
                    Slot::Rx(frame)
                } else {
                    Slot::Tx(frame)
                }
            }
            SC_MM_DATA_TYPE_CAN_STATUS => Slot::Status(StatusSlot {
                timestamp_us,
                flags: buf[SC_MM_SLOT_FLAGS_OFFSET],
                bus_status: buf[SC_MM_SLOT_INFO_OFFSET],
                rx_lost: u16::from_le_bytes([buf[8], buf[9]]),
                tx_dropped: u16::from_le_bytes([buf[10], buf[11]]),
                rx_errors: buf[12],
                tx_errors: buf[13],
                rx_fifo_size: buf[14],
                tx_fifo_size: buf[15],
            }),
            SC_MM_DATA_TYPE_CAN_ERROR => Slot::Error(ErrorSlot {
                timestamp_us,
                flags: buf[SC_MM_SLOT_FLAGS_OFFSET],
                code: buf[SC_MM_SLOT_INFO_OFFSET],
            }),
            _ => return Ok(None),
        };

        Ok(Some(slot))
    }
}
