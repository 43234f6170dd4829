//! CAN frame codec
//!
//! This module maps between the application level `CanFrame` and the
//! `FrameSlot` records stored in the rings, and turns received slots into
//! `CanEvent`s with 64-bit timestamps.

use crate::constants::{
    CANFD_DLC_TO_LEN, CANFD_MAX_DLEN, CAN_EFF_MASK, CAN_MAX_DLEN, CAN_SFF_MASK, SC_CAN_ERROR_NONE,
    SC_CAN_FRAME_FLAG_BRS, SC_CAN_FRAME_FLAG_DRP, SC_CAN_FRAME_FLAG_ESI, SC_CAN_FRAME_FLAG_EXT,
    SC_CAN_FRAME_FLAG_FDF, SC_CAN_FRAME_FLAG_RTR,
};
use crate::error::{Result, SuperCanError};
use crate::slot::{FrameSlot, Slot};
use crate::structures::{BusError, BusStatus};
use crate::timestamp::TimestampTracker;

/// Flags that describe the frame itself, as opposed to its delivery
const FRAME_FLAGS: u8 = SC_CAN_FRAME_FLAG_EXT
    | SC_CAN_FRAME_FLAG_RTR
    | SC_CAN_FRAME_FLAG_FDF
    | SC_CAN_FRAME_FLAG_BRS
    | SC_CAN_FRAME_FLAG_ESI;

/// Convert DLC to data length
///
/// Only the low four bits of `dlc` are used.
pub fn dlc_to_len(dlc: u8) -> usize {
    CANFD_DLC_TO_LEN[usize::from(dlc & 0x0F)]
}

/// Convert data length to DLC
///
/// Returns `None` unless `length` is exactly one of the DLC lengths.
pub fn len_to_dlc(length: usize) -> Option<u8> {
    CANFD_DLC_TO_LEN
        .iter()
        .position(|&l| l == length)
        .map(|dlc| dlc as u8)
}

/// CAN or CAN-FD frame
///
/// `flags` uses the SC_CAN_FRAME_FLAG_* bits; `len` is the payload length in
/// bytes (the requested length for remote frames).
#[derive(Clone, PartialEq, Eq)]
pub struct CanFrame {
    /// CAN identifier without flags
    pub can_id: u32,
    /// Frame flags (EXT, RTR, FDF, BRS, ESI)
    pub flags: u8,
    /// Payload length in bytes
    pub len: usize,
    /// Frame data (up to 64 bytes for CAN FD)
    pub data: [u8; CANFD_MAX_DLEN],
    /// Device timestamp extended to 64 bits, zero for frames built locally
    pub timestamp_us: u64,
}

impl Default for CanFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl CanFrame {
    /// Create a new empty classic frame with id 0
    pub fn new() -> Self {
        Self {
            can_id: 0,
            flags: 0,
            len: 0,
            data: [0u8; CANFD_MAX_DLEN],
            timestamp_us: 0,
        }
    }

    /// Create a classic frame
    ///
    /// # Arguments
    /// * `can_id` - 11-bit identifier (use `extended()` for 29 bits)
    /// * `data` - Payload, at most 8 bytes are valid for classic CAN
    pub fn with_data(can_id: u32, data: &[u8]) -> Self {
        let mut frame = Self::new();
        frame.can_id = can_id;
        frame.set_data(data);
        frame
    }

    /// Create a CAN-FD frame
    ///
    /// # Arguments
    /// * `can_id` - 11-bit identifier (use `extended()` for 29 bits)
    /// * `data` - Payload, its length must be a valid CAN-FD length
    /// * `brs` - Enable bit rate switch (transmit data at higher rate)
    pub fn with_fd_data(can_id: u32, data: &[u8], brs: bool) -> Self {
        let mut frame = Self::with_data(can_id, data);
        frame.flags |= SC_CAN_FRAME_FLAG_FDF;
        if brs {
            frame.flags |= SC_CAN_FRAME_FLAG_BRS;
        }
        frame
    }

    /// Create a remote request for `len` bytes
    pub fn remote(can_id: u32, len: usize) -> Self {
        let mut frame = Self::new();
        frame.can_id = can_id;
        frame.flags = SC_CAN_FRAME_FLAG_RTR;
        frame.len = len;
        frame
    }

    /// Mark the identifier as 29-bit
    pub fn extended(mut self) -> Self {
        self.flags |= SC_CAN_FRAME_FLAG_EXT;
        self
    }

    fn set_data(&mut self, data: &[u8]) {
        let copy_len = data.len().min(CANFD_MAX_DLEN);
        self.data = [0u8; CANFD_MAX_DLEN];
        self.data[..copy_len].copy_from_slice(&data[..copy_len]);
        self.len = data.len();
    }

    /// Check if this is an extended ID frame (29-bit)
    pub fn is_extended_id(&self) -> bool {
        self.flags & SC_CAN_FRAME_FLAG_EXT != 0
    }

    /// Check if this is a remote transmission request
    pub fn is_remote_frame(&self) -> bool {
        self.flags & SC_CAN_FRAME_FLAG_RTR != 0
    }

    /// Check if this is a CAN FD frame
    pub fn is_fd(&self) -> bool {
        self.flags & SC_CAN_FRAME_FLAG_FDF != 0
    }

    /// Check if bit rate switch is enabled
    pub fn is_brs(&self) -> bool {
        self.flags & SC_CAN_FRAME_FLAG_BRS != 0
    }

    /// Check if the transmitter was error passive
    pub fn is_esi(&self) -> bool {
        self.flags & SC_CAN_FRAME_FLAG_ESI != 0
    }

    /// Get timestamp in seconds
    pub fn timestamp(&self) -> f64 {
        self.timestamp_us as f64 / 1_000_000.0
    }

    /// Get frame data as a slice
    ///
    /// Empty for remote frames.
    pub fn data(&self) -> &[u8] {
        if self.is_remote_frame() {
            &[]
        } else {
            &self.data[..self.len.min(CANFD_MAX_DLEN)]
        }
    }
}

impl std::fmt::Display for CanFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fd_indicator = if self.is_fd() { " FD" } else { "" };
        let brs_indicator = if self.is_brs() { " BRS" } else { "" };

        let data_str = if self.is_remote_frame() {
            "remote request".to_string()
        } else {
            self.data()
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(" ")
        };

        write!(
            f,
            "{:>8X}{}{}   [{}]  {}",
            self.can_id, fd_indicator, brs_indicator, self.len, data_str
        )
    }
}

impl std::fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanFrame")
            .field("can_id", &format_args!("0x{:08X}", self.can_id))
            .field("flags", &format_args!("0x{:02X}", self.flags))
            .field("len", &self.len)
            .field("data", &self.data())
            .field("timestamp_us", &self.timestamp_us)
            .finish()
    }
}

/// Encode a frame into a ring slot
///
/// The frame is validated first; nothing about an invalid frame reaches the
/// ring. Remote requests carry their requested length in the DLC but no
/// payload bytes.
pub fn encode(frame: &CanFrame) -> Result<FrameSlot> {
    let id_mask = if frame.is_extended_id() {
        CAN_EFF_MASK
    } else {
        CAN_SFF_MASK
    };
    if frame.can_id & !id_mask != 0 {
        return Err(SuperCanError::InvalidFrame("identifier out of range"));
    }

    let fd = frame.is_fd();
    let remote = frame.is_remote_frame();
    if remote && fd {
        return Err(SuperCanError::InvalidFrame("remote request in CAN-FD format"));
    }
    if !fd && (frame.is_brs() || frame.is_esi()) {
        return Err(SuperCanError::InvalidFrame("BRS or ESI on classic frame"));
    }
    if !fd && frame.len > CAN_MAX_DLEN {
        return Err(SuperCanError::InvalidFrame("classic payload longer than 8 bytes"));
    }
    let dlc = len_to_dlc(frame.len)
        .ok_or(SuperCanError::InvalidFrame("payload length has no DLC"))?;

    let flags = frame.flags & FRAME_FLAGS;

    let mut slot = FrameSlot {
        can_id: frame.can_id,
        dlc,
        flags,
        ..Default::default()
    };
    if !remote {
        slot.data[..frame.len].copy_from_slice(&frame.data[..frame.len]);
    }
    Ok(slot)
}

/// Decode a ring slot into a frame
///
/// The slot timestamp goes through `tracker`, so every consumed slot must be
/// decoded exactly once and in ring order.
pub fn decode(slot: &FrameSlot, tracker: &mut TimestampTracker) -> CanFrame {
    let flags = slot.flags & FRAME_FLAGS;

    let mut len = dlc_to_len(slot.dlc);
    if flags & SC_CAN_FRAME_FLAG_FDF == 0 {
        len = len.min(CAN_MAX_DLEN);
    }

    let id_mask = if flags & SC_CAN_FRAME_FLAG_EXT != 0 {
        CAN_EFF_MASK
    } else {
        CAN_SFF_MASK
    };

    let mut frame = CanFrame {
        can_id: slot.can_id & id_mask,
        flags,
        len,
        data: [0u8; CANFD_MAX_DLEN],
        timestamp_us: tracker.track(slot.timestamp_us),
    };
    if flags & SC_CAN_FRAME_FLAG_RTR == 0 {
        frame.data[..len].copy_from_slice(&slot.data[..len]);
    }
    frame
}

/// Something that happened on the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanEvent {
    /// Frame received from the bus
    Rx(CanFrame),
    /// Transmission receipt
    Tx {
        frame: CanFrame,
        /// Track id assigned when the frame was queued
        track_id: u32,
        /// The frame was sent by this client
        echo: bool,
        /// The device dropped the frame instead of sending it
        dropped: bool,
    },
    /// Bus status change
    Status(BusStatus),
    /// Bus error
    Error(BusError),
}

impl CanEvent {
    /// Extended device timestamp of the event
    pub fn timestamp_us(&self) -> u64 {
        match self {
            CanEvent::Rx(frame) | CanEvent::Tx { frame, .. } => frame.timestamp_us,
            CanEvent::Status(status) => status.timestamp_us,
            CanEvent::Error(error) => error.timestamp_us,
        }
    }
}

/// Decode any received slot into an event
///
/// Returns `None` for error slots that report no error. Their timestamp is
/// still fed to `tracker`.
pub fn decode_slot(slot: &Slot, tracker: &mut TimestampTracker) -> Option<CanEvent> {
    let event = match slot {
        Slot::Rx(s) => CanEvent::Rx(decode(s, tracker)),
        Slot::Tx(s) => CanEvent::Tx {
            frame: decode(s, tracker),
            track_id: s.track_id,
            echo: s.echo,
            dropped: s.flags & SC_CAN_FRAME_FLAG_DRP != 0,
        },
        Slot::Status(s) => {
            let ts = tracker.track(s.timestamp_us);
            CanEvent::Status(BusStatus::from_slot(s, ts))
        }
        Slot::Error(s) => {
            let ts = tracker.track(s.timestamp_us);
            if s.code == SC_CAN_ERROR_NONE {
                return None;
            }
            CanEvent::Error(BusError::from_slot(s, ts))
        }
    };
    Some(event)
}
