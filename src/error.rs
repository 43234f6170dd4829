//! Error types for the SuperCAN library
//!
//! This module defines the error types used throughout the library for
//! shared-memory ring protocol violations, frame validation and bit-timing
//! resolution failures.

use thiserror::Error;

/// Result type alias for SuperCAN operations
pub type Result<T> = std::result::Result<T, SuperCanError>;

/// The constraint that made a bit-timing request unsatisfiable
///
/// Variants are ordered by how far the search got before failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NoSolutionReason {
    /// No prescaler divides the clock into an integer number of time quanta per bit
    NoIntegerBitLength,
    /// Integer bit lengths exist but none fits the TSEG1/TSEG2 register ranges
    BitLengthOutOfRange,
    /// Every fitting bit length has fewer time quanta than requested
    MinTimeQuantaUnreachable,
    /// No fitting split leaves TSEG2 large enough for the requested SJW
    SjwUnreachable,
}

impl std::fmt::Display for NoSolutionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            NoSolutionReason::NoIntegerBitLength => "no integer bit length",
            NoSolutionReason::BitLengthOutOfRange => "bit length outside segment ranges",
            NoSolutionReason::MinTimeQuantaUnreachable => "minimum time quanta unreachable",
            NoSolutionReason::SjwUnreachable => "sync jump width unreachable",
        };
        f.write_str(text)
    }
}

/// Error types for SuperCAN operations
#[derive(Error, Debug)]
pub enum SuperCanError {
    /// Ring occupancy exceeds its capacity; the channel is unusable until reset
    #[error("Ring protocol corruption: put={put} get={get} capacity={capacity}")]
    ProtocolCorruption { put: u32, get: u32, capacity: u32 },

    /// No free slot in the ring
    #[error("Ring channel is full")]
    ChannelFull,

    /// Frame violates the codec contract
    #[error("Invalid frame: {0}")]
    InvalidFrame(&'static str),

    /// Bit timing request cannot be satisfied by the hardware
    #[error("No bit timing solution: {0}")]
    NoSolution(NoSolutionReason),

    /// Bit timing request is malformed
    #[error("Invalid bit timing request: {0}")]
    InvalidRequest(&'static str),

    /// Hardware bit timing constraints are inconsistent
    #[error("Invalid bit timing constraints: {0}")]
    InvalidConstraints(&'static str),

    /// Shared memory region is smaller than the ring layout requires
    #[error("Shared memory region too small: need {required} bytes, got {actual}")]
    RegionTooSmall { required: usize, actual: usize },

    /// Shared memory region is not aligned for the ring header
    #[error("Shared memory region is not 4-byte aligned")]
    RegionMisaligned,

    /// Ring capacity is zero or too large for the index width
    #[error("Invalid ring capacity: {0}")]
    InvalidCapacity(u32),

    /// Malformed message from the device
    #[error("Invalid response from device: expected {expected} bytes, got {actual}")]
    InvalidResponse { expected: usize, actual: usize },

    /// OS error while mapping shared memory
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Another client holds configuration access
    #[error("Configuration access denied")]
    ConfigAccessDenied,

    /// Device does not support CAN FD
    #[error("Device does not support CAN FD")]
    FdNotSupported,

    /// Control request rejected by the device server
    #[error("Control request 0x{request:02x} failed: {reason}")]
    Control { request: u8, reason: String },

    /// Device is on bus
    #[error("Device is already on bus")]
    AlreadyOnBus,

    /// Device is off bus
    #[error("Device is not on bus")]
    NotOnBus,

    /// Timeout during read operation
    #[error("Read timeout")]
    ReadTimeout,
}

impl SuperCanError {
    /// Check if this error is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, SuperCanError::ReadTimeout)
    }

    /// Check if this error requires the channel to be torn down
    pub fn is_fatal(&self) -> bool {
        matches!(self, SuperCanError::ProtocolCorruption { .. })
    }

    /// Check if this error came from the bit timing solver
    pub fn is_bit_timing_error(&self) -> bool {
        matches!(
            self,
            SuperCanError::NoSolution(_)
                | SuperCanError::InvalidRequest(_)
                | SuperCanError::InvalidConstraints(_)
        )
    }
}
