//! Error types for the nimbus wire protocol.
//!
//! All errors are structured and testable. Which of them tear down a
//! connection (and which merely drop a frame) is policy that lives in
//! `nimbus-core`, not here.

use thiserror::Error;

/// Protocol-level errors that can occur during frame parsing and
/// validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer is shorter than the fixed frame header
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Expected minimum size in bytes
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Frame is truncated (header claims more payload than available)
    #[error("frame truncated: header claims {expected} payload bytes, only {actual} available")]
    FrameTruncated {
        /// Payload size claimed by the header
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// Payload does not fit the 16-bit size field
    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Actual payload size
        size: usize,
        /// Maximum encodable size
        max: usize,
    },

    /// Address bytes exceed the 255-byte limit
    #[error("address too long: {0} bytes exceeds 255")]
    AddressTooLong(usize),

    /// A route record list ended mid-record
    #[error("route record truncated at offset {offset}")]
    RecordTruncated {
        /// Byte offset of the record that could not be completed
        offset: usize,
    },

    /// Packet payload is shorter than the fixed packet header prefix
    #[error("packet too short: {actual} bytes, need at least {expected}")]
    PacketTooShort {
        /// Expected minimum size in bytes
        expected: usize,
        /// Actual size received
        actual: usize,
    },
}

/// Convenient Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
