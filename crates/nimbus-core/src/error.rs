//! Error types for the nimbus core.
//!
//! The mesh is a best-effort datagram fabric: none of these errors
//! surface to an application caller. They exist to drive the disposition
//! policy — which failures reset a connection, which merely drop a frame
//! — and to give the logs something precise to say.

use thiserror::Error;

use nimbus_proto::ProtocolError;

/// Failures of the underlying encrypted byte transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer closed the stream
    #[error("closed by peer")]
    Closed,

    /// The transport handshake failed
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Read or write failure
    #[error("i/o failure: {0}")]
    Io(String),
}

/// Conditions that tear a connection down (the reset policy).
///
/// Every variant leads to the same disposition: immediate socket
/// teardown, queue drop, and — for outbound connections — the retry
/// timer. The variants exist for logging and for tests asserting *why*
/// a reset happened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// A frame header announced a payload larger than the session MTU
    #[error("oversized frame: {size} bytes exceeds mtu {mtu}")]
    OversizedFrame {
        /// Payload size announced by the header
        size: u16,
        /// Session MTU
        mtu: u16,
    },

    /// A payload failed structural parsing
    #[error("malformed payload: {0}")]
    Parse(#[from] ProtocolError),

    /// The transport failed underneath us
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    /// No pong arrived for an outstanding probe within the timeout
    #[error("ping timeout after {elapsed_us}us")]
    PingTimeout {
        /// Probe age when the timeout fired
        elapsed_us: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_convert() {
        let err: ConnectionError =
            ProtocolError::RecordTruncated { offset: 14 }.into();
        assert!(matches!(err, ConnectionError::Parse(_)));
    }

    #[test]
    fn display_is_terse() {
        let err = ConnectionError::OversizedFrame { size: 9000, mtu: 8192 };
        assert_eq!(err.to_string(), "oversized frame: 9000 bytes exceeds mtu 8192");
    }
}
