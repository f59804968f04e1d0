//! Frame kinds for the nimbus mesh protocol.
//!
//! Kinds are organized into ranges by function so a dispatcher can make
//! coarse decisions on the high nibble:
//!
//! - `0x0_`: data plane (unicast and broadcast packets)
//! - `0x1_`: routing control (table sets, diffs, requests)
//! - `0x2_`: liveness probes (ping/pong)
//!
//! Unknown kind values are **not** an error: the connection skips the
//! frame and keeps running, so future protocol revisions can add kinds
//! without breaking old nodes.

/// Frame kind byte.
///
/// Serialized as the first byte of every frame header. `#[repr(u8)]`
/// pins the numeric values for wire compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    // Data plane (0x00-0x0F)
    /// Unicast data packet
    Packet = 0x01,
    /// Flooded data packet (carries broadcast id + TTL)
    BroadcastPacket = 0x02,

    // Routing control (0x10-0x1F)
    /// Full replacement of the sender's route table
    RouteSet = 0x10,
    /// Incremental route update (ping 0 withdraws)
    RouteDiff = 0x11,
    /// Ask the peer for a full RouteSet
    RouteRequest = 0x12,

    // Liveness (0x20-0x2F)
    /// Latency probe; the probe id rides in the header `special` byte
    Ping = 0x20,
    /// Probe echo, same `special` byte as the ping it answers
    Pong = 0x21,
}

impl FrameKind {
    /// Convert to the raw wire byte
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Convert from a raw wire byte.
    ///
    /// Returns `None` for unknown values; the caller decides whether to
    /// skip the frame (the forward-compatible default) or reject it.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Packet),
            0x02 => Some(Self::BroadcastPacket),
            0x10 => Some(Self::RouteSet),
            0x11 => Some(Self::RouteDiff),
            0x12 => Some(Self::RouteRequest),
            0x20 => Some(Self::Ping),
            0x21 => Some(Self::Pong),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trip() {
        let kinds = [
            FrameKind::Packet,
            FrameKind::BroadcastPacket,
            FrameKind::RouteSet,
            FrameKind::RouteDiff,
            FrameKind::RouteRequest,
            FrameKind::Ping,
            FrameKind::Pong,
        ];

        for kind in kinds {
            assert_eq!(FrameKind::from_u8(kind.to_u8()), Some(kind));
        }
    }

    #[test]
    fn unknown_kind() {
        assert_eq!(FrameKind::from_u8(0x00), None);
        assert_eq!(FrameKind::from_u8(0x7F), None);
        assert_eq!(FrameKind::from_u8(0xFF), None);
    }
}
