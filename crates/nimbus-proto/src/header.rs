//! Frame header implementation with zero-copy parsing.
//!
//! The `FrameHeader` is a fixed 8-byte structure serialized as raw binary
//! (big-endian). Every frame on a mesh connection starts with one; the
//! receive path can cast it straight out of the ring buffer without
//! copying.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    errors::{ProtocolError, Result},
    kind::FrameKind,
};

/// Fixed 8-byte frame header (big-endian network byte order).
///
/// ```text
/// kind:     u8    frame kind (see FrameKind)
/// special:  u8    kind-specific operand; carries the probe id for
///                 Ping/Pong, zero otherwise
/// size:     u16   payload length in bytes
/// reserved: u32   must-ignore on receive, zero on send
/// ```
///
/// Fields are stored as raw byte arrays so the `#[repr(C, packed)]`
/// layout has no alignment requirements and any 8-byte pattern is a
/// structurally valid header. Semantic validation (payload size against
/// the connection MTU, kind dispatch) is the receiver's policy, not the
/// codec's: a `size` larger than the negotiated MTU resets the
/// connection, while an unknown `kind` merely skips the frame.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct FrameHeader {
    kind: u8,
    special: u8,
    pub(crate) size: [u8; 2],
    reserved: [u8; 4],
}

impl FrameHeader {
    /// Size of the serialized header (8 bytes)
    pub const SIZE: usize = 8;

    /// Create a new header with the given kind, empty payload, zero
    /// special byte.
    #[must_use]
    pub fn new(kind: FrameKind) -> Self {
        Self { kind: kind.to_u8(), special: 0, size: [0; 2], reserved: [0; 4] }
    }

    /// Create a new header with a kind-specific `special` operand
    /// (ping/pong probe id).
    #[must_use]
    pub fn with_special(kind: FrameKind, special: u8) -> Self {
        Self { kind: kind.to_u8(), special, size: [0; 2], reserved: [0; 4] }
    }

    /// Parse a header from the front of a byte buffer (zero-copy).
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooShort`] if fewer than 8 bytes are
    /// available. No other validation happens here; every bit pattern is
    /// a structurally valid header.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        Ok(Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?
            .0)
    }

    /// Serialize the header to its 8 wire bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Raw kind byte
    #[must_use]
    pub fn kind_raw(&self) -> u8 {
        self.kind
    }

    /// Kind as an enum, `None` when unknown (skip the frame)
    #[must_use]
    pub fn kind(&self) -> Option<FrameKind> {
        FrameKind::from_u8(self.kind)
    }

    /// Kind-specific operand byte
    #[must_use]
    pub fn special(&self) -> u8 {
        self.special
    }

    /// Payload length in bytes
    #[must_use]
    pub fn size(&self) -> u16 {
        u16::from_be_bytes(self.size)
    }
}

// Manual Debug (packed repr forbids borrowing fields in derive)
impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("kind", &format!("{:#04x}", self.kind_raw()))
            .field("special", &self.special())
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

impl PartialEq for FrameHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for FrameHeader {}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    impl Arbitrary for FrameHeader {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
            (any::<u8>(), any::<u8>(), any::<u16>())
                .prop_map(|(kind, special, size)| FrameHeader {
                    kind,
                    special,
                    size: size.to_be_bytes(),
                    reserved: [0; 4],
                })
                .boxed()
        }
    }

    #[test]
    fn header_size() {
        assert_eq!(std::mem::size_of::<FrameHeader>(), FrameHeader::SIZE);
        assert_eq!(FrameHeader::SIZE, 8);
    }

    proptest! {
        #[test]
        fn header_round_trip(header in any::<FrameHeader>()) {
            let bytes = header.to_bytes();
            let parsed = FrameHeader::from_bytes(&bytes).expect("should parse");
            prop_assert_eq!(&header, parsed);
        }
    }

    #[test]
    fn reject_short_buffer() {
        let short = [0u8; 5];
        assert_eq!(
            FrameHeader::from_bytes(&short),
            Err(ProtocolError::FrameTooShort { expected: 8, actual: 5 })
        );
    }

    #[test]
    fn special_carries_probe_id() {
        let header = FrameHeader::with_special(FrameKind::Ping, 0xAB);
        let header_bytes = header.to_bytes();
        let parsed = FrameHeader::from_bytes(&header_bytes).unwrap();
        assert_eq!(parsed.kind(), Some(FrameKind::Ping));
        assert_eq!(parsed.special(), 0xAB);
    }

    #[test]
    fn unknown_kind_still_parses() {
        let mut bytes = [0u8; 8];
        bytes[0] = 0x7E;
        bytes[2..4].copy_from_slice(&100u16.to_be_bytes());

        let header = FrameHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.kind(), None);
        assert_eq!(header.kind_raw(), 0x7E);
        assert_eq!(header.size(), 100);
    }
}
