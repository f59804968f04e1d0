//! Frame type combining header and payload.
//!
//! A `Frame` is the unit of transfer on a mesh connection: the fixed
//! 8-byte header followed by `size` payload bytes. This is a pure data
//! holder; interpretation of the payload (route records, packet bodies)
//! is up to the dispatcher.

use bytes::{BufMut, Bytes};

use crate::{
    errors::{ProtocolError, Result},
    header::FrameHeader,
    kind::FrameKind,
};

/// Largest payload the 16-bit size field can carry.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Complete protocol frame.
///
/// Layout on the wire: `[FrameHeader: 8 bytes] + [payload: size bytes]`.
///
/// # Invariants
///
/// - `payload.len()` matches `header.size()`; enforced by [`Frame::new`]
///   and verified by [`Frame::decode`].
/// - `payload.len() <= MAX_PAYLOAD`; violations are rejected during
///   encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header (8 bytes)
    pub header: FrameHeader,
    /// Raw payload bytes
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame; the header's `size` field is set from the
    /// actual payload length so the two cannot disagree.
    #[must_use]
    pub fn new(mut header: FrameHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();

        #[allow(clippy::cast_possible_truncation)]
        {
            header.size = (payload.len() as u16).to_be_bytes();
        }

        Self { header, payload }
    }

    /// Shorthand for a payload-less frame of the given kind.
    #[must_use]
    pub fn empty(kind: FrameKind) -> Self {
        Self::new(FrameHeader::new(kind), Bytes::new())
    }

    /// Total bytes this frame occupies on the wire.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        FrameHeader::SIZE + self.payload.len()
    }

    /// Encode the frame into a buffer.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PayloadTooLarge`] if the payload exceeds
    /// [`MAX_PAYLOAD`].
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD,
            });
        }

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);

        Ok(())
    }

    /// Encode the frame into a freshly allocated byte buffer.
    ///
    /// # Errors
    ///
    /// Same as [`Frame::encode`].
    pub fn encode_to_bytes(&self) -> Result<Bytes> {
        let mut buf = Vec::with_capacity(self.wire_len());
        self.encode(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Decode a frame from wire bytes.
    ///
    /// Trailing data after the frame is ignored (the receive ring may
    /// hold several frames back to back).
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be parsed or the buffer
    /// holds fewer payload bytes than the header claims.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = FrameHeader::from_bytes(bytes)?;

        let payload_size = header.size() as usize;
        let total = FrameHeader::SIZE + payload_size;

        if bytes.len() < total {
            return Err(ProtocolError::FrameTruncated {
                expected: payload_size,
                actual: bytes.len() - FrameHeader::SIZE,
            });
        }

        let payload = Bytes::copy_from_slice(&bytes[FrameHeader::SIZE..total]);

        Ok(Self { header: *header, payload })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    impl Arbitrary for Frame {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
            (any::<FrameHeader>(), prop::collection::vec(any::<u8>(), 0..512))
                .prop_map(|(header, payload)| Frame::new(header, payload))
                .boxed()
        }
    }

    proptest! {
        #[test]
        fn frame_round_trip(frame in any::<Frame>()) {
            let mut wire = Vec::new();
            frame.encode(&mut wire).expect("should encode");

            let parsed = Frame::decode(&wire).expect("should decode");
            prop_assert_eq!(frame, parsed);
        }
    }

    #[test]
    fn size_tracks_payload() {
        let frame = Frame::new(FrameHeader::new(FrameKind::Packet), vec![1, 2, 3, 4]);
        assert_eq!(frame.header.size(), 4);
        assert_eq!(frame.wire_len(), FrameHeader::SIZE + 4);
    }

    #[test]
    fn reject_truncated_frame() {
        let frame = Frame::new(FrameHeader::new(FrameKind::RouteSet), vec![0u8; 64]);
        let wire = frame.encode_to_bytes().unwrap();

        let result = Frame::decode(&wire[..FrameHeader::SIZE + 10]);
        assert_eq!(result, Err(ProtocolError::FrameTruncated { expected: 64, actual: 10 }));
    }

    #[test]
    fn trailing_bytes_ignored() {
        let frame = Frame::new(FrameHeader::new(FrameKind::Pong), vec![7u8; 3]);
        let mut wire = frame.encode_to_bytes().unwrap().to_vec();
        wire.extend_from_slice(&[0xAA; 16]);

        let parsed = Frame::decode(&wire).unwrap();
        assert_eq!(parsed, frame);
    }
}
