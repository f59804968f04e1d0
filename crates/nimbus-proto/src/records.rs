//! Payload codecs: route records and the packet header prefix.
//!
//! `RouteSet` and `RouteDiff` payloads are a back-to-back sequence of
//! route records; `Packet` and `BroadcastPacket` payloads start with a
//! fixed 18-byte [`PacketHeader`] followed by the opaque packet body.

use bytes::{BufMut, Bytes};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    address::Address,
    errors::{ProtocolError, Result},
};

/// One route table entry on the wire:
///
/// ```text
/// ping: u32 | dist: u32 | inst: u32 | addrlen: u16 | addr: [u8; addrlen]
/// ```
///
/// `ping == 0` inside a `RouteDiff` withdraws the address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRecord {
    /// Path latency in microseconds; 0 encodes withdrawal
    pub ping: u32,
    /// Path length in hops
    pub dist: u32,
    /// The advertised address
    pub addr: Address,
}

/// Fixed bytes of a route record before the address bytes.
const RECORD_FIXED: usize = 14;

impl RouteRecord {
    /// A withdrawal record for the given address.
    #[must_use]
    pub fn withdraw(addr: Address) -> Self {
        Self { ping: 0, dist: 0, addr }
    }

    /// True when this record withdraws its address.
    #[must_use]
    pub fn is_withdrawal(&self) -> bool {
        self.ping == 0
    }

    /// Bytes this record occupies on the wire.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        RECORD_FIXED + self.addr.bytes().len()
    }

    /// Append this record to a buffer.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.ping);
        dst.put_u32(self.dist);
        dst.put_u32(self.addr.inst());

        #[allow(clippy::cast_possible_truncation)] // addr bytes capped at 255
        dst.put_u16(self.addr.bytes().len() as u16);
        dst.put_slice(self.addr.bytes());
    }

    /// Encode a list of records into one payload buffer.
    #[must_use]
    pub fn encode_list(records: &[Self]) -> Bytes {
        let size = records.iter().map(Self::wire_len).sum();
        let mut buf = Vec::with_capacity(size);
        for record in records {
            record.encode(&mut buf);
        }
        Bytes::from(buf)
    }

    /// Decode a back-to-back record list from a payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::RecordTruncated`] when the payload ends
    /// mid-record, and [`ProtocolError::AddressTooLong`] when a record
    /// claims more address bytes than the protocol allows.
    pub fn decode_list(bytes: &[u8]) -> Result<Vec<Self>> {
        let mut records = Vec::new();
        let mut off = 0;

        while off < bytes.len() {
            if bytes.len() - off < RECORD_FIXED {
                return Err(ProtocolError::RecordTruncated { offset: off });
            }

            let ping = u32::from_be_bytes(bytes[off..off + 4].try_into().expect("4 bytes"));
            let dist = u32::from_be_bytes(bytes[off + 4..off + 8].try_into().expect("4 bytes"));
            let inst = u32::from_be_bytes(bytes[off + 8..off + 12].try_into().expect("4 bytes"));
            let addrlen =
                u16::from_be_bytes(bytes[off + 12..off + 14].try_into().expect("2 bytes")) as usize;

            if bytes.len() - off - RECORD_FIXED < addrlen {
                return Err(ProtocolError::RecordTruncated { offset: off });
            }

            let addr = Address::new(inst, &bytes[off + RECORD_FIXED..off + RECORD_FIXED + addrlen])?;
            records.push(Self { ping, dist, addr });
            off += RECORD_FIXED + addrlen;
        }

        Ok(records)
    }
}

/// Fixed 18-byte prefix of every packet payload (big-endian).
///
/// ```text
/// id:   u32   packet uid, chosen at random by the originator
/// ttl:  u16   remaining hops
/// inst: u32   destination instance
/// dof:  u16   destination address offset within the body
/// ds:   u16   destination address length
/// sof:  u16   source address offset within the body
/// ss:   u16   source address length
/// ```
///
/// Unicast and broadcast packets share this prefix; only the frame kind
/// distinguishes them. Keeping the uid and TTL on every packet makes
/// duplicate suppression and hop limiting uniform across both paths.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct PacketHeader {
    id: [u8; 4],
    ttl: [u8; 2],
    inst: [u8; 4],
    dof: [u8; 2],
    ds: [u8; 2],
    sof: [u8; 2],
    ss: [u8; 2],
}

impl PacketHeader {
    /// Size of the serialized packet header (18 bytes)
    pub const SIZE: usize = 18;

    /// Create a packet header.
    #[must_use]
    #[allow(clippy::too_many_arguments)] // mirrors the wire layout
    pub fn new(id: u32, ttl: u16, inst: u32, dof: u16, ds: u16, sof: u16, ss: u16) -> Self {
        Self {
            id: id.to_be_bytes(),
            ttl: ttl.to_be_bytes(),
            inst: inst.to_be_bytes(),
            dof: dof.to_be_bytes(),
            ds: ds.to_be_bytes(),
            sof: sof.to_be_bytes(),
            ss: ss.to_be_bytes(),
        }
    }

    /// Parse the prefix of a packet payload (zero-copy).
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PacketTooShort`] if fewer than 18 bytes
    /// are available.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        Ok(Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::PacketTooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?
            .0)
    }

    /// Serialize to the 18 wire bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Packet uid
    #[must_use]
    pub fn id(&self) -> u32 {
        u32::from_be_bytes(self.id)
    }

    /// Remaining hops
    #[must_use]
    pub fn ttl(&self) -> u16 {
        u16::from_be_bytes(self.ttl)
    }

    /// Destination instance
    #[must_use]
    pub fn inst(&self) -> u32 {
        u32::from_be_bytes(self.inst)
    }

    /// Destination address offset within the body
    #[must_use]
    pub fn dof(&self) -> u16 {
        u16::from_be_bytes(self.dof)
    }

    /// Destination address length
    #[must_use]
    pub fn ds(&self) -> u16 {
        u16::from_be_bytes(self.ds)
    }

    /// Source address offset within the body
    #[must_use]
    pub fn sof(&self) -> u16 {
        u16::from_be_bytes(self.sof)
    }

    /// Source address length
    #[must_use]
    pub fn ss(&self) -> u16 {
        u16::from_be_bytes(self.ss)
    }

    /// True when the destination address lies within a body of
    /// `body_len` bytes and is non-empty. Packets failing this are
    /// dropped without touching the connection.
    #[must_use]
    pub fn dest_in_bounds(&self, body_len: usize) -> bool {
        self.ds() > 0 && body_len >= self.dof() as usize + self.ds() as usize
    }
}

impl std::fmt::Debug for PacketHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketHeader")
            .field("id", &format!("{:#010x}", self.id()))
            .field("ttl", &self.ttl())
            .field("inst", &self.inst())
            .field("dof", &self.dof())
            .field("ds", &self.ds())
            .field("sof", &self.sof())
            .field("ss", &self.ss())
            .finish()
    }
}

impl PartialEq for PacketHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PacketHeader {}
