//! Negative-space fuzzer for the wire codecs.
//!
//! Feeds arbitrary bytes into every parser that faces the network:
//! frame decoding, route record lists, and the packet header prefix.
//! None of them may panic, and anything that parses must re-encode to
//! bytes that parse to the same value.

#![no_main]

use libfuzzer_sys::fuzz_target;
use nimbus_proto::{Frame, PacketHeader, RouteRecord};

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode(data) {
        let wire = frame.encode_to_bytes().expect("decoded frame re-encodes");
        let again = Frame::decode(&wire).expect("re-encoded frame decodes");
        assert_eq!(frame, again);
    }

    if let Ok(records) = RouteRecord::decode_list(data) {
        let wire = RouteRecord::encode_list(&records);
        let again = RouteRecord::decode_list(&wire).expect("re-encoded records decode");
        assert_eq!(records, again);
    }

    if let Ok(header) = PacketHeader::from_bytes(data) {
        let bytes = header.to_bytes();
        assert_eq!(&bytes[..], &data[..PacketHeader::SIZE]);
    }
});
