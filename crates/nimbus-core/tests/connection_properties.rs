//! Crate-boundary properties of the connection state machine.
//!
//! These tests exercise the public API only: lifecycle, framing across
//! arbitrary byte-stream fragmentation, and the two-lane flow control
//! contract (scenario: a full data lane never starves protocol traffic).

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use nimbus_core::{
    Config, ConnEvent, ConnState, Connection, SystemEnv, TransportError,
    transport::{IoOutcome, Transport},
};
use nimbus_proto::{Frame, FrameHeader, FrameKind, PacketHeader, RouteRecord};

/// Byte pipe with a scriptable per-read cap, to exercise fragmentation.
struct ChunkedTransport {
    inbox: Rc<RefCell<VecDeque<u8>>>,
    read_cap: usize,
}

impl ChunkedTransport {
    fn new(read_cap: usize) -> (Self, Rc<RefCell<VecDeque<u8>>>) {
        let inbox = Rc::new(RefCell::new(VecDeque::new()));
        (Self { inbox: Rc::clone(&inbox), read_cap }, inbox)
    }
}

impl Transport for ChunkedTransport {
    fn begin_connect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
    fn begin_accept(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
    fn established(&self) -> bool {
        true
    }
    fn handshake_done(&self) -> bool {
        true
    }
    fn read(&mut self, buf: &mut [u8]) -> Result<IoOutcome, TransportError> {
        let mut inbox = self.inbox.borrow_mut();
        if inbox.is_empty() {
            return Ok(IoOutcome::WantMore);
        }
        let n = buf.len().min(inbox.len()).min(self.read_cap);
        for slot in buf.iter_mut().take(n) {
            *slot = inbox.pop_front().expect("length checked");
        }
        Ok(IoOutcome::Done(n))
    }
    fn write(&mut self, buf: &[u8]) -> Result<IoOutcome, TransportError> {
        Ok(IoOutcome::Done(buf.len()))
    }
    fn shutdown(&mut self) {}
}

fn activate(
    read_cap: usize,
    config: Config,
) -> (Connection<ChunkedTransport>, Rc<RefCell<VecDeque<u8>>>, SystemEnv) {
    let env = SystemEnv::new();
    let (transport, inbox) = ChunkedTransport::new(read_cap);

    let mut conn = Connection::outbound(0, config, "peer".into(), transport);
    conn.start_connect(&env);
    let events = conn.poll_progress(&env);
    assert_eq!(events, vec![ConnEvent::Activated]);
    assert_eq!(conn.state(), ConnState::Active);

    (conn, inbox, env)
}

#[test]
fn frames_survive_any_fragmentation() {
    // Three frames, parsed identically whether bytes arrive in dribbles
    // of 1, 7, or all at once.
    let frames = vec![
        Frame::new(
            FrameHeader::new(FrameKind::RouteDiff),
            RouteRecord::encode_list(&[RouteRecord {
                ping: 777,
                dist: 2,
                addr: nimbus_proto::Address::new(3, vec![1, 2, 3]).unwrap(),
            }]),
        ),
        Frame::empty(FrameKind::RouteRequest),
        Frame::new(FrameHeader::with_special(FrameKind::Ping, 9), bytes::Bytes::new()),
    ];

    let mut wire = Vec::new();
    for frame in &frames {
        frame.encode(&mut wire).unwrap();
    }

    for cap in [1usize, 7, wire.len()] {
        let (mut conn, inbox, env) = activate(cap, Config::default());
        inbox.borrow_mut().extend(wire.iter().copied());

        let mut events = Vec::new();
        // A tiny read cap needs several poll rounds, as a poller would
        for _ in 0..wire.len() {
            events.extend(conn.try_read(&env).unwrap());
            if inbox.borrow().is_empty() {
                break;
            }
        }
        events.extend(conn.try_read(&env).unwrap());

        // RouteDiff ingested, RouteRequest surfaced, Ping answered
        assert_eq!(
            events,
            vec![ConnEvent::RouteDirty, ConnEvent::RouteRequest],
            "cap {cap}"
        );
        assert_eq!(conn.remote_routes().len(), 1, "cap {cap}");
        assert!(conn.proto_q_size() > 0, "cap {cap}: pong should be queued");
    }
}

#[test]
fn full_data_lane_rejects_packets_but_protocol_flows() {
    let config = Config { max_waiting_data_size: 1000, ..Config::default() };
    let (mut conn, inbox, env) = activate(4096, config);

    let header = PacketHeader::new(1, 4, 1, 0, 2, 0, 0);
    let body = vec![0u8; 400 - PacketHeader::SIZE - FrameHeader::SIZE];

    conn.write_packet(&env, false, &header, &body);
    conn.write_packet(&env, false, &header, &body);
    assert_eq!(conn.data_q_size(), 800);

    // 800 + 400 over the 1000 limit: silently dropped
    conn.write_packet(&env, false, &header, &body);
    assert_eq!(conn.data_q_size(), 800);

    // The proto lane is independent: an inbound ping still gets a pong
    let ping = Frame::new(FrameHeader::with_special(FrameKind::Ping, 1), bytes::Bytes::new());
    inbox.borrow_mut().extend(ping.encode_to_bytes().unwrap().iter().copied());
    conn.try_read(&env).unwrap();
    assert!(conn.proto_q_size() > 0);
}

#[test]
fn peer_close_is_a_reset_condition() {
    struct ClosedTransport;
    impl Transport for ClosedTransport {
        fn begin_connect(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn begin_accept(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn established(&self) -> bool {
            true
        }
        fn handshake_done(&self) -> bool {
            true
        }
        fn read(&mut self, _buf: &mut [u8]) -> Result<IoOutcome, TransportError> {
            Ok(IoOutcome::Done(0))
        }
        fn write(&mut self, buf: &[u8]) -> Result<IoOutcome, TransportError> {
            Ok(IoOutcome::Done(buf.len()))
        }
        fn shutdown(&mut self) {}
    }

    let env = SystemEnv::new();
    let mut conn = Connection::outbound(0, Config::default(), "peer".into(), ClosedTransport);
    conn.start_connect(&env);
    conn.poll_progress(&env);

    assert!(conn.try_read(&env).is_err());

    conn.reset(&env);
    assert_eq!(conn.state(), ConnState::RetryTimeout);
    assert_eq!(conn.ping(), Config::default().unknown_ping());
}
