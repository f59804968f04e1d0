//! In-memory duplex pipe implementing the core's `Transport` seam.
//!
//! A pipe pair models one encrypted link between two nodes: bytes
//! written on one side become readable on the other, the "handshake"
//! completes once both sides have begun, and severing the link surfaces
//! as an orderly peer close (after buffered bytes drain) exactly like a
//! real socket.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use nimbus_core::{
    transport::{IoOutcome, Transport},
    TransportError,
};

#[derive(Default)]
struct PipeShared {
    to_b: VecDeque<u8>,
    to_a: VecDeque<u8>,
    a_started: bool,
    b_started: bool,
    a_closed: bool,
    b_closed: bool,
}

/// One side of an in-memory transport pair.
pub struct PipeTransport {
    shared: Rc<RefCell<PipeShared>>,
    is_a: bool,
}

/// Create a connected transport pair; hand one side to each node.
#[must_use]
pub fn pipe() -> (PipeTransport, PipeTransport) {
    let shared = Rc::new(RefCell::new(PipeShared::default()));
    (
        PipeTransport { shared: Rc::clone(&shared), is_a: true },
        PipeTransport { shared, is_a: false },
    )
}

impl PipeTransport {
    /// Tear the link down from outside, as a network fault would.
    pub fn sever(&self) {
        let mut shared = self.shared.borrow_mut();
        shared.a_closed = true;
        shared.b_closed = true;
    }

    fn start(&mut self) {
        let mut shared = self.shared.borrow_mut();
        if self.is_a {
            shared.a_started = true;
        } else {
            shared.b_started = true;
        }
    }
}

impl Transport for PipeTransport {
    fn begin_connect(&mut self) -> Result<(), TransportError> {
        self.start();
        Ok(())
    }

    fn begin_accept(&mut self) -> Result<(), TransportError> {
        self.start();
        Ok(())
    }

    fn established(&self) -> bool {
        let shared = self.shared.borrow();
        if self.is_a {
            shared.a_started
        } else {
            shared.b_started
        }
    }

    fn handshake_done(&self) -> bool {
        let shared = self.shared.borrow();
        shared.a_started && shared.b_started && !shared.a_closed && !shared.b_closed
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<IoOutcome, TransportError> {
        let mut shared = self.shared.borrow_mut();
        let (inbox, peer_closed) = if self.is_a {
            let closed = shared.b_closed;
            (&mut shared.to_a, closed)
        } else {
            let closed = shared.a_closed;
            (&mut shared.to_b, closed)
        };

        if inbox.is_empty() {
            // Buffered bytes drain before the close is visible
            return if peer_closed { Ok(IoOutcome::Done(0)) } else { Ok(IoOutcome::WantMore) };
        }

        let n = buf.len().min(inbox.len());
        for slot in buf.iter_mut().take(n) {
            *slot = inbox.pop_front().expect("length checked");
        }
        Ok(IoOutcome::Done(n))
    }

    fn write(&mut self, buf: &[u8]) -> Result<IoOutcome, TransportError> {
        let mut shared = self.shared.borrow_mut();

        let self_closed = if self.is_a { shared.a_closed } else { shared.b_closed };
        let peer_closed = if self.is_a { shared.b_closed } else { shared.a_closed };
        if self_closed || peer_closed {
            return Err(TransportError::Closed);
        }

        let outbox = if self.is_a { &mut shared.to_b } else { &mut shared.to_a };
        outbox.extend(buf.iter().copied());
        Ok(IoOutcome::Done(buf.len()))
    }

    fn shutdown(&mut self) {
        let mut shared = self.shared.borrow_mut();
        if self.is_a {
            shared.a_closed = true;
        } else {
            shared.b_closed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_cross_the_pipe() {
        let (mut a, mut b) = pipe();
        a.begin_connect().unwrap();
        b.begin_accept().unwrap();
        assert!(a.handshake_done() && b.handshake_done());

        a.write(b"hello").unwrap();

        let mut buf = [0u8; 16];
        let outcome = b.read(&mut buf).unwrap();
        assert_eq!(outcome, IoOutcome::Done(5));
        assert_eq!(&buf[..5], b"hello");

        assert_eq!(b.read(&mut buf).unwrap(), IoOutcome::WantMore);
    }

    #[test]
    fn handshake_needs_both_sides() {
        let (mut a, b) = pipe();
        a.begin_connect().unwrap();

        assert!(a.established());
        assert!(!a.handshake_done());
        assert!(!b.handshake_done());
    }

    #[test]
    fn close_drains_then_eofs() {
        let (mut a, mut b) = pipe();
        a.begin_connect().unwrap();
        b.begin_accept().unwrap();

        a.write(b"bye").unwrap();
        a.shutdown();

        let mut buf = [0u8; 16];
        assert_eq!(b.read(&mut buf).unwrap(), IoOutcome::Done(3));
        assert_eq!(b.read(&mut buf).unwrap(), IoOutcome::Done(0));
        assert!(b.write(b"x").is_err());
    }
}
