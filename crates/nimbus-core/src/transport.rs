//! Transport abstraction for the encrypted byte pipe.
//!
//! The core treats its link to a peer as an opaque, already-encrypted
//! byte stream with a handshake. Which cipher suite, which library, even
//! which kind of socket sits underneath is invisible here; the trait is
//! a capability set — connect, accept, read, write, shutdown, plus two
//! progress bits — and nothing more.
//!
//! # Implementations
//!
//! - Production embedders wrap their TLS/Noise/... session here.
//! - The harness provides an in-memory pipe with scriptable handshake
//!   progress for deterministic tests.
//!
//! All operations are non-blocking: a call either completes immediately
//! or reports [`IoOutcome::WantMore`], and the embedder's poller decides
//! when to try again. The core never spins.

use crate::error::TransportError;

/// Result of a non-blocking read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOutcome {
    /// `n` bytes were transferred. `Done(0)` from a read means the peer
    /// closed the stream in an orderly way.
    Done(usize),
    /// Nothing could be transferred right now; wait for readiness.
    WantMore,
}

/// An encrypted byte-stream to one peer.
pub trait Transport {
    /// Start an outbound connection attempt. Non-blocking; progress is
    /// observed through [`Transport::established`] and
    /// [`Transport::handshake_done`].
    ///
    /// # Errors
    ///
    /// Immediate, unrecoverable setup failures.
    fn begin_connect(&mut self) -> Result<(), TransportError>;

    /// Adopt an inbound connection and start its handshake.
    ///
    /// # Errors
    ///
    /// Immediate, unrecoverable setup failures.
    fn begin_accept(&mut self) -> Result<(), TransportError>;

    /// True once the underlying byte stream exists (e.g. TCP connect
    /// finished). The cryptographic handshake may still be running.
    fn established(&self) -> bool;

    /// True once the handshake completed and data frames may flow.
    fn handshake_done(&self) -> bool;

    /// Non-blocking read into `buf`.
    ///
    /// # Errors
    ///
    /// Transport failures; the connection resets in response.
    fn read(&mut self, buf: &mut [u8]) -> Result<IoOutcome, TransportError>;

    /// Non-blocking write of a prefix of `buf`.
    ///
    /// # Errors
    ///
    /// Transport failures; the connection resets in response.
    fn write(&mut self, buf: &[u8]) -> Result<IoOutcome, TransportError>;

    /// Tear the stream down. Idempotent; used both by graceful close
    /// (after the queues drain) and by reset.
    fn shutdown(&mut self);
}
