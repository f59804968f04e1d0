//! Connection state machine for one mesh peer.
//!
//! A `Connection` owns the framed protocol over one encrypted transport:
//! inbound byte accumulation and frame parsing, the two outbound lanes
//! with their flow control, the keepalive/latency probe, and the
//! lifecycle from connect through handshake to active and back down.
//!
//! # Architecture
//!
//! The state machine performs no routing of its own. Frames whose
//! handling needs node-wide state (packets to forward, route requests)
//! come back to the caller as [`ConnEvent`] values; the driver — the
//! [`Node`](crate::node::Node) — executes them. Everything that touches
//! only this connection (queueing, ping bookkeeping, remote route
//! ingestion) happens in place.
//!
//! # State machine
//!
//! ```text
//! Inactive ──connect──> Connecting ──established──> HandshakeConnecting
//!     │                                                      │
//!     └──accept──> HandshakeAccepting ──done──> Active <─────┘
//!                                                  │
//!            RetryTimeout <──(outbound reset)── Closing/reset
//! ```
//!
//! Reset is immediate: queues dropped, transport torn down, outbound
//! connections re-arm the retry timer. Disconnect is graceful: the
//! connection drains its lanes in `Closing` before the transport is shut
//! down.

use std::collections::BTreeMap;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace};

use nimbus_proto::{Frame, FrameHeader, FrameKind, PacketHeader, RouteRecord};

use crate::{
    config::Config,
    env::Environment,
    error::{ConnectionError, TransportError},
    queue::SendQueue,
    route::RemoteRoute,
    transport::{IoOutcome, Transport},
};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// No socket; freshly created or finished
    Inactive,
    /// Outbound, waiting for the retry timer
    RetryTimeout,
    /// Outbound stream being established
    Connecting,
    /// Stream up, outbound handshake running
    HandshakeConnecting,
    /// Inbound handshake running
    HandshakeAccepting,
    /// Graceful drain before teardown
    Closing,
    /// Handshake complete, frames flow
    Active,
}

/// Work the connection hands back to its driver.
///
/// The state machine cannot reach node-wide state (route tables, other
/// connections, gates), so anything crossing that boundary becomes an
/// event the [`Node`](crate::node::Node) executes after the poll call
/// returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnEvent {
    /// Remote routes changed; rebuild the table lazily
    RouteDirty,
    /// The peer asked for our full route table
    RouteRequest,
    /// Handshake completed; run activation side effects
    Activated,
    /// A data packet to forward
    Packet {
        /// True when this arrived as a broadcast frame
        broadcast: bool,
        /// Parsed packet header prefix
        header: PacketHeader,
        /// Opaque packet body (after the prefix)
        body: Bytes,
    },
}

/// Traffic counters for one connection: totals since creation, the
/// running interval, and the rates derived from the last full interval.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConnStats {
    /// Packets received, total
    pub in_p_total: u64,
    /// Bytes received, total
    pub in_s_total: u64,
    /// Packets sent, total
    pub out_p_total: u64,
    /// Bytes sent, total
    pub out_s_total: u64,

    in_p_now: u64,
    in_s_now: u64,
    out_p_now: u64,
    out_s_now: u64,

    /// Packets per second over the last interval
    pub in_p_speed: u64,
    /// Bytes per second over the last interval
    pub in_s_speed: u64,
    /// Packets per second over the last interval
    pub out_p_speed: u64,
    /// Bytes per second over the last interval
    pub out_s_speed: u64,

    stat_update: u64,
}

impl ConnStats {
    fn packet(&mut self, inbound: bool, size: usize) {
        let size = size as u64;
        if inbound {
            self.in_p_total += 1;
            self.in_s_total += size;
            self.in_p_now += 1;
            self.in_s_now += size;
        } else {
            self.out_p_total += 1;
            self.out_s_total += size;
            self.out_p_now += 1;
            self.out_s_now += size;
        }
    }

    fn maybe_roll(&mut self, now: u64, interval: u64) {
        if self.stat_update == 0 {
            self.stat_update = now;
            return;
        }
        let elapsed = now - self.stat_update;
        if elapsed < interval {
            return;
        }

        self.in_p_speed = self.in_p_now * 1_000_000 / elapsed;
        self.in_s_speed = self.in_s_now * 1_000_000 / elapsed;
        self.out_p_speed = self.out_p_now * 1_000_000 / elapsed;
        self.out_s_speed = self.out_s_now * 1_000_000 / elapsed;

        self.in_p_now = 0;
        self.in_s_now = 0;
        self.out_p_now = 0;
        self.out_s_now = 0;
        self.stat_update = now;
    }
}

/// One peer connection: transport, framing, lanes, probe state.
pub struct Connection<T> {
    id: i32,
    fd: i32,
    state: ConnState,
    transport: Option<T>,
    /// Reconnect address; `Some` marks an outbound connection
    peer: Option<String>,
    config: Config,

    last_retry: u64,
    last_ping: u64,
    sent_ping_id: u8,
    sent_ping_time: u64,
    ping: u32,

    remote_routes: BTreeMap<nimbus_proto::Address, RemoteRoute>,
    route_overflow: bool,

    recv_q: BytesMut,
    cached_header: Option<FrameHeader>,

    proto_q: SendQueue,
    data_q: SendQueue,
    sending_from_data_q: bool,

    ubl_available: u32,
    dbl_left: u32,
    dbl_over: u32,

    stats: ConnStats,
    peer_connected_since: u64,
}

impl<T: Transport> Connection<T> {
    /// Create an outbound connection toward `peer`. Call
    /// [`Connection::start_connect`] to begin dialing.
    #[must_use]
    pub fn outbound(id: i32, config: Config, peer: String, transport: T) -> Self {
        Self::new(id, config, Some(peer), transport)
    }

    /// Adopt an accepted inbound stream. Call
    /// [`Connection::start_accept`] to run its handshake.
    #[must_use]
    pub fn inbound(id: i32, config: Config, transport: T) -> Self {
        Self::new(id, config, None, transport)
    }

    fn new(id: i32, config: Config, peer: Option<String>, transport: T) -> Self {
        let ping = config.unknown_ping();
        Self {
            id,
            fd: -1,
            state: ConnState::Inactive,
            transport: Some(transport),
            peer,
            config,

            last_retry: 0,
            last_ping: 0,
            sent_ping_id: 0,
            sent_ping_time: 0,
            ping,

            remote_routes: BTreeMap::new(),
            route_overflow: false,

            recv_q: BytesMut::new(),
            cached_header: None,

            proto_q: SendQueue::new(),
            data_q: SendQueue::new(),
            sending_from_data_q: false,

            ubl_available: 0,
            dbl_left: 0,
            dbl_over: 0,

            stats: ConnStats::default(),
            peer_connected_since: 0,
        }
    }

    /// Connection id (immutable for the connection's lifetime).
    #[must_use]
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Poller token, or -1 when unset. The node keeps the reverse
    /// `fd -> id` index consistent around changes.
    #[must_use]
    pub fn fd(&self) -> i32 {
        self.fd
    }

    /// Set the poller token. Negative values are ignored; use
    /// [`Connection::unset_fd`] to detach.
    pub fn set_fd(&mut self, fd: i32) {
        if fd >= 0 {
            self.fd = fd;
        }
    }

    /// Detach from the poller.
    pub fn unset_fd(&mut self) {
        self.fd = -1;
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnState {
        self.state
    }

    /// True once the handshake finished and frames flow.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == ConnState::Active
    }

    /// True for connections this node dialed (they reconnect on
    /// failure; inbound connections are freed instead).
    #[must_use]
    pub fn is_outbound(&self) -> bool {
        self.peer.is_some()
    }

    /// Smoothed round-trip latency in microseconds;
    /// [`Config::unknown_ping`] until the first pong.
    #[must_use]
    pub fn ping(&self) -> u32 {
        self.ping
    }

    /// Routes last advertised by this peer.
    #[must_use]
    pub fn remote_routes(&self) -> &BTreeMap<nimbus_proto::Address, RemoteRoute> {
        &self.remote_routes
    }

    /// Traffic counters.
    #[must_use]
    pub fn stats(&self) -> &ConnStats {
        &self.stats
    }

    /// Monotonic timestamp of the last activation, 0 before the first.
    #[must_use]
    pub fn peer_connected_since(&self) -> u64 {
        self.peer_connected_since
    }

    /// True while either lane holds bytes to flush.
    #[must_use]
    pub fn needs_write(&self) -> bool {
        !self.proto_q.is_empty() || !self.data_q.is_empty()
    }

    /// Bytes queued on the data lane.
    #[must_use]
    pub fn data_q_size(&self) -> usize {
        self.data_q.size()
    }

    /// Bytes queued on the proto lane.
    #[must_use]
    pub fn proto_q_size(&self) -> usize {
        self.proto_q.size()
    }

    // ---- lifecycle ----

    /// Begin dialing (outbound connections only).
    pub fn start_connect<E: Environment>(&mut self, env: &E) {
        self.last_retry = env.now_us();
        self.state = ConnState::Connecting;

        let failed = match self.transport.as_mut() {
            Some(t) => t.begin_connect().is_err(),
            None => true,
        };
        if failed {
            self.reset(env);
        }
    }

    /// Begin the inbound handshake.
    pub fn start_accept<E: Environment>(&mut self, env: &E) {
        self.state = ConnState::HandshakeAccepting;

        let failed = match self.transport.as_mut() {
            Some(t) => t.begin_accept().is_err(),
            None => true,
        };
        if failed {
            self.reset(env);
        }
    }

    /// Advance the pre-active and closing stages; returns events for
    /// the driver (activation side effects).
    pub fn poll_progress<E: Environment>(&mut self, env: &E) -> Vec<ConnEvent> {
        let mut events = Vec::new();

        if self.state == ConnState::Connecting {
            if let Some(t) = self.transport.as_ref() {
                if t.established() {
                    self.state = ConnState::HandshakeConnecting;
                }
            }
        }

        if matches!(self.state, ConnState::HandshakeConnecting | ConnState::HandshakeAccepting) {
            let done = self.transport.as_ref().is_some_and(Transport::handshake_done);
            if done {
                self.activate(env);
                events.push(ConnEvent::Activated);
            }
        }

        if self.state == ConnState::Closing && !self.needs_write() {
            self.reset(env);
        }

        events
    }

    fn activate<E: Environment>(&mut self, env: &E) {
        let now = env.now_us();
        self.state = ConnState::Active;
        self.peer_connected_since = now;
        self.last_ping = now;
        self.sent_ping_time = 0;
        self.ping = self.config.unknown_ping();
        self.route_overflow = false;
        debug!(id = self.id, "connection active");
    }

    /// Graceful teardown: drain the lanes, then shut the transport down.
    pub fn disconnect<E: Environment>(&mut self, env: &E) {
        if self.needs_write() {
            self.state = ConnState::Closing;
        } else {
            self.reset(env);
        }
    }

    /// Hard teardown. Queues are dropped (the one legal mid-frame cut),
    /// the transport is shut down, and an outbound connection re-arms
    /// its retry timer. The caller marks the route table dirty.
    pub fn reset<E: Environment>(&mut self, env: &E) {
        debug!(id = self.id, state = ?self.state, "connection reset");

        if let Some(t) = self.transport.as_mut() {
            t.shutdown();
        }

        self.proto_q.clear();
        self.data_q.clear();
        self.sending_from_data_q = false;
        self.recv_q.clear();
        self.cached_header = None;
        self.remote_routes.clear();
        self.route_overflow = false;

        self.ping = self.config.unknown_ping();
        self.sent_ping_time = 0;
        self.last_ping = 0;
        self.ubl_available = 0;
        self.dbl_left = 0;
        self.dbl_over = 0;
        self.unset_fd();

        if self.peer.is_some() {
            self.last_retry = env.now_us();
            self.state = ConnState::RetryTimeout;
        } else {
            self.state = ConnState::Inactive;
        }
    }

    /// Per-tick maintenance: probe liveness, keepalive, retry timer,
    /// stats rolling.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::PingTimeout`] when an outstanding probe aged
    /// past the liveness timeout; the caller resets the connection.
    pub fn periodic<E: Environment>(&mut self, env: &E) -> Result<(), ConnectionError> {
        let now = env.now_us();

        match self.state {
            ConnState::Active => {
                let outstanding = self.sent_ping_time != 0 && self.sent_ping_time == self.last_ping;

                if outstanding && now - self.sent_ping_time > self.config.timeout {
                    return Err(ConnectionError::PingTimeout {
                        elapsed_us: now - self.sent_ping_time,
                    });
                }
                if !outstanding && now - self.last_ping > self.config.keepalive {
                    self.send_ping(env);
                }
            }
            ConnState::RetryTimeout => {
                if now - self.last_retry > self.config.retry {
                    self.start_connect(env);
                }
            }
            _ => {}
        }

        self.stats.maybe_roll(now, self.config.stats_interval);
        Ok(())
    }

    /// Grant this tick's bandwidth tokens (driven by the node's
    /// recompute pass). `up` accumulates toward `up_burst`; `down`
    /// refreshes the read allowance and pays down read debt.
    pub fn grant_bandwidth(&mut self, up: u32, up_burst: u32, down: u32) {
        if self.config.ubl_enabled {
            self.ubl_available = self.ubl_available.saturating_add(up).min(up_burst.max(up));
        }
        if self.config.dbl_enabled {
            self.dbl_left = down;
            self.dbl_over = self.dbl_over.saturating_sub(down);
        }
    }

    // ---- probes ----

    fn send_ping<E: Environment>(&mut self, env: &E) {
        let now = env.now_us();
        self.sent_ping_id = self.sent_ping_id.wrapping_add(1);
        self.sent_ping_time = now;
        self.last_ping = now;

        let frame = Frame::new(
            FrameHeader::with_special(FrameKind::Ping, self.sent_ping_id),
            Bytes::new(),
        );
        self.write_proto_frame(&frame);
    }

    fn write_pong(&mut self, probe_id: u8) {
        let frame = Frame::new(
            FrameHeader::with_special(FrameKind::Pong, probe_id),
            Bytes::new(),
        );
        self.write_proto_frame(&frame);
    }

    /// Returns true when the measured latency moved enough to warrant a
    /// route report.
    fn handle_pong<E: Environment>(&mut self, env: &E, probe_id: u8) -> bool {
        // A pong only counts against the probe currently in flight.
        if probe_id != self.sent_ping_id
            || self.sent_ping_time == 0
            || self.sent_ping_time != self.last_ping
        {
            return false;
        }

        let now = env.now_us();
        let rtt = u32::try_from(now - self.sent_ping_time).unwrap_or(u32::MAX).max(1);
        let moved = rtt.abs_diff(self.ping) > self.config.report_ping_changes_above;

        self.ping = rtt;
        self.last_ping = now;
        moved
    }

    // ---- outbound ----

    fn write_proto_frame(&mut self, frame: &Frame) {
        let Ok(encoded) = frame.encode_to_bytes() else {
            return;
        };
        if !self.proto_q.can_accept(encoded.len(), self.config.max_waiting_proto_size) {
            trace!(id = self.id, "proto lane full, frame dropped");
            return;
        }
        self.stats.packet(false, encoded.len());
        self.proto_q.push(encoded);
    }

    /// Queue a full route table for the peer.
    pub fn write_route_set(&mut self, records: &[RouteRecord]) {
        let frame = Frame::new(FrameHeader::new(FrameKind::RouteSet), RouteRecord::encode_list(records));
        self.write_proto_frame(&frame);
    }

    /// Queue an incremental route update.
    pub fn write_route_diff(&mut self, records: &[RouteRecord]) {
        let frame = Frame::new(FrameHeader::new(FrameKind::RouteDiff), RouteRecord::encode_list(records));
        self.write_proto_frame(&frame);
    }

    /// Ask the peer for its full route table.
    pub fn write_route_request(&mut self) {
        self.write_proto_frame(&Frame::empty(FrameKind::RouteRequest));
    }

    /// Queue a data packet for this peer. Admission may silently drop
    /// it: hard lane limit first, then Random Early Drop once the lane
    /// crowds past the threshold. The proto lane is never RED-dropped.
    pub fn write_packet<E: Environment>(
        &mut self,
        env: &E,
        broadcast: bool,
        header: &PacketHeader,
        body: &[u8],
    ) {
        let kind = if broadcast { FrameKind::BroadcastPacket } else { FrameKind::Packet };

        let mut payload = BytesMut::with_capacity(PacketHeader::SIZE + body.len());
        payload.extend_from_slice(&header.to_bytes());
        payload.extend_from_slice(body);

        let frame = Frame::new(FrameHeader::new(kind), payload.freeze());
        let Ok(encoded) = frame.encode_to_bytes() else {
            return;
        };

        if !self.data_q.can_accept(encoded.len(), self.config.max_waiting_data_size) {
            trace!(id = self.id, "data lane full, packet dropped");
            return;
        }
        if self.red_drop(env) {
            trace!(id = self.id, "RED drop");
            return;
        }

        self.stats.packet(false, encoded.len());
        self.data_q.push(encoded);
    }

    fn red_drop<E: Environment>(&self, env: &E) -> bool {
        if !self.config.red_enabled {
            return false;
        }
        let queued = self.data_q.size();
        if queued <= self.config.red_threshold {
            return false;
        }

        let over = (queued - self.config.red_threshold) as u64;
        let span = (self.config.max_waiting_data_size - self.config.red_threshold) as u64;
        u64::from(env.random_u32()) * span < over * u64::from(u32::MAX)
    }

    /// Flush queued frames to the transport: proto lane first, except
    /// that a partially written data frame is always finished before the
    /// lanes switch, so frame bytes never interleave on the wire.
    ///
    /// # Errors
    ///
    /// Transport write failures; the caller resets the connection.
    pub fn try_write<E: Environment>(&mut self, _env: &E) -> Result<(), ConnectionError> {
        if !matches!(self.state, ConnState::Active | ConnState::Closing) {
            return Ok(());
        }

        loop {
            let from_data = if self.sending_from_data_q && self.data_q.mid_frame() {
                true
            } else if !self.proto_q.is_empty() {
                false
            } else if !self.data_q.is_empty() {
                true
            } else {
                break;
            };

            let allowance =
                if self.config.ubl_enabled { self.ubl_available as usize } else { usize::MAX };
            if allowance == 0 {
                break;
            }

            let queue = if from_data { &mut self.data_q } else { &mut self.proto_q };
            let Some(chunk) = queue.front_remaining() else { break };
            let want = chunk.len().min(allowance);

            let Some(transport) = self.transport.as_mut() else { break };
            match transport.write(&chunk[..want]) {
                Ok(IoOutcome::Done(n)) => {
                    queue.advance(n);
                    self.sending_from_data_q = from_data && queue.mid_frame();
                    if self.config.ubl_enabled {
                        #[allow(clippy::cast_possible_truncation)] // n <= allowance <= u32
                        {
                            self.ubl_available -= n as u32;
                        }
                    }
                }
                Ok(IoOutcome::WantMore) => break,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    // ---- inbound ----

    /// Pull bytes from the transport and parse complete frames.
    ///
    /// Reading honors the downstream bandwidth debt: while `dbl_over`
    /// is positive the transport is left alone until the next tick pays
    /// the debt down.
    ///
    /// # Errors
    ///
    /// Transport failures, peer close, or a malformed/oversized frame;
    /// the caller resets the connection.
    pub fn try_read<E: Environment>(&mut self, env: &E) -> Result<Vec<ConnEvent>, ConnectionError> {
        let mut events = Vec::new();
        if self.state != ConnState::Active {
            return Ok(events);
        }

        let mut chunk = [0u8; 4096];
        loop {
            if self.config.dbl_enabled && self.dbl_over > 0 {
                break;
            }

            let Some(transport) = self.transport.as_mut() else { break };
            match transport.read(&mut chunk) {
                Ok(IoOutcome::Done(0)) => return Err(TransportError::Closed.into()),
                Ok(IoOutcome::Done(n)) => {
                    self.recv_q.extend_from_slice(&chunk[..n]);
                    self.account_read(n);
                }
                Ok(IoOutcome::WantMore) => break,
                Err(e) => return Err(e.into()),
            }
        }

        self.try_parse_input(env, &mut events)?;
        Ok(events)
    }

    fn account_read(&mut self, n: usize) {
        if !self.config.dbl_enabled {
            return;
        }
        let n = u32::try_from(n).unwrap_or(u32::MAX);
        if n <= self.dbl_left {
            self.dbl_left -= n;
        } else {
            self.dbl_over += n - self.dbl_left;
            self.dbl_left = 0;
        }
    }

    /// Extract zero or more complete frames from the receive ring.
    ///
    /// # Errors
    ///
    /// A header announcing a payload beyond the MTU, or a malformed
    /// routing payload. Both reset the connection.
    pub fn try_parse_input<E: Environment>(
        &mut self,
        env: &E,
        events: &mut Vec<ConnEvent>,
    ) -> Result<(), ConnectionError> {
        loop {
            if self.cached_header.is_none() {
                if self.recv_q.len() < FrameHeader::SIZE {
                    break;
                }
                let header = *FrameHeader::from_bytes(&self.recv_q)?;
                self.recv_q.advance(FrameHeader::SIZE);

                if header.size() > self.config.mtu {
                    return Err(ConnectionError::OversizedFrame {
                        size: header.size(),
                        mtu: self.config.mtu,
                    });
                }
                self.cached_header = Some(header);
            }

            let Some(header) = self.cached_header else { break };
            let size = header.size() as usize;
            if self.recv_q.len() < size {
                break; // wait for the rest of the payload
            }

            let payload = self.recv_q.split_to(size).freeze();
            self.cached_header = None;
            self.dispatch(env, header, payload, events)?;
        }

        Ok(())
    }

    fn dispatch<E: Environment>(
        &mut self,
        env: &E,
        header: FrameHeader,
        payload: Bytes,
        events: &mut Vec<ConnEvent>,
    ) -> Result<(), ConnectionError> {
        match header.kind() {
            Some(FrameKind::Packet) => self.handle_packet(false, payload, events),
            Some(FrameKind::BroadcastPacket) => self.handle_packet(true, payload, events),
            Some(FrameKind::RouteSet) => self.handle_route_set(&payload, events)?,
            Some(FrameKind::RouteDiff) => self.handle_route_diff(&payload, events)?,
            Some(FrameKind::RouteRequest) => events.push(ConnEvent::RouteRequest),
            Some(FrameKind::Ping) => self.write_pong(header.special()),
            Some(FrameKind::Pong) => {
                if self.handle_pong(env, header.special()) {
                    events.push(ConnEvent::RouteDirty);
                }
            }
            None => {
                // Unknown kinds are skipped, not fatal
                trace!(id = self.id, kind = header.kind_raw(), "ignoring unknown frame kind");
            }
        }
        Ok(())
    }

    fn handle_packet(&mut self, broadcast: bool, payload: Bytes, events: &mut Vec<ConnEvent>) {
        self.stats.packet(true, FrameHeader::SIZE + payload.len());

        let Ok(header) = PacketHeader::from_bytes(&payload).map(|h| *h) else {
            trace!(id = self.id, "runt packet dropped");
            return;
        };
        let body = payload.slice(PacketHeader::SIZE..);
        if !header.dest_in_bounds(body.len()) {
            trace!(id = self.id, "packet with bad destination bounds dropped");
            return;
        }

        events.push(ConnEvent::Packet { broadcast, header, body });
    }

    fn handle_route_set(
        &mut self,
        payload: &[u8],
        events: &mut Vec<ConnEvent>,
    ) -> Result<(), ConnectionError> {
        let records = RouteRecord::decode_list(payload)?;

        self.remote_routes.clear();
        self.route_overflow = false;

        for record in records {
            if record.is_withdrawal() {
                continue; // a set carries no withdrawals; skip defensively
            }
            self.remote_routes
                .insert(record.addr, RemoteRoute { ping: record.ping, dist: record.dist });

            if self.remote_routes.len() > self.config.max_remote_routes {
                self.handle_route_overflow();
                break;
            }
        }

        events.push(ConnEvent::RouteDirty);
        Ok(())
    }

    fn handle_route_diff(
        &mut self,
        payload: &[u8],
        events: &mut Vec<ConnEvent>,
    ) -> Result<(), ConnectionError> {
        let records = RouteRecord::decode_list(payload)?;

        // After an overflow we dropped the table and asked for a full
        // set; diffs against state we no longer hold are meaningless.
        if self.route_overflow {
            return Ok(());
        }

        for record in records {
            if record.is_withdrawal() {
                self.remote_routes.remove(&record.addr);
                continue;
            }
            self.remote_routes
                .insert(record.addr, RemoteRoute { ping: record.ping, dist: record.dist });

            if self.remote_routes.len() > self.config.max_remote_routes {
                self.handle_route_overflow();
                break;
            }
        }

        events.push(ConnEvent::RouteDirty);
        Ok(())
    }

    fn handle_route_overflow(&mut self) {
        debug!(id = self.id, max = self.config.max_remote_routes, "remote route overflow");
        self.remote_routes.clear();
        self.route_overflow = true;
        self.write_route_request();
    }
}
