//! The node context handle: connection table, gates, routing, forwarding.
//!
//! A `Node` owns everything one mesh participant needs — the connection
//! table with its `fd -> id` reverse index, the local gates, the
//! [`Router`], and the broadcast-ID cache — and wires them together.
//! There are deliberately no globals: several independent nodes can live
//! in one process, which is exactly how the simulation harness builds
//! whole meshes inside a single test.
//!
//! The embedder's poller drives a node through three entry points
//! ([`Node::poll_read`], [`Node::poll_write`], [`Node::poll_simple`])
//! plus the ~100 ms [`Node::periodic_update`] tick. All of them run on
//! one thread; no connection is ever touched from anywhere else, which
//! is what lets the whole core go lock-free.
//!
//! # Packet forwarding
//!
//! `route_packet` is the heart of the data plane. Unicast packets go to
//! the best (or scattered) next hop plus every promiscuous listener of
//! the destination instance; a destination nobody claims degrades to a
//! broadcast. Broadcasts go to every subscribed local gate and fan out
//! to peers TTL-permitting, deduplicated by packet uid, optionally
//! collapsed to a single random peer in shared-uplink mode.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info, warn};

use nimbus_proto::{Address, PacketHeader};

use crate::{
    config::Config,
    connection::{ConnEvent, ConnState, Connection},
    env::Environment,
    error::ConnectionError,
    gate::{gate_route_id, route_id_gate, Gate},
    idcache::BroadcastSeen,
    route::Router,
    transport::Transport,
};

/// Aggregate traffic totals across all connections of a node.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NodeTotals {
    /// Packets received
    pub in_p: u64,
    /// Bytes received
    pub in_s: u64,
    /// Packets sent
    pub out_p: u64,
    /// Bytes sent
    pub out_s: u64,
}

/// One mesh participant: connections, gates, routing, forwarding.
pub struct Node<E, T> {
    env: E,
    config: Config,

    connections: BTreeMap<i32, Connection<T>>,
    fd_index: HashMap<i32, i32>,
    next_conn_id: i32,

    gates: BTreeMap<i32, Box<dyn Gate>>,

    router: Router,
    seen: BroadcastSeen,
}

impl<E: Environment, T: Transport> Node<E, T> {
    /// Build a node. The configuration is validated (clamped) here.
    #[must_use]
    pub fn new(env: E, mut config: Config) -> Self {
        config.validate();
        info!(size = config.packet_id_cache_size, "broadcast id cache size");

        let router = Router::new(&config);
        let seen = BroadcastSeen::new(config.packet_id_cache_size);

        Self {
            env,
            config,
            connections: BTreeMap::new(),
            fd_index: HashMap::new(),
            next_conn_id: 0,
            gates: BTreeMap::new(),
            router,
            seen,
        }
    }

    /// The node's configuration after validation.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The routing state (read access, mostly for tests and status
    /// export).
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// A connection by id.
    #[must_use]
    pub fn connection(&self, id: i32) -> Option<&Connection<T>> {
        self.connections.get(&id)
    }

    /// Ids of all current connections.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<i32> {
        self.connections.keys().copied().collect()
    }

    /// Resolve a poller token to a connection id, dropping stale index
    /// entries on the way.
    #[must_use]
    pub fn conn_by_fd(&mut self, fd: i32) -> Option<i32> {
        let id = *self.fd_index.get(&fd)?;
        match self.connections.get(&id) {
            Some(conn) if conn.fd() == fd => Some(id),
            _ => {
                self.fd_index.remove(&fd);
                None
            }
        }
    }

    /// Register a local gate. The route table rebuilds lazily.
    pub fn add_gate(&mut self, gate: Box<dyn Gate>) {
        debug!(gate = gate.id(), "gate attached");
        self.gates.insert(gate.id(), gate);
        self.router.set_dirty();
    }

    /// Create an outbound connection and start dialing. `fd` is the
    /// poller token for the transport.
    pub fn connect(&mut self, peer: impl Into<String>, transport: T, fd: i32) -> i32 {
        let env = self.env.clone();
        let id = self.alloc_conn_id();

        let mut conn = Connection::outbound(id, self.config.clone(), peer.into(), transport);
        conn.set_fd(fd);
        conn.start_connect(&env);

        self.index_fd(id, fd);
        self.connections.insert(id, conn);
        id
    }

    /// Adopt an accepted inbound transport.
    pub fn accept(&mut self, transport: T, fd: i32) -> i32 {
        let env = self.env.clone();
        let id = self.alloc_conn_id();

        let mut conn = Connection::inbound(id, self.config.clone(), transport);
        conn.set_fd(fd);
        conn.start_accept(&env);

        self.index_fd(id, fd);
        self.connections.insert(id, conn);
        id
    }

    /// Gracefully close a connection (drain, then tear down).
    pub fn disconnect(&mut self, id: i32) {
        let env = self.env.clone();
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.disconnect(&env);
            self.router.set_dirty();
        }
        self.reconcile_fd(id);
    }

    fn alloc_conn_id(&mut self) -> i32 {
        let id = self.next_conn_id;
        self.next_conn_id += 1;
        id
    }

    fn index_fd(&mut self, id: i32, fd: i32) {
        if fd >= 0 {
            self.fd_index.insert(fd, id);
        }
    }

    /// Drop index entries no longer backed by the connection.
    fn reconcile_fd(&mut self, id: i32) {
        let live_fd = self.connections.get(&id).map_or(-1, Connection::fd);
        self.fd_index.retain(|fd, owner| *owner != id || *fd == live_fd);
    }

    // ---- poller surface ----

    /// Readiness callback: the transport behind `fd` has bytes to read.
    pub fn poll_read(&mut self, fd: i32) {
        if let Some(id) = self.conn_by_fd(fd) {
            self.drive(id, true, false);
        }
    }

    /// Readiness callback: the transport behind `fd` accepts writes.
    pub fn poll_write(&mut self, fd: i32) {
        if let Some(id) = self.conn_by_fd(fd) {
            self.drive(id, false, true);
        }
    }

    /// Combined readiness callback.
    pub fn poll_simple(&mut self, fd: i32) {
        if let Some(id) = self.conn_by_fd(fd) {
            self.drive(id, true, true);
        }
    }

    /// Drive every connection once (handshake progress, reads, writes).
    /// Embedders with a real poller use the per-fd entry points instead.
    pub fn poll_all(&mut self) {
        for id in self.connection_ids() {
            self.drive(id, true, true);
        }
    }

    fn drive(&mut self, id: i32, read: bool, write: bool) {
        let env = self.env.clone();
        let mut events = Vec::new();
        let mut failure: Option<ConnectionError> = None;

        if let Some(conn) = self.connections.get_mut(&id) {
            events.extend(conn.poll_progress(&env));

            if read {
                match conn.try_read(&env) {
                    Ok(more) => events.extend(more),
                    Err(e) => failure = Some(e),
                }
            }
            if write && failure.is_none() {
                if let Err(e) = conn.try_write(&env) {
                    failure = Some(e);
                }
            }
            if failure.is_none() {
                // A drained Closing connection finishes here.
                events.extend(conn.poll_progress(&env));
            }
        }

        if let Some(err) = failure {
            warn!(id, error = %err, "connection failure");
            self.reset_connection(id);
            return;
        }

        self.dispatch(id, events);
        self.reconcile_fd(id);
    }

    fn dispatch(&mut self, id: i32, events: Vec<ConnEvent>) {
        for event in events {
            match event {
                ConnEvent::RouteDirty => self.router.set_dirty(),
                ConnEvent::RouteRequest => self.send_full_route(id),
                ConnEvent::Activated => self.on_activate(id),
                ConnEvent::Packet { broadcast, header, body } => {
                    self.route_packet(broadcast, &header, &body, id);
                }
            }
        }
    }

    /// Activation side effects: ask the new peer for its table, push
    /// ours, and schedule a rebuild.
    fn on_activate(&mut self, id: i32) {
        let records = self.router.full_report();
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.write_route_request();
            conn.write_route_set(&records);
        }
        self.router.set_dirty();
    }

    fn send_full_route(&mut self, id: i32) {
        // Deliberately no rebuild here: the peer gets what everyone else
        // has been told so far.
        let records = self.router.full_report();
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.write_route_set(&records);
        }
    }

    /// Hard-reset a connection: teardown, queue drop, dirty routes.
    /// Inbound connections are freed; outbound ones re-arm their retry
    /// timer.
    pub fn reset_connection(&mut self, id: i32) {
        let env = self.env.clone();

        let freed = match self.connections.get_mut(&id) {
            Some(conn) => {
                conn.reset(&env);
                !conn.is_outbound()
            }
            None => return,
        };

        if freed {
            self.connections.remove(&id);
        }
        self.fd_index.retain(|_, owner| *owner != id);
        self.router.set_dirty();
    }

    // ---- routing ----

    /// Rebuild the route table if dirty and broadcast the resulting diff
    /// to every active peer.
    pub fn update_routes(&mut self) {
        if !self.router.is_dirty() {
            return;
        }

        let diff = self.router.update(
            self.gates
                .values()
                .filter(|g| g.ready())
                .map(|g| (g.id(), g.local())),
            self.connections
                .iter()
                .filter(|(_, c)| c.is_active())
                .map(|(id, c)| (*id, c.ping(), c.remote_routes())),
        );

        if diff.is_empty() {
            return;
        }
        for conn in self.connections.values_mut().filter(|c| c.is_active()) {
            conn.write_route_diff(&diff);
        }
    }

    /// Originate a packet from a local gate. A fresh uid is stamped; the
    /// TTL defaults to the configured broadcast TTL.
    #[allow(clippy::too_many_arguments)] // mirrors the gate send surface
    pub fn send_from_gate(
        &mut self,
        gate: i32,
        broadcast: bool,
        ttl: Option<u16>,
        inst: u32,
        dof: u16,
        ds: u16,
        sof: u16,
        ss: u16,
        body: &[u8],
    ) {
        let header = PacketHeader::new(
            self.env.random_u32(),
            ttl.unwrap_or(self.config.route_broadcast_ttl),
            inst,
            dof,
            ds,
            sof,
            ss,
        );
        self.route_packet(broadcast, &header, body, gate_route_id(gate));
    }

    /// Forward one packet. `from` is the ingress id (negative for a
    /// gate); it never receives the packet back.
    pub fn route_packet(&mut self, broadcast: bool, header: &PacketHeader, body: &[u8], from: i32) {
        if !header.dest_in_bounds(body.len()) {
            return;
        }

        if self.seen.contains(header.id()) {
            return;
        }
        self.seen.insert(header.id());

        self.update_routes();

        let dof = header.dof() as usize;
        let ds = header.ds() as usize;
        let Ok(addr) = Address::new(header.inst(), &body[dof..dof + ds]) else {
            return; // destination longer than an address can be
        };
        let addr = if broadcast { addr.into_broadcast() } else { addr };
        let promisc_key = addr.promisc_key();

        if !addr.is_broadcast() {
            let env = self.env.clone();
            let mut sendlist: BTreeSet<i32> = BTreeSet::new();

            if self.config.multipath {
                if let Some(hop) = self.router.scatter(&env, &addr, from) {
                    sendlist.insert(hop);
                }
            } else if let Some(info) = self.router.lookup(&addr) {
                sendlist.insert(info.id);
            }

            let promiscs = self.router.promisc_for(&promisc_key);

            if !promiscs.is_empty() || !sendlist.is_empty() {
                if self.config.shared_uplink {
                    // One random promisc gets it; beyond that only local
                    // gates, the mesh spreads it further.
                    if !promiscs.is_empty() {
                        #[allow(clippy::cast_possible_truncation)] // table is small
                        let pick = promiscs[env.random_below(promiscs.len() as u32) as usize].id;
                        sendlist.insert(pick);
                    }
                    sendlist.extend(promiscs.iter().map(|e| e.id).filter(|&id| id < 0));
                } else {
                    sendlist.extend(promiscs.iter().map(|e| e.id));
                }

                sendlist.remove(&from);
                for to in sendlist {
                    self.forward_to(to, false, header, body);
                }
                return;
            }
            // Unknown destination, no promiscs: degrade to broadcast.
        }

        self.broadcast_fanout(header, body, from);
    }

    fn forward_to(&mut self, to: i32, broadcast: bool, header: &PacketHeader, body: &[u8]) {
        if to < 0 {
            let gate = route_id_gate(to);
            if let Some(gate) = self.gates.get_mut(&gate) {
                if gate.ready() {
                    gate.deliver(
                        header.inst(),
                        header.dof(),
                        header.ds(),
                        header.sof(),
                        header.ss(),
                        body,
                    );
                }
            }
            return;
        }

        if header.ttl() == 0 {
            return;
        }
        let env = self.env.clone();
        let forwarded = PacketHeader::new(
            header.id(),
            header.ttl() - 1,
            header.inst(),
            header.dof(),
            header.ds(),
            header.sof(),
            header.ss(),
        );
        if let Some(conn) = self.connections.get_mut(&to) {
            if conn.is_active() {
                conn.write_packet(&env, broadcast, &forwarded, body);
            }
        }
    }

    fn broadcast_fanout(&mut self, header: &PacketHeader, body: &[u8], from: i32) {
        let promisc_key = Address::promisc(header.inst());
        let from_gate = if from < 0 { Some(route_id_gate(from)) } else { None };

        for (gate_id, gate) in &mut self.gates {
            if Some(*gate_id) == from_gate {
                continue; // never send backwards
            }
            if !gate.ready() || !gate.listens_to(&promisc_key) {
                continue;
            }
            gate.deliver(header.inst(), header.dof(), header.ds(), header.sof(), header.ss(), body);
        }

        if header.ttl() == 0 {
            return; // local delivery only, no further spread
        }

        if self.config.shared_uplink {
            let active: Vec<i32> = self
                .connections
                .iter()
                .filter(|(_, c)| c.is_active())
                .map(|(id, _)| *id)
                .collect();
            if active.is_empty() {
                return;
            }
            #[allow(clippy::cast_possible_truncation)]
            let pick = active[self.env.random_below(active.len() as u32) as usize];
            self.forward_to(pick, true, header, body);
        } else {
            for id in self.connection_ids() {
                if id == from {
                    continue;
                }
                self.forward_to(id, true, header, body);
            }
        }
    }

    // ---- periodic driver ----

    /// The ~100 ms tick: connection timers, bandwidth refill, lazy route
    /// rebuild, reaping of finished inbound connections.
    pub fn periodic_update(&mut self) {
        let env = self.env.clone();

        for id in self.connection_ids() {
            let result = match self.connections.get_mut(&id) {
                Some(conn) => conn.periodic(&env),
                None => continue,
            };
            if let Err(err) = result {
                warn!(id, error = %err, "liveness failure");
                self.reset_connection(id);
            }
        }

        self.bl_recompute();
        self.update_routes();

        // Inbound connections that finished are freed; outbound ones
        // stay for their retry timer.
        self.connections.retain(|_, c| c.is_outbound() || c.state() != ConnState::Inactive);
    }

    /// Distribute this tick's bandwidth budgets across active
    /// connections.
    fn bl_recompute(&mut self) {
        if !self.config.ubl_enabled && !self.config.dbl_enabled {
            return;
        }

        #[allow(clippy::cast_possible_truncation)]
        let active = self.connections.values().filter(|c| c.is_active()).count() as u32;
        if active == 0 {
            return;
        }

        let up = Self::share(self.config.ubl_total, self.config.ubl_conn, active);
        let up_burst = self.config.ubl_burst.max(up);
        let down = Self::share(self.config.dbl_total, self.config.dbl_conn, active);

        for conn in self.connections.values_mut().filter(|c| c.is_active()) {
            conn.grant_bandwidth(up, up_burst, down);
        }
    }

    /// Per-connection slice of a global budget, capped by the
    /// per-connection limit. Zero values mean "no limit of that kind".
    fn share(total: u32, per_conn: u32, active: u32) -> u32 {
        let slice = if total > 0 { total / active } else { per_conn };
        if per_conn > 0 {
            slice.min(per_conn)
        } else {
            slice
        }
    }

    /// Aggregate traffic counters over all connections.
    #[must_use]
    pub fn totals(&self) -> NodeTotals {
        let mut totals = NodeTotals::default();
        for conn in self.connections.values() {
            let stats = conn.stats();
            totals.in_p += stats.in_p_total;
            totals.in_s += stats.in_s_total;
            totals.out_p += stats.out_p_total;
            totals.out_s += stats.out_s_total;
        }
        totals
    }
}
