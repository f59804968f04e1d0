//! Distance-vector route table, diff reporter and multipath scatterer.
//!
//! The table maps mesh addresses to their best next hop. It is rebuilt
//! wholesale from the live gates and connections whenever something
//! marked it dirty (a handshake, a disconnect, an inbound route update);
//! between rebuilds lookups are pure map reads. Rebuilding rather than
//! patching keeps the invariant that every next hop resolves to a
//! currently live gate or connection — dead ids simply do not get
//! re-inserted.
//!
//! Peers are told about changes as diffs: after each rebuild the table
//! is merge-walked against the last reported state and only meaningful
//! deltas (new addresses, withdrawn addresses, ping moved beyond the
//! report threshold, distance changed) are broadcast.
//!
//! # Multipath scattering
//!
//! Optionally, packets to one destination are scattered across several
//! next hops to aggregate bandwidth over disjoint paths. Candidate hops
//! are sorted by latency and chopped into bands: a band starts at cost
//! `c` and extends while `cost < ratio * c`. The walk hands each band a
//! uniform chance to pass selection on to the next, so nearby-latency
//! links share traffic while a much slower link only rarely sees any.
//! This is worth enabling on leaf nodes with genuinely disjoint uplinks;
//! on a star hub it only burns CPU and reorders streams.

use std::collections::BTreeMap;

use tracing::{debug, info};

use nimbus_proto::{Address, RouteRecord};

use crate::{
    config::Config,
    env::Environment,
    gate::gate_route_id,
};

/// One route table entry: path cost, hop count, next hop.
///
/// `id >= 0` names a connection; `id = -(g+1)` names local gate `g`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteInfo {
    /// Path latency in microseconds (never 0 inside the table)
    pub ping: u32,
    /// Path length in hops
    pub dist: u32,
    /// Next hop id
    pub id: i32,
}

/// A route as last advertised by one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteRoute {
    /// Peer-reported latency in microseconds
    pub ping: u32,
    /// Peer-reported distance in hops
    pub dist: u32,
}

/// The routing state of one node.
pub struct Router {
    route: BTreeMap<Address, RouteInfo>,
    reported: BTreeMap<Address, RouteInfo>,
    promisc: BTreeMap<Address, Vec<RouteInfo>>,
    multiroute: BTreeMap<Address, BTreeMap<u32, i32>>,
    dirty: u32,

    report_ping_diff: u32,
    max_dist: u32,
    hop_penalization: u32,
    multipath: bool,
    multi_ratio: u32,
}

impl Router {
    /// Build a router from configuration (already validated).
    #[must_use]
    pub fn new(config: &Config) -> Self {
        info!(
            threshold_us = config.report_ping_changes_above,
            "only ping changes above threshold will be reported to peers"
        );
        info!(max_dist = config.route_max_dist, "maximal node distance");
        info!(percent = config.route_hop_penalization, "hop penalization");
        if config.multipath {
            info!(ratio = config.multipath_ratio, "multipath scattering enabled");
        }
        if config.shared_uplink {
            info!("sharing uplink for broadcasts");
        }

        Self {
            route: BTreeMap::new(),
            reported: BTreeMap::new(),
            promisc: BTreeMap::new(),
            multiroute: BTreeMap::new(),
            dirty: 1,

            report_ping_diff: config.report_ping_changes_above,
            max_dist: config.route_max_dist,
            hop_penalization: config.route_hop_penalization,
            multipath: config.multipath,
            multi_ratio: config.multipath_ratio,
        }
    }

    /// Request a rebuild on the next [`Router::update`].
    pub fn set_dirty(&mut self) {
        self.dirty += 1;
    }

    /// True when a rebuild is pending.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty > 0
    }

    /// The current best-path table.
    #[must_use]
    pub fn table(&self) -> &BTreeMap<Address, RouteInfo> {
        &self.route
    }

    /// The table as last reported to peers.
    #[must_use]
    pub fn reported(&self) -> &BTreeMap<Address, RouteInfo> {
        &self.reported
    }

    /// Best next hop for an address, if known.
    #[must_use]
    pub fn lookup(&self, addr: &Address) -> Option<&RouteInfo> {
        self.route.get(addr)
    }

    /// All known promiscuous listeners under an instance key.
    #[must_use]
    pub fn promisc_for(&self, key: &Address) -> &[RouteInfo] {
        self.promisc.get(key).map_or(&[], Vec::as_slice)
    }

    /// Rebuild the table from live state if dirty; returns the diff
    /// records that must be broadcast to peers (empty when clean or
    /// unchanged).
    ///
    /// `gates` yields `(gate_id, local addresses)` for every ready gate;
    /// `conns` yields `(conn_id, conn_ping, remote routes)` for every
    /// Active connection.
    pub fn update<'a, G, C>(&mut self, gates: G, conns: C) -> Vec<RouteRecord>
    where
        G: Iterator<Item = (i32, &'a [Address])>,
        C: Iterator<Item = (i32, u32, &'a BTreeMap<Address, RemoteRoute>)>,
    {
        if self.dirty == 0 {
            return Vec::new();
        }
        self.dirty = 0;

        self.route.clear();
        self.promisc.clear();

        // Local gates first: dist 0, ping 1, so a local route is never
        // overpowered by a remote one.
        for (gate_id, local) in gates {
            for addr in local {
                let info = RouteInfo { ping: 1, dist: 0, id: gate_route_id(gate_id) };
                self.route.insert(addr.clone(), info);
                if addr.is_promisc() {
                    self.promisc.entry(addr.clone()).or_default().push(info);
                }
            }
        }

        let conns: Vec<_> = conns.collect();

        for &(conn_id, conn_ping, remote) in &conns {
            for (addr, rr) in remote {
                if rr.dist + 1 > self.max_dist {
                    continue;
                }

                // The +2 keeps advertised pings strictly positive so a
                // withdrawal (ping 0) can never be confused with a route.
                let cand = RouteInfo {
                    ping: 2u32.saturating_add(rr.ping).saturating_add(conn_ping),
                    dist: rr.dist + 1,
                    id: conn_id,
                };

                // Every promiscuous listener is recorded, not only the
                // best-path winner; broadcasts must reach them all.
                if addr.is_promisc() {
                    self.promisc.entry(addr.clone()).or_default().push(cand);
                }

                if let Some(cur) = self.route.get(addr) {
                    let cur_eff = Self::penalized(cur, self.hop_penalization);
                    let cand_eff = Self::penalized(&cand, self.hop_penalization);
                    if cur_eff < cand_eff {
                        continue;
                    }
                    if cur_eff == cand_eff && cur.dist < cand.dist {
                        continue;
                    }
                }

                self.route.insert(addr.clone(), cand);
            }
        }

        if self.multipath {
            self.multiroute.clear();
            for &(conn_id, conn_ping, remote) in &conns {
                for (addr, rr) in remote {
                    let cost = 2u32.saturating_add(rr.ping).saturating_add(conn_ping);
                    self.multiroute.entry(addr.clone()).or_default().insert(cost, conn_id);
                }
            }
        }

        debug!(routes = self.route.len(), "route table rebuilt");

        self.report()
    }

    /// Latency with the per-hop percentage penalty applied, as used for
    /// path comparison. Penalizing both sides of every comparison makes
    /// the winner independent of connection iteration order.
    fn penalized(info: &RouteInfo, penalty: u32) -> u64 {
        u64::from(info.ping) * (100 + u64::from(penalty) * u64::from(info.dist)) / 100
    }

    /// Merge-walk the table against the last reported state, fold the
    /// changes into `reported`, and return them as wire records
    /// (withdrawals carry ping 0).
    fn report(&mut self) -> Vec<RouteRecord> {
        let mut changes: Vec<(Address, RouteInfo)> = Vec::new();

        let mut new_iter = self.route.iter().peekable();
        let mut old_iter = self.reported.iter().peekable();

        loop {
            match (new_iter.peek(), old_iter.peek()) {
                (Some(&(na, ni)), Some(&(oa, oi))) => {
                    if na == oa {
                        let ping_moved = ni.ping.abs_diff(oi.ping) > self.report_ping_diff;
                        if ping_moved || ni.dist != oi.dist {
                            changes.push((na.clone(), *ni));
                        }
                        new_iter.next();
                        old_iter.next();
                    } else if na < oa {
                        changes.push((na.clone(), *ni));
                        new_iter.next();
                    } else {
                        changes.push((oa.clone(), RouteInfo { ping: 0, dist: 0, id: 0 }));
                        old_iter.next();
                    }
                }
                (Some(&(na, ni)), None) => {
                    changes.push((na.clone(), *ni));
                    new_iter.next();
                }
                (None, Some(&(oa, _))) => {
                    changes.push((oa.clone(), RouteInfo { ping: 0, dist: 0, id: 0 }));
                    old_iter.next();
                }
                (None, None) => break,
            }
        }

        let mut records = Vec::with_capacity(changes.len());
        for (addr, info) in changes {
            if info.ping == 0 {
                self.reported.remove(&addr);
            } else {
                self.reported.insert(addr.clone(), info);
            }
            records.push(RouteRecord { ping: info.ping, dist: info.dist, addr });
        }

        records
    }

    /// The full reported table as wire records, for a peer that just
    /// became active (a `RouteSet`, not a diff). Deliberately does not
    /// force a rebuild.
    #[must_use]
    pub fn full_report(&self) -> Vec<RouteRecord> {
        self.reported
            .iter()
            .map(|(addr, info)| RouteRecord { ping: info.ping, dist: info.dist, addr: addr.clone() })
            .collect()
    }

    /// Pick a scattered next hop for `addr`, never `from`.
    ///
    /// Walks the latency-sorted candidates in bands of width
    /// `multi_ratio`; each band passes with probability `1/(n+1)` where
    /// `n` is its size, otherwise a uniform member wins. Falling off the
    /// last band yields `None` and the forwarder treats the destination
    /// as unknown.
    #[must_use]
    pub fn scatter<E: Environment>(&self, env: &E, addr: &Address, from: i32) -> Option<i32> {
        let costs = self.multiroute.get(addr)?;
        let hops: Vec<(u32, i32)> = costs.iter().map(|(&cost, &id)| (cost, id)).collect();

        let mut i = 0;
        while i < hops.len() {
            let band_start = i;
            let limit = self.multi_ratio.saturating_mul(hops[i].0);

            while i < hops.len() && hops[i].0 < limit {
                i += 1;
            }
            let n = i - band_start;

            #[allow(clippy::cast_possible_truncation)] // bands are tiny
            let r = env.random_below(n as u32 + 1) as usize;
            if r == n {
                continue; // pass to the next band
            }

            let pick = hops[band_start + r].1;
            if pick == from {
                continue; // never send backwards
            }
            return Some(pick);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::SystemEnv;

    fn addr(inst: u32, bytes: &[u8]) -> Address {
        Address::new(inst, bytes).unwrap()
    }

    fn remote(entries: &[(Address, u32, u32)]) -> BTreeMap<Address, RemoteRoute> {
        entries
            .iter()
            .map(|(a, ping, dist)| (a.clone(), RemoteRoute { ping: *ping, dist: *dist }))
            .collect()
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.validate();
        config
    }

    #[test]
    fn gates_install_local_routes() {
        let mut router = Router::new(&config());

        let locals = [addr(7, &[0xAA, 0xBB]), Address::promisc(7)];
        let records = router.update([(0, &locals[..])].into_iter(), std::iter::empty());

        assert_eq!(
            router.lookup(&locals[0]),
            Some(&RouteInfo { ping: 1, dist: 0, id: -1 })
        );
        assert_eq!(router.promisc_for(&Address::promisc(7)).len(), 1);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn distance_cap_filters_routes() {
        let mut cfg = config();
        cfg.route_max_dist = 2;
        let mut router = Router::new(&cfg);

        let a = addr(1, &[1]);
        let near = remote(&[(a.clone(), 10, 1)]);
        let far = remote(&[(a.clone(), 10, 2)]); // would become dist 3

        router.update(std::iter::empty(), [(1, 5, &near), (2, 5, &far)].into_iter());
        assert_eq!(router.lookup(&a).unwrap().id, 1);

        let mut router = Router::new(&cfg);
        router.update(std::iter::empty(), [(2, 5, &far)].into_iter());
        assert_eq!(router.lookup(&a), None);
    }

    #[test]
    fn hop_penalization_prefers_direct_path() {
        // Direct: cand ping 20, dist 1. Relay: cand ping 18, dist 3.
        let a = addr(1, &[0x42]);
        let direct = remote(&[(a.clone(), 9, 0)]); // 2 + 9 + 9 = 20
        let relay = remote(&[(a.clone(), 8, 2)]); // 2 + 8 + 8 = 18

        // Penalized: direct 20 * 1.2 = 24, relay 18 * 1.6 = 28.8.
        let mut cfg = config();
        cfg.route_hop_penalization = 20;
        let mut router = Router::new(&cfg);
        router.update(std::iter::empty(), [(1, 9, &direct), (2, 8, &relay)].into_iter());
        assert_eq!(router.lookup(&a).unwrap().id, 1);

        // Order must not matter.
        let mut router = Router::new(&cfg);
        router.update(std::iter::empty(), [(2, 8, &relay), (1, 9, &direct)].into_iter());
        assert_eq!(router.lookup(&a).unwrap().id, 1);

        // Without penalization the lower raw latency wins.
        let mut router = Router::new(&config());
        router.update(std::iter::empty(), [(1, 9, &direct), (2, 8, &relay)].into_iter());
        assert_eq!(router.lookup(&a).unwrap().id, 2);
    }

    #[test]
    fn equal_cost_tie_breaks_on_distance() {
        let a = addr(1, &[7]);
        let long = remote(&[(a.clone(), 10, 3)]);
        let short = remote(&[(a.clone(), 10, 1)]);

        let mut router = Router::new(&config());
        router.update(std::iter::empty(), [(1, 0, &long), (2, 0, &short)].into_iter());
        assert_eq!(router.lookup(&a).unwrap().id, 2);
    }

    #[test]
    fn update_is_noop_when_clean() {
        let a = addr(1, &[1]);
        let rr = remote(&[(a.clone(), 10, 0)]);

        let mut router = Router::new(&config());
        let first = router.update(std::iter::empty(), [(1, 0, &rr)].into_iter());
        assert_eq!(first.len(), 1);

        // Not dirty: nothing recomputed, nothing reported.
        let second = router.update(std::iter::empty(), [(1, 0, &rr)].into_iter());
        assert!(second.is_empty());

        // Dirty but unchanged: recomputed, still nothing to report.
        router.set_dirty();
        let third = router.update(std::iter::empty(), [(1, 0, &rr)].into_iter());
        assert!(third.is_empty());
    }

    #[test]
    fn reported_matches_table_after_update() {
        let a = addr(1, &[1]);
        let b = addr(2, &[2, 3]);
        let rr = remote(&[(a, 10, 0), (b, 20, 1)]);

        let mut router = Router::new(&config());
        router.update(std::iter::empty(), [(1, 5, &rr)].into_iter());

        assert_eq!(router.table(), router.reported());
    }

    #[test]
    fn removed_route_is_withdrawn() {
        let a = addr(1, &[1]);
        let rr = remote(&[(a.clone(), 10, 0)]);

        let mut router = Router::new(&config());
        router.update(std::iter::empty(), [(1, 0, &rr)].into_iter());

        router.set_dirty();
        let records = router.update(std::iter::empty(), std::iter::empty());

        assert_eq!(records.len(), 1);
        assert!(records[0].is_withdrawal());
        assert_eq!(records[0].addr, a);
        assert!(router.reported().is_empty());
    }

    #[test]
    fn small_ping_changes_are_not_reported() {
        let a = addr(1, &[1]);

        let mut router = Router::new(&config());
        let before = remote(&[(a.clone(), 10_000, 0)]);
        router.update(std::iter::empty(), [(1, 0, &before)].into_iter());

        // 3ms swing, under the 5ms default threshold
        let after = remote(&[(a.clone(), 13_000, 0)]);
        router.set_dirty();
        let records = router.update(std::iter::empty(), [(1, 0, &after)].into_iter());
        assert!(records.is_empty());

        // A big swing is reported
        let after = remote(&[(a, 40_000, 0)]);
        router.set_dirty();
        let records = router.update(std::iter::empty(), [(1, 0, &after)].into_iter());
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn scatter_picks_within_band_and_skips_ingress() {
        let a = addr(1, &[9]);
        let rr = remote(&[(a.clone(), 0, 0)]);

        let mut cfg = config();
        cfg.multipath = true;
        let mut router = Router::new(&cfg);
        // Costs 12 and 17: one band (17 < 2 * 12).
        router.update(std::iter::empty(), [(1, 10, &rr), (2, 15, &rr)].into_iter());

        let env = SystemEnv::new();
        let mut seen = [0u32; 3]; // conn 1, conn 2, none
        for _ in 0..2000 {
            match router.scatter(&env, &a, -1) {
                Some(1) => seen[0] += 1,
                Some(2) => seen[1] += 1,
                None => seen[2] += 1,
                Some(other) => panic!("unexpected hop {other}"),
            }
        }

        // Uniform over {conn 1, conn 2, pass}: each about a third.
        assert!(seen.iter().all(|&n| n > 400), "skewed scatter: {seen:?}");

        // The ingress hop is never selected.
        for _ in 0..500 {
            assert_ne!(router.scatter(&env, &a, 1), Some(1));
        }
    }

    #[test]
    fn scatter_unknown_address_is_none() {
        let mut cfg = config();
        cfg.multipath = true;
        let router = Router::new(&cfg);

        let env = SystemEnv::new();
        assert_eq!(router.scatter(&env, &addr(1, &[1]), -1), None);
    }
}
