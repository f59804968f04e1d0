//! Core configuration.
//!
//! Every tunable of the connection and routing subsystems, with defaults
//! that make a node functional out of the box. Loading this from a file
//! is the embedder's business; the struct only asks that
//! [`Config::validate`] runs before use so interdependent values are
//! clamped into sane ranges.
//!
//! All durations are microseconds, matching the connection timer fields.

use serde::{Deserialize, Serialize};

/// Node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capacity of the broadcast-ID duplicate suppression cache
    pub packet_id_cache_size: usize,

    /// Enable latency-scattered multipath routing
    pub multipath: bool,
    /// Latency factor grouping routes into scatter bands (min 2)
    pub multipath_ratio: u32,

    /// Ping changes below this many microseconds are not reported to
    /// peers
    pub report_ping_changes_above: u32,
    /// Maximal accepted route distance in hops
    pub route_max_dist: u32,
    /// TTL stamped on locally originated broadcasts
    pub route_broadcast_ttl: u16,
    /// Percentage penalty applied per hop when comparing route latencies
    pub route_hop_penalization: u32,
    /// Forward each broadcast to a single random peer instead of all
    pub shared_uplink: bool,

    /// Liveness timeout: an unanswered probe older than this resets the
    /// connection
    pub timeout: u64,
    /// Idle period after which a latency probe is sent
    pub keepalive: u64,
    /// Delay before an outbound connection retries after failure
    pub retry: u64,

    /// Largest accepted frame payload
    pub mtu: u16,
    /// Data-lane byte budget; admission fails at this size
    pub max_waiting_data_size: usize,
    /// Proto-lane byte budget
    pub max_waiting_proto_size: usize,
    /// Most route entries accepted from one peer before overflow
    /// handling kicks in
    pub max_remote_routes: usize,

    /// Enable upstream bandwidth limiting
    pub ubl_enabled: bool,
    /// Global upstream byte budget per tick (0 = no global pool)
    pub ubl_total: u32,
    /// Per-connection upstream cap per tick (0 = uncapped)
    pub ubl_conn: u32,
    /// Upstream burst ceiling for accumulated tokens
    pub ubl_burst: u32,

    /// Enable downstream bandwidth limiting
    pub dbl_enabled: bool,
    /// Global downstream byte budget per tick (0 = no global pool)
    pub dbl_total: u32,
    /// Per-connection downstream cap per tick (0 = uncapped)
    pub dbl_conn: u32,
    /// Downstream burst ceiling
    pub dbl_burst: u32,

    /// Enable Random Early Drop on the data lane
    pub red_enabled: bool,
    /// Data-lane size at which RED starts dropping
    pub red_threshold: usize,

    /// Interval between traffic rate recomputations
    pub stats_interval: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            packet_id_cache_size: 1024,

            multipath: false,
            multipath_ratio: 2,

            report_ping_changes_above: 5000,
            route_max_dist: 64,
            route_broadcast_ttl: 128,
            route_hop_penalization: 0,
            shared_uplink: false,

            timeout: 10_000_000,
            keepalive: 5_000_000,
            retry: 10_000_000,

            mtu: 8192,
            max_waiting_data_size: 1024 * 1024,
            max_waiting_proto_size: 64 * 1024,
            max_remote_routes: 256,

            ubl_enabled: false,
            ubl_total: 0,
            ubl_conn: 0,
            ubl_burst: 0,

            dbl_enabled: false,
            dbl_total: 0,
            dbl_conn: 0,
            dbl_burst: 0,

            red_enabled: false,
            red_threshold: 0,

            stats_interval: 1_000_000,
        }
    }
}

impl Config {
    /// Clamp interdependent values into usable ranges.
    pub fn validate(&mut self) {
        if self.multipath_ratio < 2 {
            self.multipath_ratio = 2;
        }
        if self.red_enabled && self.red_threshold >= self.max_waiting_data_size {
            // A threshold at or past the hard limit would divide by zero
            // in the drop probability; RED degenerates to plain tail drop.
            self.red_enabled = false;
        }
        if self.packet_id_cache_size == 0 {
            self.packet_id_cache_size = 1;
        }
    }

    /// The ping value that encodes "latency unknown" in route state:
    /// the liveness timeout, saturated to `u32`.
    #[must_use]
    pub fn unknown_ping(&self) -> u32 {
        u32::try_from(self.timeout).unwrap_or(u32::MAX)
    }
}
