//! Two-node liveness scenario.
//!
//! A dials B, both reach Active, the keepalive timer fires a latency
//! probe, the pong populates the measured ping, and with no gates
//! anywhere both nodes settle on identical (empty) reported route
//! tables.

use std::time::Duration;

use nimbus_core::{Config, ConnState};
use nimbus_harness::World;

#[test]
fn two_nodes_measure_latency_and_agree_on_empty_routes() {
    let mut world = World::new();
    let a = world.add_node(Config::default());
    let b = world.add_node(Config::default());

    let (conn_a, conn_b) = world.link(a, b);
    world.converge();

    assert_eq!(world.node_ref(a).connection(conn_a).unwrap().state(), ConnState::Active);
    assert_eq!(world.node_ref(b).connection(conn_b).unwrap().state(), ConnState::Active);

    // Latency is unknown until the first probe round-trips
    let unknown = Config::default().unknown_ping();
    assert_eq!(world.node_ref(a).connection(conn_a).unwrap().ping(), unknown);

    // Let the keepalive interval elapse; probes fire and pongs return
    let keepalive = Duration::from_micros(Config::default().keepalive);
    world.advance_time(keepalive + Duration::from_secs(1));

    let ping_a = world.node_ref(a).connection(conn_a).unwrap().ping();
    let ping_b = world.node_ref(b).connection(conn_b).unwrap().ping();
    assert!(ping_a < unknown, "a measured {ping_a}");
    assert!(ping_b < unknown, "b measured {ping_b}");

    // No gates anywhere: both reported tables are identical and empty
    assert!(world.node_ref(a).router().reported().is_empty());
    assert!(world.node_ref(b).router().reported().is_empty());
}

#[test]
fn dead_peer_triggers_retry_cycle() {
    let mut world = World::new();
    let a = world.add_node(Config::default());
    let b = world.add_node(Config::default());

    let (conn_a, conn_b) = world.link(a, b);
    world.converge();

    // B vanishes without closing: sever the transport under A by
    // gracefully tearing down B's side and never pumping its goodbye.
    world.node(b).reset_connection(conn_b);

    // A notices via EOF on its next poll and re-arms the retry timer
    world.pump();
    assert_eq!(
        world.node_ref(a).connection(conn_a).unwrap().state(),
        ConnState::RetryTimeout
    );

    // The inbound side on B was freed outright
    assert!(world.node_ref(b).connection(conn_b).is_none());

    // After the retry interval the outbound connection dials again
    let retry = Duration::from_micros(Config::default().retry);
    world.advance_time(retry + Duration::from_secs(1));
    assert!(world.node_ref(a).connection(conn_a).is_some());
    assert_ne!(
        world.node_ref(a).connection(conn_a).unwrap().state(),
        ConnState::RetryTimeout
    );
}
