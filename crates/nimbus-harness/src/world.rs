//! Multi-node mesh wiring and pumping.
//!
//! A `World` owns several nodes sharing one simulated environment,
//! links them with in-memory pipes, and drives them the way a real
//! deployment's pollers and timers would: pump rounds move bytes until
//! quiescence, ticks advance the virtual clock and fire every node's
//! periodic driver.

use std::time::Duration;

use nimbus_core::{Config, Node};

use crate::{pipe::pipe, pipe::PipeTransport, sim_env::SimEnv};

/// The periodic driver cadence, mirroring a production embedder.
pub const TICK: Duration = Duration::from_millis(100);

/// A simulated mesh: nodes, links, one clock.
pub struct World {
    env: SimEnv,
    nodes: Vec<Node<SimEnv, PipeTransport>>,
    next_fd: i32,
}

impl World {
    /// An empty world with the default seed.
    #[must_use]
    pub fn new() -> Self {
        Self::with_env(SimEnv::new())
    }

    /// An empty world over a specific environment (seed control).
    #[must_use]
    pub fn with_env(env: SimEnv) -> Self {
        Self { env, nodes: Vec::new(), next_fd: 100 }
    }

    /// The shared environment.
    #[must_use]
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Add a node with its own configuration; returns its index.
    pub fn add_node(&mut self, config: Config) -> usize {
        self.nodes.push(Node::new(self.env.clone(), config));
        self.nodes.len() - 1
    }

    /// A node by index.
    ///
    /// # Panics
    ///
    /// On an out-of-range index.
    #[must_use]
    pub fn node(&mut self, index: usize) -> &mut Node<SimEnv, PipeTransport> {
        &mut self.nodes[index]
    }

    /// Read-only view of a node.
    ///
    /// # Panics
    ///
    /// On an out-of-range index.
    #[must_use]
    pub fn node_ref(&self, index: usize) -> &Node<SimEnv, PipeTransport> {
        &self.nodes[index]
    }

    /// Link two nodes: `a` dials, `b` accepts. Returns the connection
    /// ids `(on_a, on_b)`.
    pub fn link(&mut self, a: usize, b: usize) -> (i32, i32) {
        let (side_a, side_b) = pipe();

        let fd_a = self.alloc_fd();
        let fd_b = self.alloc_fd();

        let conn_a = self.nodes[a].connect(format!("node-{b}"), side_a, fd_a);
        let conn_b = self.nodes[b].accept(side_b, fd_b);
        (conn_a, conn_b)
    }

    fn alloc_fd(&mut self) -> i32 {
        let fd = self.next_fd;
        self.next_fd += 1;
        fd
    }

    /// Move bytes until the mesh goes quiet (bounded rounds).
    pub fn pump(&mut self) {
        for _ in 0..16 {
            for node in &mut self.nodes {
                node.poll_all();
            }
        }
    }

    /// One driver tick: advance the clock, fire every periodic driver,
    /// pump the fallout.
    pub fn tick(&mut self) {
        self.env.advance(TICK);
        for node in &mut self.nodes {
            node.periodic_update();
        }
        self.pump();
    }

    /// Pump and tick until route state has had time to propagate
    /// mesh-wide (eventual consistency needs one tick per hop).
    pub fn converge(&mut self) {
        self.pump();
        for _ in 0..8 {
            self.tick();
        }
    }

    /// Advance the clock in tick-sized steps, firing timers on the way,
    /// so keepalive and retry behavior matches a real deployment.
    pub fn advance_time(&mut self, by: Duration) {
        let ticks = (by.as_micros() / TICK.as_micros()).max(1);
        for _ in 0..ticks {
            self.tick();
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
