//! Recording gate for scenario assertions.

use std::{cell::RefCell, rc::Rc};

use nimbus_core::Gate;
use nimbus_proto::Address;

/// One packet as a gate received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatePacket {
    /// Destination instance
    pub inst: u32,
    /// Destination offset within the body
    pub dof: u16,
    /// Destination length
    pub ds: u16,
    /// Source offset within the body
    pub sof: u16,
    /// Source length
    pub ss: u16,
    /// The opaque packet body
    pub body: Vec<u8>,
}

/// A gate that records every delivery for later inspection.
///
/// Built with the addresses it claims locally and the instances it
/// subscribes to; keep the [`SimGateHandle`] around before boxing the
/// gate into a node.
pub struct SimGate {
    id: i32,
    ready: bool,
    local: Vec<Address>,
    instances: Vec<Address>,
    delivered: Rc<RefCell<Vec<GatePacket>>>,
}

/// Shared view into a [`SimGate`]'s deliveries.
#[derive(Clone)]
pub struct SimGateHandle {
    delivered: Rc<RefCell<Vec<GatePacket>>>,
}

impl SimGate {
    /// A ready gate with no addresses; add some with the builder
    /// methods.
    #[must_use]
    pub fn new(id: i32) -> Self {
        Self {
            id,
            ready: true,
            local: Vec::new(),
            instances: Vec::new(),
            delivered: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Claim a local address (promiscuous when its bytes are empty).
    #[must_use]
    pub fn with_local(mut self, addr: Address) -> Self {
        if addr.is_promisc() && !self.instances.contains(&addr) {
            self.instances.push(addr.clone());
        }
        self.local.push(addr);
        self
    }

    /// Subscribe to broadcasts of an instance.
    #[must_use]
    pub fn with_instance(mut self, inst: u32) -> Self {
        let key = Address::promisc(inst);
        if !self.instances.contains(&key) {
            self.instances.push(key);
        }
        self
    }

    /// Mark the gate unready (routes through it stop being built).
    #[must_use]
    pub fn unready(mut self) -> Self {
        self.ready = false;
        self
    }

    /// A handle to the delivery log, kept by the test.
    #[must_use]
    pub fn handle(&self) -> SimGateHandle {
        SimGateHandle { delivered: Rc::clone(&self.delivered) }
    }
}

impl Gate for SimGate {
    fn id(&self) -> i32 {
        self.id
    }

    fn ready(&self) -> bool {
        self.ready
    }

    fn local(&self) -> &[Address] {
        &self.local
    }

    fn listens_to(&self, key: &Address) -> bool {
        self.instances.contains(key)
    }

    fn deliver(&mut self, inst: u32, dof: u16, ds: u16, sof: u16, ss: u16, body: &[u8]) {
        self.delivered.borrow_mut().push(GatePacket {
            inst,
            dof,
            ds,
            sof,
            ss,
            body: body.to_vec(),
        });
    }
}

impl SimGateHandle {
    /// Number of packets delivered so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.delivered.borrow().len()
    }

    /// Snapshot of all deliveries.
    #[must_use]
    pub fn received(&self) -> Vec<GatePacket> {
        self.delivered.borrow().clone()
    }
}
