//! Deterministic simulation harness for the nimbus mesh.
//!
//! This crate provides everything the scenario tests need to run whole
//! meshes inside one test function, with no real sockets, threads or
//! clocks:
//!
//! - [`SimEnv`]: a virtual microsecond clock plus a seeded RNG
//! - [`pipe`]: an in-memory duplex byte pipe implementing `Transport`
//! - [`SimGate`]: a gate that records every delivered packet
//! - [`World`]: nodes wired together with pipes, pumped to quiescence
//!
//! Everything is single-threaded, matching the core's execution model;
//! a fixed RNG seed replays a scenario byte for byte.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod pipe;
pub mod sim_env;
pub mod sim_gate;
pub mod world;

pub use pipe::{pipe, PipeTransport};
pub use sim_env::SimEnv;
pub use sim_gate::{GatePacket, SimGate, SimGateHandle};
pub use world::World;
