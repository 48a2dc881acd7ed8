//! Neighbor discovery state, link-state database and shortest-path computation for xroute.
//!
//! This crate holds every piece of soft state a router keeps about the
//! topology: the adjacencies learned from Hellos, the freshest advertisement of
//! every originator, and the network table derived from them by shortest-path
//! computation. All tables take the current time explicitly so expiry is
//! deterministic under test.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod graph;
pub mod link_state;
pub mod neighbor;
pub mod network;
pub mod sequence;

pub use graph::{ComputedPath, DestinationKind, LocalService, TopologyGraph};
pub use link_state::*;
pub use neighbor::{NeighborChange, NeighborEntry, NeighborTable};
pub use network::{NetworkEntry, NetworkTable};
pub use sequence::{Freshness, SequenceTracker};
