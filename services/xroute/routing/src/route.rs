//! Route entries as handed to the forwarding element

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use xroute_topology::{DestinationKind, NetworkEntry};
use xroute_wire::{NodeId, PathIndex};

bitflags! {
    /// Route attribute bitmask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct RouteFlags: u32 {
        /// Destination is a host
        const HOST = 1 << 0;
        /// Destination is a router
        const ROUTER = 1 << 1;
        /// Destination is an anycast service identifier (may have several paths)
        const SERVICE = 1 << 2;
        /// Administratively injected, not computed
        const STATIC = 1 << 3;
        /// Next hop is the destination itself
        const DIRECT = 1 << 4;
    }
}

/// Key of an installed route
pub type RouteKey = (NodeId, PathIndex);

/// One forwarding entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Destination node or service
    pub destination: NodeId,
    /// Outgoing interface
    pub port: u32,
    /// Next hop node
    pub next_hop: NodeId,
    /// Route attributes
    pub flags: RouteFlags,
    /// Relative weight among the destination's paths
    pub weight: u32,
    /// Path index distinguishing parallel paths
    pub path_index: PathIndex,
}

impl RouteEntry {
    /// Create a primary single-path route
    pub fn new(destination: impl Into<NodeId>, next_hop: impl Into<NodeId>, port: u32, flags: RouteFlags) -> Self {
        Self {
            destination: destination.into(),
            port,
            next_hop: next_hop.into(),
            flags,
            weight: 1,
            path_index: PathIndex::PRIMARY,
        }
    }

    /// Turn this route into one weighted path of a multi-path destination
    pub fn with_path(mut self, path_index: PathIndex, weight: u32) -> Self {
        self.path_index = path_index;
        self.weight = weight;
        self
    }

    /// Route derived from a network table row, leaving through `port`
    pub fn from_network_entry(entry: &NetworkEntry, port: u32) -> Self {
        let mut flags = match entry.kind {
            DestinationKind::Router => RouteFlags::ROUTER,
            DestinationKind::Host => RouteFlags::HOST,
            DestinationKind::Service => RouteFlags::SERVICE,
        };
        if entry.next_hop == entry.destination {
            flags |= RouteFlags::DIRECT;
        }
        Self {
            destination: entry.destination.clone(),
            port,
            next_hop: entry.next_hop.clone(),
            flags,
            weight: entry.weight,
            path_index: entry.path_index,
        }
    }

    /// Key identifying this route among installed routes
    pub fn key(&self) -> RouteKey {
        (self.destination.clone(), self.path_index)
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}] via {} port {} (weight {}, flags {:#x})",
            self.destination,
            self.path_index,
            self.next_hop,
            self.port,
            self.weight,
            self.flags.bits()
        )
    }
}

/// One forwarding-table mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOp {
    /// Add a route for a key not currently installed
    Install(RouteEntry),
    /// Replace the route installed under the same key
    Update {
        /// Currently installed route
        previous: RouteEntry,
        /// Replacement
        route: RouteEntry,
    },
    /// Remove the route installed under this key
    Remove {
        /// Destination
        destination: NodeId,
        /// Path index
        path_index: PathIndex,
    },
}

impl RouteOp {
    /// Key the operation applies to
    pub fn key(&self) -> RouteKey {
        match self {
            RouteOp::Install(route) => route.key(),
            RouteOp::Update { route, .. } => route.key(),
            RouteOp::Remove { destination, path_index } => (destination.clone(), *path_index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_route_from_network_entry() {
        let entry = NetworkEntry {
            destination: NodeId::from("C"),
            path_index: PathIndex::PRIMARY,
            next_hop: NodeId::from("A"),
            cost: 2,
            weight: 1,
            kind: DestinationKind::Host,
            advertiser: NodeId::from("A"),
            last_updated_at: Instant::now(),
        };

        let route = RouteEntry::from_network_entry(&entry, 3);
        assert_eq!(route.port, 3);
        assert_eq!(route.flags, RouteFlags::HOST);
        assert_eq!(route.key(), (NodeId::from("C"), PathIndex::PRIMARY));

        let direct = NetworkEntry {
            next_hop: NodeId::from("C"),
            ..entry
        };
        assert_eq!(
            RouteEntry::from_network_entry(&direct, 3).flags,
            RouteFlags::HOST | RouteFlags::DIRECT
        );
    }

    #[test]
    fn test_with_path_and_display() {
        let route = RouteEntry::new("SID:s", "R1", 1, RouteFlags::SERVICE).with_path(PathIndex(2), 3);
        assert_eq!(route.weight, 3);
        assert_eq!(route.path_index, PathIndex(2));
        assert_eq!(route.to_string(), "SID:s[2] via R1 port 1 (weight 3, flags 0x4)");
        assert_eq!(RouteOp::Install(route.clone()).key(), route.key());
    }
}
