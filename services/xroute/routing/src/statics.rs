//! Administratively injected routes.
//!
//! Static routes are held per destination as whole groups: a table update
//! replaces every path of a destination at once. They name a next hop rather
//! than a port; the port is resolved through the neighbor table each time the
//! desired route set is built, so a static route through a neighbor that is
//! not (or no longer) adjacent is simply not installed.

use crate::route::{RouteEntry, RouteFlags};
use std::collections::BTreeMap;
use xroute_topology::NeighborTable;
use xroute_wire::{NodeId, PathIndex};

/// One injected path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticRoute {
    /// Destination host, domain or service
    pub destination: NodeId,
    /// Path index
    pub path_index: PathIndex,
    /// Next hop, which must be adjacent to be installable
    pub next_hop: NodeId,
    /// Relative weight
    pub weight: u32,
    /// Route attributes (always includes STATIC)
    pub flags: RouteFlags,
}

impl StaticRoute {
    /// Single-path static route
    pub fn primary(destination: NodeId, next_hop: NodeId) -> Self {
        Self {
            destination,
            path_index: PathIndex::PRIMARY,
            next_hop,
            weight: 1,
            flags: RouteFlags::STATIC | RouteFlags::HOST,
        }
    }

    /// One weighted path of a service group
    pub fn service_path(service_id: NodeId, next_hop: NodeId, weight: u32, path_index: PathIndex) -> Self {
        Self {
            destination: service_id,
            path_index,
            next_hop,
            weight,
            flags: RouteFlags::STATIC | RouteFlags::SERVICE,
        }
    }

    /// Resolve to a route entry if the next hop is adjacent
    pub fn resolve(&self, neighbors: &NeighborTable) -> Option<RouteEntry> {
        let port = neighbors.port_of(&self.next_hop)?;
        let mut flags = self.flags;
        if self.next_hop == self.destination {
            flags |= RouteFlags::DIRECT;
        }
        Some(RouteEntry {
            destination: self.destination.clone(),
            port,
            next_hop: self.next_hop.clone(),
            flags,
            weight: self.weight,
            path_index: self.path_index,
        })
    }
}

/// Static route groups keyed by destination
#[derive(Debug, Default)]
pub struct StaticRoutes {
    groups: BTreeMap<NodeId, Vec<StaticRoute>>,
}

impl StaticRoutes {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every path of `destination`; an empty list withdraws the group.
    /// Returns whether anything changed.
    pub fn replace_group(&mut self, destination: &NodeId, mut routes: Vec<StaticRoute>) -> bool {
        routes.sort_by_key(|route| route.path_index);
        if routes.is_empty() {
            return self.groups.remove(destination).is_some();
        }
        if self.groups.get(destination) == Some(&routes) {
            return false;
        }
        self.groups.insert(destination.clone(), routes);
        true
    }

    /// Paths of one destination
    pub fn group(&self, destination: &NodeId) -> Option<&[StaticRoute]> {
        self.groups.get(destination).map(Vec::as_slice)
    }

    /// Every static path
    pub fn iter(&self) -> impl Iterator<Item = &StaticRoute> {
        self.groups.values().flatten()
    }

    /// Number of destinations with static routes
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether there are no static routes
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_replace_and_withdraw_group() {
        let mut statics = StaticRoutes::new();
        let sid = NodeId::from("SID:s");

        let group = vec![
            StaticRoute::service_path(sid.clone(), NodeId::from("B"), 1, PathIndex(2)),
            StaticRoute::service_path(sid.clone(), NodeId::from("A"), 2, PathIndex(1)),
        ];
        assert!(statics.replace_group(&sid, group.clone()));
        assert!(!statics.replace_group(&sid, group));
        assert_eq!(statics.group(&sid).unwrap()[0].path_index, PathIndex(1));
        assert_eq!(statics.iter().count(), 2);

        assert!(statics.replace_group(&sid, vec![]));
        assert!(statics.is_empty());
        assert!(!statics.replace_group(&sid, vec![]));
    }

    #[test]
    fn test_resolve_requires_adjacent_next_hop() {
        let mut neighbors = NeighborTable::new(Duration::from_secs(60));
        neighbors.on_hello(&NodeId::from("A"), 1, 4, Instant::now());

        let reachable = StaticRoute::primary(NodeId::from("D"), NodeId::from("A"));
        let route = reachable.resolve(&neighbors).unwrap();
        assert_eq!(route.port, 4);
        assert!(route.flags.contains(RouteFlags::STATIC));

        let unreachable = StaticRoute::primary(NodeId::from("D"), NodeId::from("Z"));
        assert!(unreachable.resolve(&neighbors).is_none());
    }
}
