//! Directly adjacent routers and hosts discovered through Hello exchange.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use xroute_wire::{NeighborInfo, NodeId};

/// A directly adjacent node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    /// Node ID of the neighbor
    pub neighbor_id: NodeId,
    /// When the last Hello (or host join) from this neighbor arrived
    pub last_hello_at: Instant,
    /// Cost of the link to this neighbor
    pub link_cost: u32,
    /// Interface the neighbor was heard on
    pub port: u32,
}

/// What a Hello did to the neighbor table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborChange {
    /// Neighbor was not known before
    Added,
    /// Known neighbor with a different link cost
    CostChanged {
        /// Previous cost
        previous: u32,
    },
    /// Known neighbor heard on a different interface
    PortChanged {
        /// Previous interface
        previous: u32,
    },
    /// Plain refresh
    Refreshed,
}

impl NeighborChange {
    /// Whether the change alters this router's own adjacencies
    pub fn is_topology_change(self) -> bool {
        !matches!(self, NeighborChange::Refreshed)
    }
}

/// Soft-state table of adjacent nodes
#[derive(Debug)]
pub struct NeighborTable {
    entries: BTreeMap<NodeId, NeighborEntry>,
    expire_after: Duration,
}

impl NeighborTable {
    /// Create an empty table expiring neighbors silent longer than `expire_after`
    pub fn new(expire_after: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            expire_after,
        }
    }

    /// Record or refresh a neighbor
    pub fn on_hello(&mut self, neighbor_id: &NodeId, cost: u32, port: u32, now: Instant) -> NeighborChange {
        match self.entries.get_mut(neighbor_id) {
            Some(entry) => {
                entry.last_hello_at = now;
                if entry.link_cost != cost {
                    let previous = entry.link_cost;
                    entry.link_cost = cost;
                    entry.port = port;
                    info!("Link cost to neighbor {} changed {} -> {}", neighbor_id, previous, cost);
                    NeighborChange::CostChanged { previous }
                } else if entry.port != port {
                    let previous = entry.port;
                    entry.port = port;
                    info!("Neighbor {} moved from port {} to {}", neighbor_id, previous, port);
                    NeighborChange::PortChanged { previous }
                } else {
                    NeighborChange::Refreshed
                }
            }
            None => {
                info!("New neighbor {} on port {} (cost: {})", neighbor_id, port, cost);
                self.entries.insert(
                    neighbor_id.clone(),
                    NeighborEntry {
                        neighbor_id: neighbor_id.clone(),
                        last_hello_at: now,
                        link_cost: cost,
                        port,
                    },
                );
                NeighborChange::Added
            }
        }
    }

    /// Remove neighbors silent for more than the expiry time
    pub fn expire_neighbors(&mut self, now: Instant) -> Vec<NodeId> {
        let expire_after = self.expire_after;
        let expired: Vec<NodeId> = self
            .entries
            .values()
            .filter(|entry| now.saturating_duration_since(entry.last_hello_at) > expire_after)
            .map(|entry| entry.neighbor_id.clone())
            .collect();

        for neighbor_id in &expired {
            self.entries.remove(neighbor_id);
            info!("Neighbor {} expired", neighbor_id);
        }
        if !expired.is_empty() {
            debug!("{} neighbors remain after expiry sweep", self.entries.len());
        }
        expired
    }

    /// Current adjacencies, sorted by neighbor id
    pub fn list_active(&self) -> Vec<NeighborInfo> {
        self.entries
            .values()
            .map(|entry| NeighborInfo::new(entry.neighbor_id.clone(), entry.link_cost))
            .collect()
    }

    /// Look up a neighbor
    pub fn get(&self, neighbor_id: &NodeId) -> Option<&NeighborEntry> {
        self.entries.get(neighbor_id)
    }

    /// Interface a neighbor is reachable on
    pub fn port_of(&self, neighbor_id: &NodeId) -> Option<u32> {
        self.entries.get(neighbor_id).map(|entry| entry.port)
    }

    /// Whether `neighbor_id` is currently adjacent
    pub fn contains(&self, neighbor_id: &NodeId) -> bool {
        self.entries.contains_key(neighbor_id)
    }

    /// Iterate over all entries in id order
    pub fn iter(&self) -> impl Iterator<Item = &NeighborEntry> {
        self.entries.values()
    }

    /// Number of neighbors
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no neighbors
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> NodeId {
        NodeId::from(s)
    }

    #[test]
    fn test_hello_adds_and_refreshes() {
        let mut table = NeighborTable::new(Duration::from_secs(60));
        let now = Instant::now();

        assert_eq!(table.on_hello(&id("B"), 1, 0, now), NeighborChange::Added);
        assert_eq!(table.on_hello(&id("B"), 1, 0, now), NeighborChange::Refreshed);
        assert_eq!(
            table.on_hello(&id("B"), 5, 0, now),
            NeighborChange::CostChanged { previous: 1 }
        );
        assert_eq!(
            table.on_hello(&id("B"), 5, 2, now),
            NeighborChange::PortChanged { previous: 0 }
        );
        assert_eq!(table.port_of(&id("B")), Some(2));
        assert_eq!(table.len(), 1);
        assert!(!NeighborChange::Refreshed.is_topology_change());
        assert!(NeighborChange::Added.is_topology_change());
    }

    #[test]
    fn test_silent_neighbor_expires() {
        let mut table = NeighborTable::new(Duration::from_secs(60));
        let t0 = Instant::now();

        table.on_hello(&id("A"), 1, 0, t0);
        table.on_hello(&id("B"), 1, 1, t0 + Duration::from_secs(30));

        assert!(table.expire_neighbors(t0 + Duration::from_secs(60)).is_empty());

        let expired = table.expire_neighbors(t0 + Duration::from_secs(61));
        assert_eq!(expired, vec![id("A")]);
        assert!(!table.contains(&id("A")));
        assert_eq!(table.list_active(), vec![NeighborInfo::new("B", 1)]);
    }

    #[test]
    fn test_list_active_sorted() {
        let mut table = NeighborTable::new(Duration::from_secs(60));
        let now = Instant::now();

        table.on_hello(&id("C"), 3, 0, now);
        table.on_hello(&id("A"), 1, 1, now);
        table.on_hello(&id("B"), 2, 2, now);

        let active = table.list_active();
        let ids: Vec<&str> = active.iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
    }
}
