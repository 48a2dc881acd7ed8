//! Network table: the derived set of paths currently believed valid.

use crate::graph::{ComputedPath, DestinationKind};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use xroute_wire::{NodeId, PathIndex};

/// One row of the network table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEntry {
    /// Destination node or service
    pub destination: NodeId,
    /// Path index
    pub path_index: PathIndex,
    /// Adjacent node to forward to
    pub next_hop: NodeId,
    /// Total path cost
    pub cost: u64,
    /// Path weight
    pub weight: u32,
    /// Destination kind
    pub kind: DestinationKind,
    /// Router whose advertisement supports the row
    pub advertiser: NodeId,
    /// Last rebuild or refresh of the row
    pub last_updated_at: Instant,
}

/// Derived table of paths, rebuilt on every recompute
#[derive(Debug)]
pub struct NetworkTable {
    entries: BTreeMap<(NodeId, PathIndex), NetworkEntry>,
    expire_after: Duration,
}

impl NetworkTable {
    /// Create an empty table expiring rows older than `expire_after`
    pub fn new(expire_after: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            expire_after,
        }
    }

    /// Replace every row with freshly computed paths
    pub fn rebuild(&mut self, paths: Vec<ComputedPath>, now: Instant) {
        self.entries = paths
            .into_iter()
            .map(|path| {
                (
                    (path.destination.clone(), path.path_index),
                    NetworkEntry {
                        destination: path.destination,
                        path_index: path.path_index,
                        next_hop: path.next_hop,
                        cost: path.cost,
                        weight: path.weight,
                        kind: path.kind,
                        advertiser: path.advertiser,
                        last_updated_at: now,
                    },
                )
            })
            .collect();
        debug!("Network table rebuilt with {} entries", self.entries.len());
    }

    /// Refresh rows supported by `advertiser`; returns how many were touched
    pub fn refresh_advertiser(&mut self, advertiser: &NodeId, now: Instant) -> usize {
        let mut touched = 0;
        for entry in self.entries.values_mut() {
            if &entry.advertiser == advertiser {
                entry.last_updated_at = now;
                touched += 1;
            }
        }
        touched
    }

    /// Refresh the direct row (and local service rows) of an adjacent node
    pub fn refresh_direct(&mut self, local: &NodeId, neighbor: &NodeId, now: Instant) {
        for entry in self.entries.values_mut() {
            if &entry.advertiser == local && &entry.next_hop == neighbor {
                entry.last_updated_at = now;
            }
        }
    }

    /// Drop rows not refreshed within the expiry time
    pub fn expire(&mut self, now: Instant) -> Vec<(NodeId, PathIndex)> {
        let expire_after = self.expire_after;
        let expired: Vec<(NodeId, PathIndex)> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_updated_at) > expire_after)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.entries.remove(key);
        }
        if !expired.is_empty() {
            info!("Expired {} network table entries", expired.len());
        }
        expired
    }

    /// Look up one row
    pub fn get(&self, destination: &NodeId, path_index: PathIndex) -> Option<&NetworkEntry> {
        self.entries.get(&(destination.clone(), path_index))
    }

    /// All rows in (destination, path index) order
    pub fn entries(&self) -> impl Iterator<Item = &NetworkEntry> {
        self.entries.values()
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(dest: &str, next_hop: &str, advertiser: &str) -> ComputedPath {
        ComputedPath {
            destination: NodeId::from(dest),
            next_hop: NodeId::from(next_hop),
            cost: 2,
            hop_count: 2,
            path_index: PathIndex::PRIMARY,
            weight: 1,
            kind: DestinationKind::Host,
            advertiser: NodeId::from(advertiser),
        }
    }

    #[test]
    fn test_rebuild_replaces_rows() {
        let mut table = NetworkTable::new(Duration::from_secs(120));
        let now = Instant::now();

        table.rebuild(vec![path("C", "A", "A"), path("D", "A", "A")], now);
        assert_eq!(table.len(), 2);

        table.rebuild(vec![path("C", "B", "B")], now);
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.get(&NodeId::from("C"), PathIndex::PRIMARY).unwrap().next_hop,
            NodeId::from("B")
        );
    }

    #[test]
    fn test_unrefreshed_rows_expire() {
        let mut table = NetworkTable::new(Duration::from_secs(120));
        let t0 = Instant::now();

        table.rebuild(vec![path("C", "A", "A"), path("D", "B", "B"), path("B", "B", "R")], t0);
        assert_eq!(table.refresh_advertiser(&NodeId::from("A"), t0 + Duration::from_secs(100)), 1);
        table.refresh_direct(&NodeId::from("R"), &NodeId::from("B"), t0 + Duration::from_secs(100));

        let expired = table.expire(t0 + Duration::from_secs(121));
        assert_eq!(expired, vec![(NodeId::from("D"), PathIndex::PRIMARY)]);
        assert_eq!(table.len(), 2);
    }
}
