//! Topology graph built from the link-state database and shortest-path computation.
//!
//! The graph is directed: every stored record contributes its originator's
//! advertised adjacencies, and the local router's own adjacencies come from the
//! neighbor table. Paths are computed with Dijkstra over the label
//! `(cost, first_hop)`, so among equal-cost paths the one leaving through the
//! lexicographically smaller neighbor wins. Labels only grow along an edge, so
//! the usual settle-once argument still holds and the result does not depend on
//! map iteration order.

use crate::link_state::LinkStateDatabase;
use crate::neighbor::NeighborTable;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use tracing::debug;
use xroute_wire::{NodeId, PathIndex, ServiceAdvert};

/// What kind of destination a computed path leads to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DestinationKind {
    /// A router that originates advertisements
    Router,
    /// A leaf that is only ever advertised by others
    Host,
    /// An anycast service identifier
    Service,
}

/// A service identifier served by a host attached to the local router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalService {
    /// Service identifier
    pub service_id: NodeId,
    /// Attached host serving it
    pub host_id: NodeId,
    /// Weight of the path through this router
    pub weight: u32,
    /// Path index of the path through this router
    pub path_index: PathIndex,
}

/// Computed path from the local router to one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedPath {
    /// Destination node or service
    pub destination: NodeId,
    /// Adjacent node to forward to
    pub next_hop: NodeId,
    /// Total cost to reach the destination
    pub cost: u64,
    /// Number of hops to the destination
    pub hop_count: u32,
    /// Path index (primary for routers and hosts)
    pub path_index: PathIndex,
    /// Path weight (1 for routers and hosts)
    pub weight: u32,
    /// Destination kind
    pub kind: DestinationKind,
    /// Router whose advertisement supports the last edge
    pub advertiser: NodeId,
}

#[derive(Debug, Clone)]
struct ResolvedLocalService {
    service: LocalService,
    cost: u32,
}

/// Directed weighted graph of the known topology
#[derive(Debug, Clone)]
pub struct TopologyGraph {
    local: NodeId,
    edges: BTreeMap<NodeId, Vec<(NodeId, u32)>>,
    routers: BTreeSet<NodeId>,
    remote_services: Vec<(NodeId, ServiceAdvert)>,
    local_services: Vec<ResolvedLocalService>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Label {
    cost: u64,
    first_hop: NodeId,
    hops: u32,
    via: NodeId,
}

impl TopologyGraph {
    /// Build the graph from the current neighbor table and database
    pub fn build(
        local: &NodeId,
        neighbors: &NeighborTable,
        lsdb: &LinkStateDatabase,
        local_services: &[LocalService],
    ) -> Self {
        let mut edges: BTreeMap<NodeId, Vec<(NodeId, u32)>> = BTreeMap::new();
        let mut routers = BTreeSet::new();
        let mut remote_services = Vec::new();

        edges.insert(
            local.clone(),
            neighbors
                .iter()
                .map(|entry| (entry.neighbor_id.clone(), entry.link_cost))
                .collect(),
        );

        for record in lsdb.records() {
            if &record.originator == local {
                continue;
            }
            routers.insert(record.originator.clone());
            edges.insert(
                record.originator.clone(),
                record
                    .neighbors
                    .iter()
                    .map(|neighbor| (neighbor.node_id.clone(), neighbor.cost))
                    .collect(),
            );
            for service in &record.services {
                remote_services.push((record.originator.clone(), service.clone()));
            }
        }

        let local_services = local_services
            .iter()
            .filter_map(|service| {
                neighbors.get(&service.host_id).map(|entry| ResolvedLocalService {
                    service: service.clone(),
                    cost: entry.link_cost,
                })
            })
            .collect();

        Self {
            local: local.clone(),
            edges,
            routers,
            remote_services,
            local_services,
        }
    }

    /// Number of vertices with outgoing edges
    pub fn router_count(&self) -> usize {
        self.edges.len()
    }

    /// Compute the best path to every reachable destination, sorted by (destination, path index)
    pub fn shortest_paths(&self) -> Vec<ComputedPath> {
        let settled = self.dijkstra();

        let mut paths: BTreeMap<(NodeId, PathIndex), ComputedPath> = BTreeMap::new();

        for (node, label) in &settled {
            let kind = if self.routers.contains(node) {
                DestinationKind::Router
            } else {
                DestinationKind::Host
            };
            paths.insert(
                (node.clone(), PathIndex::PRIMARY),
                ComputedPath {
                    destination: node.clone(),
                    next_hop: label.first_hop.clone(),
                    cost: label.cost,
                    hop_count: label.hops,
                    path_index: PathIndex::PRIMARY,
                    weight: 1,
                    kind,
                    advertiser: label.via.clone(),
                },
            );
        }

        let mut service_paths = Vec::new();
        for resolved in &self.local_services {
            service_paths.push(ComputedPath {
                destination: resolved.service.service_id.clone(),
                next_hop: resolved.service.host_id.clone(),
                cost: u64::from(resolved.cost),
                hop_count: 1,
                path_index: resolved.service.path_index,
                weight: resolved.service.weight,
                kind: DestinationKind::Service,
                advertiser: self.local.clone(),
            });
        }
        for (advertiser, advert) in &self.remote_services {
            let Some(label) = settled.get(advertiser) else {
                continue;
            };
            service_paths.push(ComputedPath {
                destination: advert.service_id.clone(),
                next_hop: label.first_hop.clone(),
                cost: label.cost.saturating_add(u64::from(advert.cost)),
                hop_count: label.hops + 1,
                path_index: advert.path_index,
                weight: advert.weight,
                kind: DestinationKind::Service,
                advertiser: advertiser.clone(),
            });
        }

        for path in service_paths {
            let key = (path.destination.clone(), path.path_index);
            let replace = paths.get(&key).map_or(true, |existing| {
                (path.cost, &path.next_hop) < (existing.cost, &existing.next_hop)
            });
            if replace {
                paths.insert(key, path);
            }
        }

        debug!("Computed {} paths from {}", paths.len(), self.local);
        paths.into_values().collect()
    }

    fn dijkstra(&self) -> BTreeMap<NodeId, Label> {
        let mut settled: BTreeMap<NodeId, Label> = BTreeMap::new();
        let mut best: BTreeMap<NodeId, (u64, NodeId)> = BTreeMap::new();
        let mut heap: BinaryHeap<Reverse<(u64, NodeId, NodeId, u32, NodeId)>> = BinaryHeap::new();

        if let Some(local_edges) = self.edges.get(&self.local) {
            for (neighbor, cost) in local_edges {
                if neighbor == &self.local {
                    continue;
                }
                let candidate = (u64::from(*cost), neighbor.clone());
                if best.get(neighbor).map_or(true, |known| candidate < *known) {
                    best.insert(neighbor.clone(), candidate);
                    heap.push(Reverse((
                        u64::from(*cost),
                        neighbor.clone(),
                        neighbor.clone(),
                        1,
                        self.local.clone(),
                    )));
                }
            }
        }

        while let Some(Reverse((cost, first_hop, node, hops, via))) = heap.pop() {
            if settled.contains_key(&node) {
                continue;
            }
            settled.insert(
                node.clone(),
                Label {
                    cost,
                    first_hop: first_hop.clone(),
                    hops,
                    via,
                },
            );

            let Some(out_edges) = self.edges.get(&node) else {
                continue;
            };
            for (next, weight) in out_edges {
                if next == &self.local || settled.contains_key(next) {
                    continue;
                }
                let candidate = (cost.saturating_add(u64::from(*weight)), first_hop.clone());
                if best.get(next).map_or(true, |known| candidate < *known) {
                    best.insert(next.clone(), candidate.clone());
                    heap.push(Reverse((candidate.0, candidate.1, next.clone(), hops + 1, node.clone())));
                }
            }
        }

        settled
    }
}
