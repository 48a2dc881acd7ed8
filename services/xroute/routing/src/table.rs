//! In-memory forwarding table

use crate::forwarding::{ForwardingTable, RouteInstallError};
use crate::route::{RouteEntry, RouteKey};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use xroute_wire::{NodeId, PathIndex};

/// In-memory forwarding table keyed by (destination, path index)
#[derive(Debug, Default)]
pub struct MemoryForwardingTable {
    /// Installed routes
    routes: DashMap<RouteKey, RouteEntry>,
    /// Counters for statistics
    install_counter: AtomicU64,
    replace_counter: AtomicU64,
    remove_counter: AtomicU64,
}

/// Forwarding table call counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingStats {
    /// Installs of new keys
    pub installs: u64,
    /// Installs over existing keys
    pub replacements: u64,
    /// Successful removals
    pub removals: u64,
    /// Routes currently installed
    pub total_routes: usize,
}

impl MemoryForwardingTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Get one installed route
    pub fn get(&self, destination: &NodeId, path_index: PathIndex) -> Option<RouteEntry> {
        self.routes
            .get(&(destination.clone(), path_index))
            .map(|entry| entry.value().clone())
    }

    /// All paths installed for a destination, in path index order
    pub fn paths_of(&self, destination: &NodeId) -> Vec<RouteEntry> {
        let mut paths: Vec<RouteEntry> = self
            .routes
            .iter()
            .filter(|entry| &entry.key().0 == destination)
            .map(|entry| entry.value().clone())
            .collect();
        paths.sort_by_key(|route| route.path_index);
        paths
    }

    /// Number of installed routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no route is installed
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Get call statistics
    pub fn stats(&self) -> ForwardingStats {
        ForwardingStats {
            installs: self.install_counter.load(Ordering::Relaxed),
            replacements: self.replace_counter.load(Ordering::Relaxed),
            removals: self.remove_counter.load(Ordering::Relaxed),
            total_routes: self.routes.len(),
        }
    }
}

#[async_trait]
impl ForwardingTable for MemoryForwardingTable {
    async fn install_route(&self, route: &RouteEntry) -> Result<(), RouteInstallError> {
        debug!("Installing route {}", route);
        if self.routes.insert(route.key(), route.clone()).is_some() {
            self.replace_counter.fetch_add(1, Ordering::Relaxed);
        } else {
            self.install_counter.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn remove_route(&self, destination: &NodeId, path_index: PathIndex) -> Result<(), RouteInstallError> {
        match self.routes.remove(&(destination.clone(), path_index)) {
            Some(_) => {
                debug!("Removed route to {}[{}]", destination, path_index);
                self.remove_counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            None => Err(RouteInstallError::NotFound {
                destination: destination.clone(),
                path_index,
            }),
        }
    }

    async fn list_routes(&self, prefix: Option<&str>) -> Result<Vec<RouteEntry>, RouteInstallError> {
        let mut routes: Vec<RouteEntry> = self
            .routes
            .iter()
            .filter(|entry| prefix.map_or(true, |p| entry.key().0.as_str().starts_with(p)))
            .map(|entry| entry.value().clone())
            .collect();
        routes.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(routes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::RouteFlags;

    #[tokio::test]
    async fn test_install_replace_remove() {
        let table = MemoryForwardingTable::new();
        let route = RouteEntry::new("C", "A", 0, RouteFlags::HOST);

        table.install_route(&route).await.unwrap();
        table
            .install_route(&RouteEntry::new("C", "B", 1, RouteFlags::HOST))
            .await
            .unwrap();
        assert_eq!(table.get(&NodeId::from("C"), PathIndex::PRIMARY).unwrap().next_hop, NodeId::from("B"));

        table.remove_route(&NodeId::from("C"), PathIndex::PRIMARY).await.unwrap();
        assert!(table.is_empty());

        let stats = table.stats();
        assert_eq!((stats.installs, stats.replacements, stats.removals), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_remove_missing_route() {
        let table = MemoryForwardingTable::new();
        let err = table.remove_route(&NodeId::from("C"), PathIndex(3)).await.unwrap_err();
        assert!(matches!(err, RouteInstallError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_routes_with_prefix() {
        let table = MemoryForwardingTable::new();
        for route in [
            RouteEntry::new("SID:s", "R2", 1, RouteFlags::SERVICE).with_path(PathIndex(2), 1),
            RouteEntry::new("HID:h", "R1", 0, RouteFlags::HOST),
            RouteEntry::new("SID:s", "R1", 0, RouteFlags::SERVICE).with_path(PathIndex(1), 3),
        ] {
            table.install_route(&route).await.unwrap();
        }

        let services = table.list_routes(Some("SID:")).await.unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].path_index, PathIndex(1));
        assert_eq!(table.list_routes(None).await.unwrap().len(), 3);
        assert_eq!(table.paths_of(&NodeId::from("SID:s")).len(), 2);
    }
}
