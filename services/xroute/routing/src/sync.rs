//! Incremental synchronization of computed routes into the forwarding table.
//!
//! The synchronizer keeps a mirror of what it believes is installed. Each cycle
//! diffs the desired set against that mirror per `(destination, path_index)`
//! and emits the smallest batch of operations closing the gap. The batch is
//! complete before the first call goes out. Operations that fail leave the
//! mirror untouched, so the same difference shows up again on the next cycle.

use crate::forwarding::{ForwardingTable, RouteInstallError};
use crate::route::{RouteEntry, RouteKey, RouteOp};
use crate::statics::StaticRoutes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use xroute_topology::{NeighborTable, NetworkTable};

/// Desired route set for one synchronization cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredRoutes {
    routes: BTreeMap<RouteKey, RouteEntry>,
}

impl DesiredRoutes {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes for every network table row whose next hop is adjacent, with static routes layered on top
    pub fn build(network: &NetworkTable, neighbors: &NeighborTable, statics: &StaticRoutes) -> Self {
        let mut desired = Self::new();
        for entry in network.entries() {
            match neighbors.port_of(&entry.next_hop) {
                Some(port) => desired.insert(RouteEntry::from_network_entry(entry, port)),
                None => debug!(
                    "Skipping {}[{}]: next hop {} is not adjacent",
                    entry.destination, entry.path_index, entry.next_hop
                ),
            }
        }
        for route in statics.iter() {
            if let Some(resolved) = route.resolve(neighbors) {
                desired.insert(resolved);
            }
        }
        desired
    }

    /// Add or replace a route
    pub fn insert(&mut self, route: RouteEntry) {
        self.routes.insert(route.key(), route);
    }

    /// Number of routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl FromIterator<RouteEntry> for DesiredRoutes {
    fn from_iter<T: IntoIterator<Item = RouteEntry>>(iter: T) -> Self {
        let mut desired = Self::new();
        for route in iter {
            desired.insert(route);
        }
        desired
    }
}

/// Outcome of applying one batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Routes installed under new keys
    pub installed: usize,
    /// Routes replaced
    pub updated: usize,
    /// Routes removed
    pub removed: usize,
    /// Operations that failed and will be retried next cycle
    pub failed: usize,
}

impl SyncReport {
    /// Whether the batch changed nothing and nothing failed
    pub fn is_noop(&self) -> bool {
        self.installed == 0 && self.updated == 0 && self.removed == 0 && self.failed == 0
    }
}

/// Mirror of installed routes plus the diff/apply logic
#[derive(Debug, Default)]
pub struct RouteSynchronizer {
    installed: BTreeMap<RouteKey, RouteEntry>,
}

impl RouteSynchronizer {
    /// Synchronizer that assumes nothing is installed
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronizer adopting routes already present in the forwarding table
    pub fn with_installed(routes: Vec<RouteEntry>) -> Self {
        Self {
            installed: routes.into_iter().map(|route| (route.key(), route)).collect(),
        }
    }

    /// Routes believed installed
    pub fn installed(&self) -> impl Iterator<Item = &RouteEntry> {
        self.installed.values()
    }

    /// Number of routes believed installed
    pub fn installed_len(&self) -> usize {
        self.installed.len()
    }

    /// Minimal ordered batch turning the installed set into `desired`:
    /// removals, then updates, then installs, each in key order.
    pub fn diff(&self, desired: &DesiredRoutes) -> Vec<RouteOp> {
        let mut removes = Vec::new();
        let mut updates = Vec::new();
        let mut installs = Vec::new();

        for (key, installed) in &self.installed {
            if !desired.routes.contains_key(key) {
                removes.push(RouteOp::Remove {
                    destination: installed.destination.clone(),
                    path_index: installed.path_index,
                });
            }
        }

        for (key, route) in &desired.routes {
            match self.installed.get(key) {
                Some(installed) if installed == route => {}
                Some(installed) => updates.push(RouteOp::Update {
                    previous: installed.clone(),
                    route: route.clone(),
                }),
                None => installs.push(RouteOp::Install(route.clone())),
            }
        }

        removes.extend(updates);
        removes.extend(installs);
        removes
    }

    /// Push a batch to the forwarding table, each call bounded by `call_timeout`
    pub async fn apply(
        &mut self,
        ops: Vec<RouteOp>,
        table: &dyn ForwardingTable,
        call_timeout: Duration,
    ) -> SyncReport {
        let mut report = SyncReport::default();

        for op in ops {
            let result = match &op {
                RouteOp::Install(route) | RouteOp::Update { route, .. } => {
                    bounded(call_timeout, table.install_route(route)).await
                }
                RouteOp::Remove { destination, path_index } => {
                    match bounded(call_timeout, table.remove_route(destination, *path_index)).await {
                        // Already gone is what we wanted
                        Err(RouteInstallError::NotFound { .. }) => Ok(()),
                        other => other,
                    }
                }
            };

            match result {
                Ok(()) => match op {
                    RouteOp::Install(route) => {
                        report.installed += 1;
                        self.installed.insert(route.key(), route);
                    }
                    RouteOp::Update { route, .. } => {
                        report.updated += 1;
                        self.installed.insert(route.key(), route);
                    }
                    RouteOp::Remove { destination, path_index } => {
                        report.removed += 1;
                        self.installed.remove(&(destination, path_index));
                    }
                },
                Err(e) => {
                    let (destination, path_index) = op.key();
                    warn!(
                        "Forwarding table rejected operation on {}[{}]: {} (retrying next cycle)",
                        destination, path_index, e
                    );
                    report.failed += 1;
                }
            }
        }

        if !report.is_noop() {
            info!(
                "Route sync: {} installed, {} updated, {} removed, {} failed",
                report.installed, report.updated, report.removed, report.failed
            );
        }
        report
    }

    /// Diff against `desired` and apply the result
    pub async fn synchronize(
        &mut self,
        desired: &DesiredRoutes,
        table: &dyn ForwardingTable,
        call_timeout: Duration,
    ) -> SyncReport {
        let ops = self.diff(desired);
        if ops.is_empty() {
            return SyncReport::default();
        }
        self.apply(ops, table, call_timeout).await
    }
}

async fn bounded<F>(limit: Duration, call: F) -> Result<(), RouteInstallError>
where
    F: std::future::Future<Output = Result<(), RouteInstallError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RouteInstallError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::RouteFlags;
    use crate::table::MemoryForwardingTable;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use xroute_wire::{NodeId, PathIndex};

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn host(dest: &str, next_hop: &str, port: u32) -> RouteEntry {
        RouteEntry::new(dest, next_hop, port, RouteFlags::HOST)
    }

    fn service(next_hop: &str, port: u32, index: u32, weight: u32) -> RouteEntry {
        RouteEntry::new("SID:s", next_hop, port, RouteFlags::SERVICE).with_path(PathIndex(index), weight)
    }

    /// Forwarding table that rejects installs while `failing` is set
    #[derive(Default)]
    struct FlakyTable {
        inner: MemoryForwardingTable,
        failing: AtomicBool,
    }

    #[async_trait]
    impl ForwardingTable for FlakyTable {
        async fn install_route(&self, route: &RouteEntry) -> Result<(), RouteInstallError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(RouteInstallError::Rejected("busy".to_string()));
            }
            self.inner.install_route(route).await
        }

        async fn remove_route(&self, destination: &NodeId, path_index: PathIndex) -> Result<(), RouteInstallError> {
            self.inner.remove_route(destination, path_index).await
        }

        async fn list_routes(&self, prefix: Option<&str>) -> Result<Vec<RouteEntry>, RouteInstallError> {
            self.inner.list_routes(prefix).await
        }
    }

    #[test]
    fn test_diff_orders_remove_update_install() {
        let sync = RouteSynchronizer::with_installed(vec![host("A", "A", 0), host("B", "B", 1), host("C", "A", 0)]);
        let desired: DesiredRoutes = vec![host("A", "A", 0), host("C", "B", 1), host("D", "B", 1)]
            .into_iter()
            .collect();

        let ops = sync.diff(&desired);
        assert_eq!(
            ops,
            vec![
                RouteOp::Remove { destination: NodeId::from("B"), path_index: PathIndex::PRIMARY },
                RouteOp::Update { previous: host("C", "A", 0), route: host("C", "B", 1) },
                RouteOp::Install(host("D", "B", 1)),
            ]
        );
    }

    #[test]
    fn test_equal_sets_emit_nothing() {
        let routes = vec![host("A", "A", 0), service("R1", 0, 1, 3), service("R2", 1, 2, 1)];
        let sync = RouteSynchronizer::with_installed(routes.clone());
        let desired: DesiredRoutes = routes.into_iter().collect();

        assert!(sync.diff(&desired).is_empty());
    }

    #[test]
    fn test_multipath_group_keeps_surviving_paths() {
        let sync = RouteSynchronizer::with_installed(vec![service("R1", 0, 1, 3), service("R2", 1, 2, 1)]);
        let desired: DesiredRoutes = vec![service("R1", 0, 1, 3)].into_iter().collect();

        assert_eq!(
            sync.diff(&desired),
            vec![RouteOp::Remove { destination: NodeId::from("SID:s"), path_index: PathIndex(2) }]
        );
    }

    #[tokio::test]
    async fn test_apply_updates_mirror_and_table() {
        let table = MemoryForwardingTable::new();
        let mut sync = RouteSynchronizer::new();
        let desired: DesiredRoutes = vec![host("C", "A", 0), service("R1", 0, 1, 3), service("R2", 1, 2, 1)]
            .into_iter()
            .collect();

        let report = sync.synchronize(&desired, &table, TIMEOUT).await;
        assert_eq!(report, SyncReport { installed: 3, updated: 0, removed: 0, failed: 0 });
        assert_eq!(table.len(), 3);
        assert_eq!(sync.installed_len(), 3);

        let again = sync.synchronize(&desired, &table, TIMEOUT).await;
        assert!(again.is_noop());
        assert_eq!(table.stats().installs, 3);
    }

    #[tokio::test]
    async fn test_failed_install_retried_next_cycle() {
        let table = FlakyTable::default();
        table.failing.store(true, Ordering::SeqCst);
        let mut sync = RouteSynchronizer::new();
        let desired: DesiredRoutes = vec![host("C", "A", 0)].into_iter().collect();

        let report = sync.synchronize(&desired, &table, TIMEOUT).await;
        assert_eq!(report.failed, 1);
        assert_eq!(sync.installed_len(), 0);

        table.failing.store(false, Ordering::SeqCst);
        let report = sync.synchronize(&desired, &table, TIMEOUT).await;
        assert_eq!(report.installed, 1);
        assert_eq!(table.inner.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_of_missing_route_counts_as_done() {
        let table = MemoryForwardingTable::new();
        let mut sync = RouteSynchronizer::with_installed(vec![host("C", "A", 0)]);

        let report = sync.synchronize(&DesiredRoutes::new(), &table, TIMEOUT).await;
        assert_eq!(report.removed, 1);
        assert_eq!(sync.installed_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_forwarding_table_times_out() {
        struct StuckTable;

        #[async_trait]
        impl ForwardingTable for StuckTable {
            async fn install_route(&self, _route: &RouteEntry) -> Result<(), RouteInstallError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }

            async fn remove_route(&self, _d: &NodeId, _p: PathIndex) -> Result<(), RouteInstallError> {
                Ok(())
            }

            async fn list_routes(&self, _prefix: Option<&str>) -> Result<Vec<RouteEntry>, RouteInstallError> {
                Ok(Vec::new())
            }
        }

        let mut sync = RouteSynchronizer::new();
        let desired: DesiredRoutes = vec![host("C", "A", 0)].into_iter().collect();
        let report = sync.synchronize(&desired, &StuckTable, TIMEOUT).await;

        assert_eq!(report.failed, 1);
        assert_eq!(sync.installed_len(), 0);
    }
}
