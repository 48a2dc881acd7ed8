//! Forwarding-table collaborator contract

use crate::route::RouteEntry;
use async_trait::async_trait;
use thiserror::Error;
use xroute_wire::{NodeId, PathIndex};

/// Errors reported by the forwarding element
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteInstallError {
    /// The forwarding element refused the operation
    #[error("route rejected: {0}")]
    Rejected(String),
    /// No route under the given key
    #[error("no route for {destination}[{path_index}]")]
    NotFound {
        /// Destination
        destination: NodeId,
        /// Path index
        path_index: PathIndex,
    },
    /// The call did not complete in time
    #[error("forwarding table call timed out")]
    Timeout,
    /// The forwarding element cannot be reached
    #[error("forwarding table unavailable: {0}")]
    Unavailable(String),
}

/// Forwarding element consuming computed routes.
///
/// Installing over an existing `(destination, path_index)` replaces it; that is
/// how updates are expressed.
#[async_trait]
pub trait ForwardingTable: Send + Sync {
    /// Install or replace a route
    async fn install_route(&self, route: &RouteEntry) -> Result<(), RouteInstallError>;

    /// Remove one path of a destination
    async fn remove_route(&self, destination: &NodeId, path_index: PathIndex) -> Result<(), RouteInstallError>;

    /// List installed routes, optionally only destinations starting with `prefix`
    async fn list_routes(&self, prefix: Option<&str>) -> Result<Vec<RouteEntry>, RouteInstallError>;
}
