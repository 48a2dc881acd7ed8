//! Control loop counters

use serde::{Deserialize, Serialize};

/// Counters kept by the control loop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlStats {
    /// Hellos received
    pub hellos_received: u64,
    /// Hellos sent (periodic and replies)
    pub hellos_sent: u64,
    /// LSAs accepted
    pub lsas_accepted: u64,
    /// LSAs dropped as stale
    pub lsas_stale: u64,
    /// LSAs dropped as duplicates
    pub lsas_duplicate: u64,
    /// Own LSAs echoed back
    pub lsas_self: u64,
    /// Own LSAs originated
    pub lsas_originated: u64,
    /// LSAs reflooded
    pub lsas_flooded: u64,
    /// Host joins processed
    pub host_joins: u64,
    /// Table updates applied
    pub table_updates: u64,
    /// Table updates dropped by sequence check
    pub table_updates_stale: u64,
    /// Messages dropped as malformed
    pub malformed_messages: u64,
    /// Failed or timed-out transport sends
    pub transport_errors: u64,
    /// Failed forwarding-table operations
    pub route_install_errors: u64,
    /// Shortest-path recomputations
    pub recomputations: u64,
    /// Route synchronization cycles
    pub route_syncs: u64,
}
