//! Link-state database: the freshest advertisement of every originator.

use crate::sequence::SequenceTracker;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use xroute_wire::{NeighborInfo, NodeId, ServiceAdvert};

/// Stored advertisement of one originator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStateRecord {
    /// Originating router
    pub originator: NodeId,
    /// Sequence number of the stored advertisement
    pub sequence_number: u32,
    /// Advertised adjacencies, sorted by neighbor id
    pub neighbors: Vec<NeighborInfo>,
    /// Advertised service bindings, sorted
    pub services: Vec<ServiceAdvert>,
    /// When the advertisement was accepted
    pub received_at: Instant,
}

/// Result of offering an advertisement to the database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LsaDisposition {
    /// Stored; `topology_changed` when adjacencies or services differ from the prior record
    Accepted {
        /// Whether a recompute is needed
        topology_changed: bool,
    },
    /// Older than (or too far from) the stored sequence number
    Stale,
    /// Same sequence number as the stored record
    Duplicate,
    /// Carries the local router's id; never stored
    SelfOriginated {
        /// The echo is ahead of our own counter, so the counter was moved past it
        counter_advanced: bool,
    },
}

/// Link-state topology database
#[derive(Debug)]
pub struct LinkStateDatabase {
    /// Local router ID
    local_node_id: NodeId,
    /// Freshest record per originator
    records: HashMap<NodeId, LinkStateRecord>,
    /// Sequence freshness per originator
    sequences: SequenceTracker,
    /// Records not refreshed within this time are removed
    expire_after: Duration,
    /// Sequence number of the last locally originated advertisement
    last_originated: Option<u32>,
}

// Include implementation
mod database;
pub use database::LsdbStats;
