//! Control message structures exchanged between routers.

use crate::error::MessageError;
use crate::node::{NodeId, PathIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Information about a neighbor listed in a link-state advertisement
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NeighborInfo {
    /// Node ID of the neighbor
    pub node_id: NodeId,
    /// Advertised cost of the link to this neighbor
    pub cost: u32,
}

/// A service identifier bound at the originating router
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceAdvert {
    /// Anycast service identifier
    pub service_id: NodeId,
    /// Relative weight of this path among the service's paths
    pub weight: u32,
    /// Index distinguishing this path from the service's other paths
    pub path_index: PathIndex,
    /// Cost from the originator to the host serving the identifier
    pub cost: u32,
}

/// Periodic neighbor keepalive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Router or host sending the Hello
    pub sender: NodeId,
    /// Link cost the sender advertises for this adjacency
    pub cost: u32,
}

/// Link-state advertisement describing the originator's adjacencies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStateAdvertisement {
    /// Node ID that originated this advertisement
    pub originator: NodeId,
    /// Sequence number for freshness, in [0, max_seqnum)
    pub sequence_number: u32,
    /// Neighbors (routers and attached hosts) of the originator
    pub neighbors: Vec<NeighborInfo>,
    /// Service identifiers reachable through the originator
    #[serde(default)]
    pub services: Vec<ServiceAdvert>,
}

/// Service registration carried by a host join
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBinding {
    /// Service identifier the host serves
    pub service_id: NodeId,
    /// Weight of the path through this router
    pub weight: u32,
    /// Path index of the path through this router
    pub path_index: PathIndex,
}

/// A host attaching to the receiving router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostJoin {
    /// Host identifier
    pub host_id: NodeId,
    /// Cost of the access link
    pub cost: u32,
    /// Optional service identifier the host serves
    #[serde(default)]
    pub service: Option<ServiceBinding>,
}

/// One administratively configured single-path route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRouteSpec {
    /// Destination host or domain
    pub destination: NodeId,
    /// Next hop; `None` withdraws the destination's static route
    pub next_hop: Option<NodeId>,
}

/// Controller-supplied replacement of single-path routes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableUpdate {
    /// Controller that issued the update
    pub sender: NodeId,
    /// Sequence number of the controller's update stream
    pub sequence_number: u32,
    /// Routes to replace, one per destination
    pub routes: Vec<StaticRouteSpec>,
}

/// One weighted path of a service route group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePath {
    /// Next hop of the path
    pub next_hop: NodeId,
    /// Relative weight
    pub weight: u32,
    /// Path index
    pub path_index: PathIndex,
}

/// All paths of one service identifier; an empty list withdraws the group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRouteGroup {
    /// Service identifier
    pub service_id: NodeId,
    /// Paths replacing the group's current paths
    pub paths: Vec<ServicePath>,
}

/// Controller-supplied replacement of service route groups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdTableUpdate {
    /// Controller that issued the update
    pub sender: NodeId,
    /// Sequence number of the controller's service update stream
    pub sequence_number: u32,
    /// Groups to replace
    pub groups: Vec<ServiceRouteGroup>,
}

/// Any decoded control message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Neighbor keepalive
    Hello(Hello),
    /// Link-state advertisement
    Lsa(LinkStateAdvertisement),
    /// Host attachment
    HostJoin(HostJoin),
    /// Single-path table replacement
    TableUpdate(TableUpdate),
    /// Service route group replacement
    ServiceIdTableUpdate(ServiceIdTableUpdate),
}

impl NeighborInfo {
    /// Create a new neighbor info entry
    pub fn new(node_id: impl Into<NodeId>, cost: u32) -> Self {
        Self {
            node_id: node_id.into(),
            cost,
        }
    }
}

impl Hello {
    /// Create a new Hello
    pub fn new(sender: impl Into<NodeId>, cost: u32) -> Self {
        Self {
            sender: sender.into(),
            cost,
        }
    }
}

impl LinkStateAdvertisement {
    /// Create a new advertisement without service adverts
    pub fn new(originator: impl Into<NodeId>, sequence_number: u32, neighbors: Vec<NeighborInfo>) -> Self {
        Self {
            originator: originator.into(),
            sequence_number,
            neighbors,
            services: Vec::new(),
        }
    }

    /// Attach service adverts
    pub fn with_services(mut self, services: Vec<ServiceAdvert>) -> Self {
        self.services = services;
        self
    }

    /// Check structural validity against the configured sequence space
    pub fn validate(&self, max_seqnum: u32) -> Result<(), MessageError> {
        if self.originator.is_empty() {
            return Err(MessageError::EmptyId("originator"));
        }
        check_sequence(self.sequence_number, max_seqnum)?;
        for neighbor in &self.neighbors {
            if neighbor.node_id.is_empty() {
                return Err(MessageError::EmptyId("neighbor"));
            }
            if neighbor.node_id == self.originator {
                return Err(MessageError::SelfLoop(self.originator.to_string()));
            }
        }
        for service in &self.services {
            if service.service_id.is_empty() {
                return Err(MessageError::EmptyId("service"));
            }
            check_service_path(&service.service_id, service.weight, service.path_index)?;
        }
        Ok(())
    }
}

impl HostJoin {
    /// Create a plain host join
    pub fn new(host_id: impl Into<NodeId>, cost: u32) -> Self {
        Self {
            host_id: host_id.into(),
            cost,
            service: None,
        }
    }

    /// Register the host under a service identifier
    pub fn serving(mut self, service_id: impl Into<NodeId>, weight: u32, path_index: PathIndex) -> Self {
        self.service = Some(ServiceBinding {
            service_id: service_id.into(),
            weight,
            path_index,
        });
        self
    }
}

impl ControlMessage {
    /// Short name of the message kind, for logs and counters
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Hello(_) => "hello",
            ControlMessage::Lsa(_) => "lsa",
            ControlMessage::HostJoin(_) => "host_join",
            ControlMessage::TableUpdate(_) => "table_update",
            ControlMessage::ServiceIdTableUpdate(_) => "sid_table_update",
        }
    }

    /// Reject messages missing required fields or carrying out-of-range values
    pub fn validate(&self, max_seqnum: u32) -> Result<(), MessageError> {
        match self {
            ControlMessage::Hello(hello) => {
                if hello.sender.is_empty() {
                    return Err(MessageError::EmptyId("sender"));
                }
                Ok(())
            }
            ControlMessage::Lsa(lsa) => lsa.validate(max_seqnum),
            ControlMessage::HostJoin(join) => {
                if join.host_id.is_empty() {
                    return Err(MessageError::EmptyId("host"));
                }
                if let Some(binding) = &join.service {
                    if binding.service_id.is_empty() {
                        return Err(MessageError::EmptyId("service"));
                    }
                    check_service_path(&binding.service_id, binding.weight, binding.path_index)?;
                }
                Ok(())
            }
            ControlMessage::TableUpdate(update) => {
                if update.sender.is_empty() {
                    return Err(MessageError::EmptyId("sender"));
                }
                check_sequence(update.sequence_number, max_seqnum)?;
                for route in &update.routes {
                    if route.destination.is_empty() {
                        return Err(MessageError::EmptyId("destination"));
                    }
                    if route.next_hop.as_ref().is_some_and(NodeId::is_empty) {
                        return Err(MessageError::EmptyId("next hop"));
                    }
                }
                Ok(())
            }
            ControlMessage::ServiceIdTableUpdate(update) => {
                if update.sender.is_empty() {
                    return Err(MessageError::EmptyId("sender"));
                }
                check_sequence(update.sequence_number, max_seqnum)?;
                for group in &update.groups {
                    if group.service_id.is_empty() {
                        return Err(MessageError::EmptyId("service"));
                    }
                    let mut seen = HashSet::new();
                    for path in &group.paths {
                        if path.next_hop.is_empty() {
                            return Err(MessageError::EmptyId("next hop"));
                        }
                        check_service_path(&group.service_id, path.weight, path.path_index)?;
                        if !seen.insert(path.path_index) {
                            return Err(MessageError::DuplicatePathIndex {
                                destination: group.service_id.to_string(),
                                index: path.path_index.0,
                            });
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

fn check_sequence(seq: u32, max: u32) -> Result<(), MessageError> {
    if seq >= max {
        return Err(MessageError::SequenceOutOfRange { seq, max });
    }
    Ok(())
}

/// Service paths are weighted and never share the primary index with node routes
fn check_service_path(service_id: &NodeId, weight: u32, path_index: PathIndex) -> Result<(), MessageError> {
    if weight == 0 {
        return Err(MessageError::ZeroWeight(service_id.to_string()));
    }
    if path_index.is_primary() {
        return Err(MessageError::PrimaryPathIndex(service_id.to_string()));
    }
    Ok(())
}
