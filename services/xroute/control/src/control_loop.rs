//! The router's control task.
//!
//! One [`ControlLoop`] owns every routing table. Timers and inbound messages
//! are serialized through a single `tokio::select!`, so each event runs to
//! completion against a consistent view of the tables and no locks are taken.

use crate::config::RouterConfig;
use crate::error::{ControlError, TransportError};
use crate::stats::ControlStats;
use crate::transport::{ControlTransport, InboundMessage, Outbound};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, info, warn};
use xroute_routing::{DesiredRoutes, ForwardingTable, RouteEntry, RouteSynchronizer, StaticRoute, StaticRoutes};
use xroute_topology::{
    Freshness, LinkStateDatabase, LocalService, LsaDisposition, NeighborChange, NeighborTable, NetworkTable,
    SequenceTracker, TopologyGraph,
};
use xroute_wire::{
    ControlMessage, Hello, HostJoin, LinkStateAdvertisement, NodeId, ServiceAdvert, ServiceIdTableUpdate, TableUpdate,
};

/// Lifecycle of a control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Created, not yet started
    Idle,
    /// Serving timers and messages
    Running,
    /// Stopped or stopping; no further message is processed
    ShuttingDown,
}

/// Link-state control loop of one router
pub struct ControlLoop {
    config: RouterConfig,
    local: NodeId,
    transport: Arc<dyn ControlTransport>,
    forwarding: Arc<dyn ForwardingTable>,
    state: LoopState,

    neighbors: NeighborTable,
    lsdb: LinkStateDatabase,
    network: NetworkTable,
    statics: StaticRoutes,
    /// Service bindings of attached hosts, keyed by host
    local_services: BTreeMap<NodeId, LocalService>,
    table_sequences: SequenceTracker,
    service_table_sequences: SequenceTracker,
    synchronizer: RouteSynchronizer,
    /// Last sync left failed operations behind
    sync_pending: bool,

    last_lsa_at: Option<Instant>,
    next_lsa_at: Instant,
    stats: ControlStats,
}

impl ControlLoop {
    /// Create an idle loop with empty tables
    pub fn new(
        config: RouterConfig,
        transport: Arc<dyn ControlTransport>,
        forwarding: Arc<dyn ForwardingTable>,
    ) -> Result<Self, ControlError> {
        config.validate()?;
        let local = config.node_id();
        let sequences = || SequenceTracker::new(config.max_seqnum, config.seqnum_window, config.lsa_expire());

        Ok(Self {
            local: local.clone(),
            transport,
            forwarding,
            state: LoopState::Idle,
            neighbors: NeighborTable::new(config.neighbor_expire()),
            lsdb: LinkStateDatabase::new(local, sequences(), config.lsa_expire()),
            network: NetworkTable::new(config.route_expire()),
            statics: StaticRoutes::new(),
            local_services: BTreeMap::new(),
            table_sequences: sequences(),
            service_table_sequences: sequences(),
            synchronizer: RouteSynchronizer::new(),
            sync_pending: false,
            last_lsa_at: None,
            next_lsa_at: Instant::now() + config.lsa_interval(),
            stats: ControlStats::default(),
            config,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Counters
    pub fn stats(&self) -> &ControlStats {
        &self.stats
    }

    /// Local router id
    pub fn node_id(&self) -> &NodeId {
        &self.local
    }

    /// Neighbor table
    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    /// Link-state database
    pub fn lsdb(&self) -> &LinkStateDatabase {
        &self.lsdb
    }

    /// Network table
    pub fn network(&self) -> &NetworkTable {
        &self.network
    }

    /// Routes believed installed in the forwarding table
    pub fn installed_routes(&self) -> Vec<RouteEntry> {
        self.synchronizer.installed().cloned().collect()
    }

    /// When the next LSA is due
    pub fn next_lsa_at(&self) -> Instant {
        self.next_lsa_at
    }

    /// Start the transport, adopt the forwarding table's routes and serve
    /// events until `shutdown` resolves or the inbound channel closes.
    pub async fn run<S>(&mut self, mut inbound: mpsc::Receiver<InboundMessage>, shutdown: S) -> Result<(), ControlError>
    where
        S: Future<Output = ()>,
    {
        self.start().await?;

        let start = clock();
        self.next_lsa_at = start + self.config.lsa_interval();

        let mut hello_timer = tokio::time::interval(self.config.hello_interval());
        hello_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let aging_interval = self.config.aging_interval();
        let mut aging_timer = tokio::time::interval_at(tokio::time::Instant::now() + aging_interval, aging_interval);
        aging_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let result = loop {
            let lsa_deadline = tokio::time::Instant::from_std(self.next_lsa_at);
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested for {}", self.local);
                    break Ok(());
                }
                _ = hello_timer.tick() => self.on_hello_timer().await,
                _ = tokio::time::sleep_until(lsa_deadline) => self.on_lsa_timer(clock()).await,
                _ = aging_timer.tick() => self.on_aging_timer(clock()).await,
                received = inbound.recv() => match received {
                    Some(message) => self.handle_inbound(message, clock()).await,
                    None => {
                        warn!("Inbound control channel closed while running");
                        break Err(ControlError::TransportExhausted);
                    }
                },
            }
        };

        self.state = LoopState::ShuttingDown;
        match timeout(self.config.io_timeout(), self.transport.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to stop control transport: {}", e),
            Err(_) => warn!("Stopping control transport timed out"),
        }
        info!("Control loop for {} stopped", self.local);
        result
    }

    async fn start(&mut self) -> Result<(), ControlError> {
        if self.state != LoopState::Idle {
            return Err(ControlError::AlreadyStarted);
        }
        let io_timeout = self.config.io_timeout();

        match timeout(io_timeout, self.transport.start()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ControlError::Startup(e)),
            Err(_) => return Err(ControlError::Startup(TransportError::Timeout)),
        }

        match timeout(io_timeout, self.forwarding.list_routes(None)).await {
            Ok(Ok(routes)) => {
                info!("Adopting {} routes already in the forwarding table", routes.len());
                self.synchronizer = RouteSynchronizer::with_installed(routes);
            }
            Ok(Err(e)) => warn!("Could not list installed routes, assuming none: {}", e),
            Err(_) => warn!("Listing installed routes timed out, assuming none"),
        }

        self.state = LoopState::Running;
        info!("Control loop running as {}", self.local);
        Ok(())
    }

    /// Process one received message
    pub async fn handle_inbound(&mut self, inbound: InboundMessage, now: Instant) {
        if self.state == LoopState::ShuttingDown {
            return;
        }
        if let Err(e) = inbound.message.validate(self.config.max_seqnum) {
            self.stats.malformed_messages += 1;
            warn!("Dropping malformed {} from {}: {}", inbound.message.kind(), inbound.from, e);
            return;
        }
        if let ControlMessage::HostJoin(join) = &inbound.message {
            let bound_to_local = join.service.as_ref().is_some_and(|binding| binding.service_id == self.local);
            if join.host_id == self.local || bound_to_local {
                self.stats.malformed_messages += 1;
                warn!("Dropping host join from {} claiming local id {}", inbound.from, self.local);
                return;
            }
        }
        debug!("Received {} from {} on port {}", inbound.message.kind(), inbound.from, inbound.port);

        let InboundMessage { from, port, message } = inbound;
        match message {
            ControlMessage::Hello(hello) => self.on_hello(hello, port, now).await,
            ControlMessage::Lsa(lsa) => self.on_lsa(lsa, from, now).await,
            ControlMessage::HostJoin(join) => self.on_host_join(join, port, now).await,
            ControlMessage::TableUpdate(update) => self.on_table_update(update, now).await,
            ControlMessage::ServiceIdTableUpdate(update) => self.on_service_table_update(update, now).await,
        }
    }

    /// Periodic Hello to every neighbor
    pub async fn on_hello_timer(&mut self) {
        let hello = self.hello();
        if self.send(Outbound::Flood { except: None }, hello).await {
            self.stats.hellos_sent += 1;
        }
    }

    /// Originate and flood the local LSA
    pub async fn on_lsa_timer(&mut self, now: Instant) {
        let services = self.advertised_services();
        let lsa = self.lsdb.originate(self.neighbors.list_active(), services);
        debug!(
            "Originating LSA seq {} ({} neighbors, {} services)",
            lsa.sequence_number,
            lsa.neighbors.len(),
            lsa.services.len()
        );

        self.stats.lsas_originated += 1;
        self.last_lsa_at = Some(now);
        self.next_lsa_at = now + self.config.lsa_interval();
        self.send(Outbound::Flood { except: None }, ControlMessage::Lsa(lsa)).await;
    }

    /// Expire soft state and react to whatever went away
    pub async fn on_aging_timer(&mut self, now: Instant) {
        let lost = self.neighbors.expire_neighbors(now);
        for neighbor in &lost {
            if let Some(service) = self.local_services.remove(neighbor) {
                info!("Dropping binding of {} with departed host {}", service.service_id, neighbor);
            }
        }
        let aged = self.lsdb.age_out(now);
        let expired = self.network.expire(now);
        self.table_sequences.prune(now);
        self.service_table_sequences.prune(now);

        if !lost.is_empty() {
            info!("Neighbors expired: {:?}", lost);
            self.request_lsa(now);
        }
        if !lost.is_empty() || !aged.is_empty() {
            self.recompute(now).await;
        } else if !expired.is_empty() || self.sync_pending {
            self.resync().await;
        }

        debug!(stats = ?self.stats, "Control loop counters");
    }

    async fn on_hello(&mut self, hello: Hello, port: u32, now: Instant) {
        if hello.sender == self.local {
            debug!("Ignoring own Hello");
            return;
        }
        self.stats.hellos_received += 1;

        let change = self.neighbors.on_hello(&hello.sender, hello.cost, port, now);
        self.network.refresh_direct(&self.local, &hello.sender, now);

        if change == NeighborChange::Added {
            info!("New neighbor {} on port {} (cost {})", hello.sender, port, hello.cost);
            self.greet(&hello.sender).await;
        }
        if change.is_topology_change() {
            self.recompute(now).await;
            self.request_lsa(now);
        }
    }

    async fn on_lsa(&mut self, lsa: LinkStateAdvertisement, from: NodeId, now: Instant) {
        match self.lsdb.accept(&lsa, now) {
            LsaDisposition::Accepted { topology_changed } => {
                self.stats.lsas_accepted += 1;
                self.network.refresh_advertiser(&lsa.originator, now);
                if self
                    .send(Outbound::Flood { except: Some(from) }, ControlMessage::Lsa(lsa))
                    .await
                {
                    self.stats.lsas_flooded += 1;
                }
                if topology_changed {
                    self.recompute(now).await;
                }
            }
            LsaDisposition::Stale => self.stats.lsas_stale += 1,
            LsaDisposition::Duplicate => self.stats.lsas_duplicate += 1,
            LsaDisposition::SelfOriginated { counter_advanced } => {
                self.stats.lsas_self += 1;
                if counter_advanced {
                    self.request_lsa(now);
                }
            }
        }
    }

    async fn on_host_join(&mut self, join: HostJoin, port: u32, now: Instant) {
        self.stats.host_joins += 1;

        let change = self.neighbors.on_hello(&join.host_id, join.cost, port, now);
        self.network.refresh_direct(&self.local, &join.host_id, now);

        let service_changed = match join.service {
            Some(binding) => {
                let service = LocalService {
                    service_id: binding.service_id,
                    host_id: join.host_id.clone(),
                    weight: binding.weight,
                    path_index: binding.path_index,
                };
                self.local_services.insert(join.host_id.clone(), service.clone()) != Some(service)
            }
            None => self.local_services.remove(&join.host_id).is_some(),
        };

        if change.is_topology_change() || service_changed {
            info!("Host {} joined on port {} (cost {})", join.host_id, port, join.cost);
            self.recompute(now).await;
            self.request_lsa(now);
        }
    }

    async fn on_table_update(&mut self, update: TableUpdate, now: Instant) {
        if self.table_sequences.accept(&update.sender, update.sequence_number, now) != Freshness::Fresh {
            self.stats.table_updates_stale += 1;
            debug!("Ignoring table update {} from {}", update.sequence_number, update.sender);
            return;
        }
        self.stats.table_updates += 1;

        let mut changed = false;
        for spec in update.routes {
            let group = match spec.next_hop {
                Some(next_hop) => vec![StaticRoute::primary(spec.destination.clone(), next_hop)],
                None => Vec::new(),
            };
            changed |= self.statics.replace_group(&spec.destination, group);
        }
        if changed {
            self.resync().await;
        }
    }

    async fn on_service_table_update(&mut self, update: ServiceIdTableUpdate, now: Instant) {
        if self
            .service_table_sequences
            .accept(&update.sender, update.sequence_number, now)
            != Freshness::Fresh
        {
            self.stats.table_updates_stale += 1;
            debug!("Ignoring service table update {} from {}", update.sequence_number, update.sender);
            return;
        }
        self.stats.table_updates += 1;

        let mut changed = false;
        for group in update.groups {
            let paths = group
                .paths
                .into_iter()
                .map(|path| StaticRoute::service_path(group.service_id.clone(), path.next_hop, path.weight, path.path_index))
                .collect();
            changed |= self.statics.replace_group(&group.service_id, paths);
        }
        if changed {
            self.resync().await;
        }
    }

    /// Rebuild the network table from the current topology and push the result
    async fn recompute(&mut self, now: Instant) {
        let services: Vec<LocalService> = self.local_services.values().cloned().collect();
        let graph = TopologyGraph::build(&self.local, &self.neighbors, &self.lsdb, &services);
        let paths = graph.shortest_paths();
        debug!("Computed {} paths over {} vertices", paths.len(), graph.router_count());

        self.network.rebuild(paths, now);
        self.stats.recomputations += 1;
        self.resync().await;
    }

    async fn resync(&mut self) {
        let desired = DesiredRoutes::build(&self.network, &self.neighbors, &self.statics);
        let report = self
            .synchronizer
            .synchronize(&desired, self.forwarding.as_ref(), self.config.io_timeout())
            .await;
        self.stats.route_syncs += 1;
        self.stats.route_install_errors += report.failed as u64;
        self.sync_pending = report.failed > 0;
    }

    /// Pull the next LSA forward, keeping the minimum gap to the previous one
    fn request_lsa(&mut self, now: Instant) {
        let earliest = match self.last_lsa_at {
            Some(last) => now.max(last + self.config.lsa_min_interval()),
            None => now,
        };
        if earliest < self.next_lsa_at {
            self.next_lsa_at = earliest;
        }
    }

    /// Hello reply and database sync for a new neighbor
    async fn greet(&mut self, neighbor: &NodeId) {
        let hello = self.hello();
        if self.send(Outbound::Unicast(neighbor.clone()), hello).await {
            self.stats.hellos_sent += 1;
        }
        for lsa in self.lsdb.advertisements() {
            if &lsa.originator == neighbor {
                continue;
            }
            self.send(Outbound::Unicast(neighbor.clone()), ControlMessage::Lsa(lsa)).await;
        }
    }

    fn hello(&self) -> ControlMessage {
        ControlMessage::Hello(Hello::new(self.local.clone(), self.config.hello_cost))
    }

    fn advertised_services(&self) -> Vec<ServiceAdvert> {
        self.local_services
            .values()
            .filter_map(|service| {
                self.neighbors.get(&service.host_id).map(|host| ServiceAdvert {
                    service_id: service.service_id.clone(),
                    weight: service.weight,
                    path_index: service.path_index,
                    cost: host.link_cost,
                })
            })
            .collect()
    }

    async fn send(&mut self, target: Outbound, message: ControlMessage) -> bool {
        let kind = message.kind();
        match timeout(self.config.io_timeout(), self.transport.send(target, message)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                self.stats.transport_errors += e.failed_sends();
                warn!("Failed to send {}: {}", kind, e);
                false
            }
            Err(_) => {
                self.stats.transport_errors += 1;
                warn!("Sending {} timed out", kind);
                false
            }
        }
    }
}

fn clock() -> Instant {
    tokio::time::Instant::now().into_std()
}
