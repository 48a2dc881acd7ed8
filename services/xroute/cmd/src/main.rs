//! xroute routing daemon.
//!
//! Runs one link-state router: Hellos and LSAs over UDP to statically
//! configured peers, routes pushed into an in-memory forwarding table.

use clap::Parser;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use xroute_control::{ControlLoop, PeerConfig, UdpTransport};
use xroute_routing::MemoryForwardingTable;

mod config;
mod logging;

use config::{parse_peer, DaemonConfig};
use logging::XrouteLogFormatter;

/// Depth of the inbound control-message queue
const INBOUND_QUEUE: usize = 1024;

/// Intra-domain link-state routing daemon
#[derive(Parser, Debug)]
#[command(name = "xroute", version, about = "Intra-domain link-state routing daemon")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Router id (overrides the configuration file)
    #[arg(long)]
    node_id: Option<String>,

    /// Control socket address, e.g. 0.0.0.0:8770
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Peer as node_id,address,port (repeatable)
    #[arg(long = "peer", value_parser = parse_peer)]
    peers: Vec<PeerConfig>,

    /// Hello interval, e.g. 5s
    #[arg(long)]
    hello_interval: Option<humantime::Duration>,

    /// LSA interval, e.g. 5s
    #[arg(long)]
    lsa_interval: Option<humantime::Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply_to(&self, config: &mut DaemonConfig) {
        if let Some(node_id) = &self.node_id {
            config.router.node_id = node_id.clone();
        }
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if !self.peers.is_empty() {
            config.peers = self.peers.clone();
        }
        if let Some(interval) = self.hello_interval {
            config.router.hello_interval_ms = millis(interval.into());
        }
        if let Some(interval) = self.lsa_interval {
            config.router.lsa_interval_ms = millis(interval.into());
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("xroute={}", args.log_level).parse()?)
        .add_directive(format!("xroute_control={}", args.log_level).parse()?)
        .add_directive(format!("xroute_routing={}", args.log_level).parse()?)
        .add_directive(format!("xroute_topology={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .event_format(XrouteLogFormatter::new("xroute"))
        .init();

    info!("Starting xroute v{}", env!("CARGO_PKG_VERSION"));

    let mut config = DaemonConfig::load_from_file(&args.config)?;
    args.apply_to(&mut config);
    config.router.validate()?;

    component_info!(
        "config",
        "Router {} listening on {} with {} peers (hello {}ms, lsa {}ms)",
        config.router.node_id,
        config.listen,
        config.peers.len(),
        config.router.hello_interval_ms,
        config.router.lsa_interval_ms
    );
    for peer in &config.peers {
        component_info!("config", "Peer {} at {} on port {}", peer.node_id, peer.addr, peer.port);
    }

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
    let transport = Arc::new(UdpTransport::new(
        config.router.node_id(),
        config.listen,
        config.peers.clone(),
        inbound_tx,
    ));
    let forwarding = Arc::new(MemoryForwardingTable::new());

    let mut control = ControlLoop::new(config.router.clone(), transport, forwarding.clone())?;

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => component_info!("signal", "Received Ctrl+C, shutting down"),
            Err(e) => component_warn!("signal", "Failed to listen for Ctrl+C: {}", e),
        }
    };

    let result = control.run(inbound_rx, shutdown).await;

    let stats = control.stats();
    info!(
        "Final counters: {} hellos in, {} LSAs accepted, {} malformed, {} route syncs, {} routes installed",
        stats.hellos_received,
        stats.lsas_accepted,
        stats.malformed_messages,
        stats.route_syncs,
        forwarding.len()
    );

    if let Err(e) = result {
        component_error!("control", "Control loop failed: {}", e);
        return Err(e.into());
    }

    info!("xroute shutdown complete");
    Ok(())
}
