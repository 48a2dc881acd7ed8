//! Control-message transport.
//!
//! The control loop talks to its neighbors through [`ControlTransport`]:
//! outbound messages are either flooded to every adjacent node (optionally
//! skipping the one a message came from) or unicast to a single neighbor.
//! Inbound messages arrive on a `tokio::sync::mpsc` channel handed to the
//! transport at construction time, tagged with the sender and the local
//! interface they were heard on.
//!
//! [`UdpTransport`] carries JSON-encoded [`Envelope`]s in UDP datagrams to a
//! statically configured peer list.

use crate::error::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use xroute_wire::{ControlMessage, NodeId};

/// Largest datagram accepted
const MAX_DATAGRAM: usize = 64 * 1024;

/// Where an outbound message goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Every adjacent node except `except`
    Flood {
        /// Node to skip (split horizon)
        except: Option<NodeId>,
    },
    /// One adjacent node
    Unicast(NodeId),
}

/// A control message as received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Adjacent node the message came from
    pub from: NodeId,
    /// Local interface it was heard on
    pub port: u32,
    /// Decoded message
    pub message: ControlMessage,
}

/// Datagram payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sending node
    pub from: NodeId,
    /// Carried message
    pub message: ControlMessage,
}

/// Control-message transport used by the control loop
#[async_trait]
pub trait ControlTransport: Send + Sync {
    /// Begin delivering inbound messages
    async fn start(&self) -> Result<(), TransportError>;

    /// Send a message
    async fn send(&self, target: Outbound, message: ControlMessage) -> Result<(), TransportError>;

    /// Stop delivering and release resources
    async fn stop(&self) -> Result<(), TransportError>;
}

/// Statically configured UDP peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Peer node id
    pub node_id: NodeId,
    /// Peer socket address
    pub addr: SocketAddr,
    /// Local interface number of the link to this peer
    pub port: u32,
}

struct Running {
    socket: Arc<UdpSocket>,
    receiver: JoinHandle<()>,
}

/// UDP transport with a static peer list
///
/// The inbound sender moves into the receive task on `start`, so the channel
/// closes once that task ends: after `stop`, or when the socket fails.
pub struct UdpTransport {
    local: NodeId,
    listen: SocketAddr,
    peers: BTreeMap<NodeId, PeerConfig>,
    inbound: Mutex<Option<mpsc::Sender<InboundMessage>>>,
    running: Mutex<Option<Running>>,
}

impl UdpTransport {
    /// Create a stopped transport delivering to `inbound`
    pub fn new(
        local: NodeId,
        listen: SocketAddr,
        peers: Vec<PeerConfig>,
        inbound: mpsc::Sender<InboundMessage>,
    ) -> Self {
        Self {
            local,
            listen,
            peers: peers.into_iter().map(|peer| (peer.node_id.clone(), peer)).collect(),
            inbound: Mutex::new(Some(inbound)),
            running: Mutex::new(None),
        }
    }

    /// Bound address, once started
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let running = self.running.lock().await;
        running.as_ref().and_then(|r| r.socket.local_addr().ok())
    }

    async fn socket(&self) -> Result<Arc<UdpSocket>, TransportError> {
        let running = self.running.lock().await;
        running
            .as_ref()
            .map(|r| Arc::clone(&r.socket))
            .ok_or(TransportError::Closed)
    }
}

#[async_trait]
impl ControlTransport for UdpTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let socket = Arc::new(UdpSocket::bind(self.listen).await?);
        info!("Control transport listening on {}", socket.local_addr()?);

        let by_addr: BTreeMap<SocketAddr, PeerConfig> = self
            .peers
            .values()
            .map(|peer| (peer.addr, peer.clone()))
            .collect();
        let Some(sender) = self.inbound.lock().await.take() else {
            return Err(TransportError::Closed);
        };
        let receiver = tokio::spawn(receive_loop(Arc::clone(&socket), by_addr, sender));

        *running = Some(Running { socket, receiver });
        Ok(())
    }

    async fn send(&self, target: Outbound, message: ControlMessage) -> Result<(), TransportError> {
        let socket = self.socket().await?;
        let payload = serde_json::to_vec(&Envelope {
            from: self.local.clone(),
            message,
        })?;

        match target {
            Outbound::Unicast(node) => {
                let peer = self
                    .peers
                    .get(&node)
                    .ok_or_else(|| TransportError::UnknownPeer(node.to_string()))?;
                socket.send_to(&payload, peer.addr).await?;
            }
            Outbound::Flood { except } => {
                let targets: Vec<&PeerConfig> = self
                    .peers
                    .values()
                    .filter(|peer| except.as_ref() != Some(&peer.node_id))
                    .collect();
                let results =
                    futures::future::join_all(targets.iter().map(|peer| socket.send_to(&payload, peer.addr))).await;
                let mut failed = 0;
                for (peer, result) in targets.iter().zip(results) {
                    if let Err(e) = result {
                        warn!("Failed to send to {} at {}: {}", peer.node_id, peer.addr, e);
                        failed += 1;
                    }
                }
                if failed > 0 {
                    return Err(TransportError::FloodFailed {
                        failed,
                        attempted: targets.len(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        if let Some(running) = self.running.lock().await.take() {
            running.receiver.abort();
            // Wait for the task to drop its inbound sender
            let _ = running.receiver.await;
            info!("Control transport stopped");
        }
        Ok(())
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    peers: BTreeMap<SocketAddr, PeerConfig>,
    inbound: mpsc::Sender<InboundMessage>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, source) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) if is_transient(&e) => {
                warn!("Control socket receive failed: {}", e);
                continue;
            }
            Err(e) => {
                error!("Control socket failed, closing inbound stream: {}", e);
                break;
            }
        };

        let Some(peer) = peers.get(&source) else {
            debug!("Dropping datagram from unconfigured address {}", source);
            continue;
        };

        let envelope: Envelope = match serde_json::from_slice(&buf[..len]) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping undecodable datagram from {}: {}", source, e);
                continue;
            }
        };

        let message = InboundMessage {
            from: envelope.from,
            port: peer.port,
            message: envelope.message,
        };
        if inbound.send(message).await.is_err() {
            debug!("Inbound channel closed; receive loop exiting");
            break;
        }
    }
}

/// Receive errors that leave the socket usable
///
/// ICMP unreachable replies to earlier sends surface here as refused or reset.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use xroute_wire::Hello;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_send_before_start_is_closed() {
        let (tx, _rx) = mpsc::channel(4);
        let transport = UdpTransport::new(NodeId::from("R"), loopback(), vec![], tx);

        let result = transport
            .send(Outbound::Flood { except: None }, ControlMessage::Hello(Hello::new("R", 1)))
            .await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_datagram_exchange_with_peer() {
        let peer_socket = UdpSocket::bind(loopback()).await.unwrap();
        let peer_addr = peer_socket.local_addr().unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let transport = UdpTransport::new(
            NodeId::from("R"),
            loopback(),
            vec![PeerConfig { node_id: NodeId::from("A"), addr: peer_addr, port: 3 }],
            tx,
        );
        transport.start().await.unwrap();
        let local_addr = transport.local_addr().await.unwrap();

        transport
            .send(Outbound::Unicast(NodeId::from("A")), ControlMessage::Hello(Hello::new("R", 1)))
            .await
            .unwrap();
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), peer_socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let envelope: Envelope = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(envelope.from, NodeId::from("R"));

        peer_socket.send_to(b"not json", local_addr).await.unwrap();
        let reply = serde_json::to_vec(&Envelope {
            from: NodeId::from("A"),
            message: ControlMessage::Hello(Hello::new("A", 2)),
        })
        .unwrap();
        peer_socket.send_to(&reply, local_addr).await.unwrap();

        let inbound = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inbound.from, NodeId::from("A"));
        assert_eq!(inbound.port, 3);
        assert_eq!(inbound.message, ControlMessage::Hello(Hello::new("A", 2)));

        transport.stop().await.unwrap();
        assert!(transport.local_addr().await.is_none());
    }

    #[tokio::test]
    async fn test_stop_closes_inbound_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let transport = UdpTransport::new(NodeId::from("R"), loopback(), vec![], tx);
        transport.start().await.unwrap();

        transport.stop().await.unwrap();
        assert!(matches!(rx.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));

        // The sender went with the receive task; a stopped transport stays stopped
        assert!(matches!(transport.start().await, Err(TransportError::Closed)));
    }

    #[test]
    fn test_receive_error_classification() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionRefused)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::NotConnected)));
        assert!(!is_transient(&io::Error::new(io::ErrorKind::Other, "bad file descriptor")));
    }

    #[tokio::test]
    async fn test_flood_reports_failed_peers() {
        let peer_socket = UdpSocket::bind(loopback()).await.unwrap();
        let peer_addr = peer_socket.local_addr().unwrap();

        let (tx, _rx) = mpsc::channel(4);
        let transport = UdpTransport::new(
            NodeId::from("R"),
            loopback(),
            vec![
                PeerConfig { node_id: NodeId::from("A"), addr: peer_addr, port: 1 },
                // Port zero is not a valid destination
                PeerConfig { node_id: NodeId::from("B"), addr: "127.0.0.1:0".parse().unwrap(), port: 2 },
            ],
            tx,
        );
        transport.start().await.unwrap();

        let result = transport
            .send(Outbound::Flood { except: None }, ControlMessage::Hello(Hello::new("R", 1)))
            .await;
        assert!(matches!(result, Err(TransportError::FloodFailed { failed: 1, attempted: 2 })));

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), peer_socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let envelope: Envelope = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(envelope.message, ControlMessage::Hello(Hello::new("R", 1)));

        let result = transport
            .send(Outbound::Flood { except: Some(NodeId::from("B")) }, ControlMessage::Hello(Hello::new("R", 1)))
            .await;
        assert!(result.is_ok());
        transport.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unicast_to_unknown_peer() {
        let (tx, _rx) = mpsc::channel(4);
        let transport = UdpTransport::new(NodeId::from("R"), loopback(), vec![], tx);
        transport.start().await.unwrap();

        let result = transport
            .send(Outbound::Unicast(NodeId::from("Z")), ControlMessage::Hello(Hello::new("R", 1)))
            .await;
        assert!(matches!(result, Err(TransportError::UnknownPeer(id)) if id == "Z"));
        transport.stop().await.unwrap();
    }
}
