//! Configuration handling for the xroute daemon.
//!
//! Settings come from the `services.xroute` section of the shared YAML config
//! file, then `XROUTE_*` environment variables, then command-line flags.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use tracing::{info, warn};
use xroute_control::{PeerConfig, RouterConfig};
use xroute_wire::NodeId;

/// Prefix of keys in the flat `config` map
const KEY_PREFIX: &str = "services.xroute.";
/// Prefix of environment overrides
const ENV_PREFIX: &str = "XROUTE_";

/// Daemon configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    /// Protocol settings
    pub router: RouterConfig,
    /// Control socket address
    pub listen: SocketAddr,
    /// Statically configured neighbors
    pub peers: Vec<PeerConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            listen: SocketAddr::from(([0, 0, 0, 0], 8770)),
            peers: Vec::new(),
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    services: Option<ServicesConfig>,
}

#[derive(Debug, Deserialize)]
struct ServicesConfig {
    xroute: Option<ServiceConfig>,
}

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    router: Option<RouterConfig>,
    listen: Option<SocketAddr>,
    peers: Option<Vec<PeerConfig>>,
    config: Option<HashMap<String, String>>,
}

impl DaemonConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();
        let path = config_path.as_ref();

        match std::fs::read_to_string(path) {
            Ok(content) => {
                let root: RootConfig = serde_yaml::from_str(&content)
                    .with_context(|| format!("failed to parse config file {:?}", path))?;
                config.apply_root_config(root)?;
                info!("Loaded configuration from {:?}", path);
            }
            Err(_) => warn!("Config file {:?} not found, using defaults", path),
        }

        config.apply_environment_overrides(std::env::vars())?;
        Ok(config)
    }

    fn apply_root_config(&mut self, root: RootConfig) -> Result<()> {
        let Some(service) = root.services.and_then(|services| services.xroute) else {
            return Ok(());
        };

        if let Some(router) = service.router {
            self.router = router;
        }
        if let Some(listen) = service.listen {
            self.listen = listen;
        }
        if let Some(peers) = service.peers {
            self.peers = peers;
        }
        if let Some(config_map) = service.config {
            let mut entries: Vec<(String, String)> = config_map.into_iter().collect();
            entries.sort();
            for (key, value) in entries {
                match key.strip_prefix(KEY_PREFIX) {
                    Some(field) => {
                        self.apply_key(field, &value)?;
                    }
                    None => warn!("Ignoring configuration key {}", key),
                }
            }
        }
        Ok(())
    }

    /// Apply `XROUTE_<FIELD>` variables
    pub fn apply_environment_overrides<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(field) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let field = field.to_ascii_lowercase();
            if self.apply_key(&field, &value)? {
                info!("{} overridden by environment: {}", field, value);
            }
        }
        Ok(())
    }

    /// Set one field by name; returns false for unknown names
    fn apply_key(&mut self, field: &str, value: &str) -> Result<bool> {
        let router = &mut self.router;
        match field {
            "node_id" => router.node_id = value.to_string(),
            "listen" => self.listen = parse(field, value)?,
            "peers" => {
                self.peers = value
                    .split(';')
                    .filter(|spec| !spec.trim().is_empty())
                    .map(|spec| parse_peer(spec.trim()).map_err(anyhow::Error::msg))
                    .collect::<Result<_>>()?
            }
            "hello_interval_ms" => router.hello_interval_ms = parse(field, value)?,
            "lsa_interval_ms" => router.lsa_interval_ms = parse(field, value)?,
            "lsa_min_interval_ms" => router.lsa_min_interval_ms = parse(field, value)?,
            "aging_interval_ms" => router.aging_interval_ms = parse(field, value)?,
            "neighbor_expire_sec" => router.neighbor_expire_sec = parse(field, value)?,
            "lsa_expire_sec" => router.lsa_expire_sec = parse(field, value)?,
            "route_expire_sec" => router.route_expire_sec = parse(field, value)?,
            "max_seqnum" => router.max_seqnum = parse(field, value)?,
            "seqnum_window" => router.seqnum_window = parse(field, value)?,
            "io_timeout_ms" => router.io_timeout_ms = parse(field, value)?,
            "hello_cost" => router.hello_cost = parse(field, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

fn parse<T>(field: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid value {:?} for {}", value, field))
}

/// Parse a peer given as `node_id,address,port`
pub fn parse_peer(spec: &str) -> Result<PeerConfig, String> {
    let mut parts = spec.split(',').map(str::trim);
    let (Some(node_id), Some(addr), Some(port), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(format!("expected node_id,address,port, got {:?}", spec));
    };
    if node_id.is_empty() {
        return Err(format!("empty node id in {:?}", spec));
    }
    Ok(PeerConfig {
        node_id: NodeId::from(node_id),
        addr: addr.parse().map_err(|e| format!("invalid address {:?}: {}", addr, e))?,
        port: port.parse().map_err(|e| format!("invalid port {:?}: {}", port, e))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.router.node_id, "router0");
        assert_eq!(config.listen.port(), 8770);
        assert!(config.peers.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
services:
  xroute:
    listen: 127.0.0.1:9100
    router:
      node_id: R1
      hello_interval_ms: 2000
    peers:
      - node_id: R2
        addr: 127.0.0.1:9101
        port: 1
    config:
      services.xroute.lsa_interval_ms: "3000"
      services.xroute.hello_cost: "4"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let mut config = DaemonConfig::default();
        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        config.apply_root_config(serde_yaml::from_str(&content).unwrap()).unwrap();

        assert_eq!(config.router.node_id, "R1");
        assert_eq!(config.router.hello_interval_ms, 2000);
        assert_eq!(config.router.lsa_interval_ms, 3000);
        assert_eq!(config.router.hello_cost, 4);
        assert_eq!(config.router.route_expire_sec, 120);
        assert_eq!(config.listen, "127.0.0.1:9100".parse().unwrap());
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.peers[0].node_id, NodeId::from("R2"));
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"services: [not, a, map").unwrap();
        assert!(DaemonConfig::load_from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_environment_overrides() {
        let mut config = DaemonConfig::default();
        config
            .apply_environment_overrides(vec![
                ("XROUTE_NODE_ID".to_string(), "R9".to_string()),
                ("XROUTE_SEQNUM_WINDOW".to_string(), "500".to_string()),
                ("XROUTE_PEERS".to_string(), "A,10.0.0.1:8770,0; B,10.0.0.2:8770,1".to_string()),
                ("HOME".to_string(), "/root".to_string()),
            ])
            .unwrap();

        assert_eq!(config.router.node_id, "R9");
        assert_eq!(config.router.seqnum_window, 500);
        assert_eq!(config.peers.len(), 2);
        assert_eq!(config.peers[1].port, 1);

        let bad = config.apply_environment_overrides(vec![("XROUTE_HELLO_COST".to_string(), "cheap".to_string())]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_parse_peer() {
        let peer = parse_peer("R2, 192.168.1.2:8770, 3").unwrap();
        assert_eq!(peer.node_id, NodeId::from("R2"));
        assert_eq!(peer.port, 3);

        assert!(parse_peer("R2,192.168.1.2:8770").is_err());
        assert!(parse_peer(",192.168.1.2:8770,1").is_err());
        assert!(parse_peer("R2,nowhere,1").is_err());
    }
}
