//! Protocol timers, expiry times and sequence space.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use xroute_wire::NodeId;

/// Router protocol configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Identifier of this router
    pub node_id: String,
    /// Hello send period (ms)
    pub hello_interval_ms: u64,
    /// LSA send period (ms)
    pub lsa_interval_ms: u64,
    /// Minimum gap between two LSAs when topology changes pull one forward (ms)
    pub lsa_min_interval_ms: u64,
    /// Aging sweep period (ms)
    pub aging_interval_ms: u64,
    /// Neighbors silent longer than this are removed (s)
    pub neighbor_expire_sec: u64,
    /// Link-state records not refreshed within this time are removed (s)
    pub lsa_expire_sec: u64,
    /// Network table rows not refreshed within this time are removed (s)
    pub route_expire_sec: u64,
    /// Size of the sequence number space
    pub max_seqnum: u32,
    /// Freshness window within the sequence space
    pub seqnum_window: u32,
    /// Bound on every transport and forwarding-table call (ms)
    pub io_timeout_ms: u64,
    /// Link cost advertised in this router's Hellos
    pub hello_cost: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            node_id: "router0".to_string(),
            hello_interval_ms: 5100,
            lsa_interval_ms: 5100,
            lsa_min_interval_ms: 1000,
            aging_interval_ms: 1000,
            neighbor_expire_sec: 60,
            lsa_expire_sec: 60,
            route_expire_sec: 120,
            max_seqnum: 1_000_000,
            seqnum_window: 10_000,
            io_timeout_ms: 2000,
            hello_cost: 1,
        }
    }
}

impl RouterConfig {
    /// Default configuration for the given router id
    pub fn for_node(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Self::default()
        }
    }

    /// Check that the values are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.is_empty() {
            return Err(ConfigError::EmptyNodeId);
        }
        for (name, value) in [
            ("hello_interval_ms", self.hello_interval_ms),
            ("lsa_interval_ms", self.lsa_interval_ms),
            ("aging_interval_ms", self.aging_interval_ms),
            ("neighbor_expire_sec", self.neighbor_expire_sec),
            ("lsa_expire_sec", self.lsa_expire_sec),
            ("route_expire_sec", self.route_expire_sec),
            ("io_timeout_ms", self.io_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if self.seqnum_window == 0 || self.seqnum_window >= self.max_seqnum {
            return Err(ConfigError::SequenceWindow {
                window: self.seqnum_window,
                max: self.max_seqnum,
            });
        }
        Ok(())
    }

    /// Router id as a node identifier
    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.node_id.clone())
    }

    /// Hello send period
    pub fn hello_interval(&self) -> Duration {
        Duration::from_millis(self.hello_interval_ms)
    }

    /// LSA send period
    pub fn lsa_interval(&self) -> Duration {
        Duration::from_millis(self.lsa_interval_ms)
    }

    /// Minimum gap between LSAs
    pub fn lsa_min_interval(&self) -> Duration {
        Duration::from_millis(self.lsa_min_interval_ms)
    }

    /// Aging sweep period
    pub fn aging_interval(&self) -> Duration {
        Duration::from_millis(self.aging_interval_ms)
    }

    /// Neighbor expiry
    pub fn neighbor_expire(&self) -> Duration {
        Duration::from_secs(self.neighbor_expire_sec)
    }

    /// Link-state record expiry
    pub fn lsa_expire(&self) -> Duration {
        Duration::from_secs(self.lsa_expire_sec)
    }

    /// Network table row expiry
    pub fn route_expire(&self) -> Duration {
        Duration::from_secs(self.route_expire_sec)
    }

    /// Bound on collaborator calls
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RouterConfig::default();
        assert_eq!(config.hello_interval(), Duration::from_millis(5100));
        assert_eq!(config.lsa_interval(), Duration::from_millis(5100));
        assert_eq!(config.neighbor_expire(), Duration::from_secs(60));
        assert_eq!(config.route_expire(), Duration::from_secs(120));
        assert_eq!(config.max_seqnum, 1_000_000);
        assert_eq!(config.seqnum_window, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = RouterConfig::for_node("");
        assert_eq!(config.validate(), Err(ConfigError::EmptyNodeId));

        config.node_id = "R".to_string();
        config.hello_interval_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::Zero("hello_interval_ms")));

        config.hello_interval_ms = 100;
        config.seqnum_window = config.max_seqnum;
        assert!(matches!(config.validate(), Err(ConfigError::SequenceWindow { .. })));
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: RouterConfig = serde_json::from_str(r#"{"node_id": "R7", "lsa_interval_ms": 2000}"#).unwrap();
        assert_eq!(config.node_id, "R7");
        assert_eq!(config.lsa_interval_ms, 2000);
        assert_eq!(config.hello_interval_ms, 5100);
    }
}
