//! Node configuration.
//!
//! Sources, in order of precedence: command-line flags, a YAML config file,
//! built-in defaults. All fields carry defaults so a config file may name
//! only what it changes.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use ledgermesh_consensus::ConsensusConfig;

/// Configuration of one peer node.
///
/// The `port` is the base of the four-listener layout: protocol traffic on
/// `port`, verification on `port + 1`, learns on `port + 2`, and directory
/// records on `port + 3`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Operator-assigned identifier, unique across the cluster; doubles as
    /// the registry key.
    pub node_id: String,

    /// IP address the listeners bind to.
    pub bind_address: String,

    /// Host other peers reach this node at; combined with `port` it forms
    /// the URL stored in the registry.
    pub advertise_host: String,

    /// Base protocol port.
    pub port: u16,

    /// Base URL of the registry service.
    pub registry_url: String,

    /// Consensus protocol parameters (mode, windows, timeouts).
    pub consensus: ConsensusConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "node-1".to_string(),
            bind_address: "0.0.0.0".to_string(),
            advertise_host: "127.0.0.1".to_string(),
            port: 10_000,
            registry_url: "http://127.0.0.1:5000".to_string(),
            consensus: ConsensusConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load from a YAML file, or fall back to defaults when no path is
    /// given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                serde_yaml::from_str(&raw)
                    .with_context(|| format!("parsing config file {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    /// The URL this node publishes to the registry.
    pub fn node_url(&self) -> String {
        format!("http://{}:{}", self.advertise_host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgermesh_consensus::ProtocolMode;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: NodeConfig = serde_yaml::from_str(
            r#"
node_id: node-7
port: 12000
"#,
        )
        .unwrap();
        assert_eq!(config.node_id, "node-7");
        assert_eq!(config.port, 12000);
        assert_eq!(config.registry_url, "http://127.0.0.1:5000");
        assert_eq!(config.consensus.mode, ProtocolMode::Byzantine);
    }

    #[test]
    fn test_consensus_overrides_parse() {
        let config: NodeConfig = serde_yaml::from_str(
            r#"
consensus:
  mode: classic
  verify_window: 2
  learn_window: 2
  request_timeout: 5
  poll_interval: 1
"#,
        )
        .unwrap();
        assert_eq!(config.consensus.mode, ProtocolMode::Classic);
        assert_eq!(config.consensus.verify_window.as_secs(), 2);
    }

    #[test]
    fn test_node_url_uses_advertised_host() {
        let config = NodeConfig {
            advertise_host: "10.0.0.8".to_string(),
            port: 9000,
            ..NodeConfig::default()
        };
        assert_eq!(config.node_url(), "http://10.0.0.8:9000");
    }
}
