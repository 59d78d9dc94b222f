//! Peer addressing: the four-plane port layout and the parsed form of the
//! `http://host:port` endpoint URLs the registry hands out.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::TransportError;

/// Offsets of the protocol planes relative to a peer's base port.
///
/// The base port carries prepare/propose traffic; the other planes sit at
/// fixed offsets so a peer's full address is derivable from the single URL
/// stored in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortLayout {
    /// Base (protocol) port.
    pub base: u16,
}

impl PortLayout {
    pub const VERIFY_OFFSET: u16 = 1;
    pub const LEARN_OFFSET: u16 = 2;
    pub const DIRECTORY_OFFSET: u16 = 3;

    pub fn new(base: u16) -> Self {
        Self { base }
    }

    /// Prepare / propose / legacy learn plane.
    pub fn protocol(&self) -> u16 {
        self.base
    }

    /// Acceptor-to-acceptor verify broadcast plane.
    pub fn verify(&self) -> u16 {
        self.base + Self::VERIFY_OFFSET
    }

    /// Verification-outcome plane (acceptors → proposer).
    pub fn learn(&self) -> u16 {
        self.base + Self::LEARN_OFFSET
    }

    /// Peer registration record plane.
    pub fn directory(&self) -> u16 {
        self.base + Self::DIRECTORY_OFFSET
    }
}

/// A peer's resolved network location, parsed from its registry URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEndpoint {
    host: String,
    ports: PortLayout,
}

impl PeerEndpoint {
    pub fn new(host: impl Into<String>, base_port: u16) -> Self {
        Self {
            host: host.into(),
            ports: PortLayout::new(base_port),
        }
    }

    /// Parse a registry URL of the form `http://host:port`.
    pub fn parse_url(url: &str) -> Result<Self, TransportError> {
        let stripped = url
            .strip_prefix("http://")
            .or_else(|| url.strip_prefix("https://"))
            .unwrap_or(url)
            .trim_end_matches('/');
        let (host, port) = stripped
            .rsplit_once(':')
            .ok_or_else(|| TransportError::InvalidUrl(url.to_string()))?;
        if host.is_empty() {
            return Err(TransportError::InvalidUrl(url.to_string()));
        }
        let base_port: u16 = port
            .parse()
            .map_err(|_| TransportError::InvalidUrl(url.to_string()))?;
        Ok(Self::new(host, base_port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn ports(&self) -> PortLayout {
        self.ports
    }

    /// The URL form stored in the registry.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.ports.base)
    }

    pub fn protocol_addr(&self) -> String {
        format!("{}:{}", self.host, self.ports.protocol())
    }

    pub fn verify_addr(&self) -> String {
        format!("{}:{}", self.host, self.ports.verify())
    }

    pub fn learn_addr(&self) -> String {
        format!("{}:{}", self.host, self.ports.learn())
    }

    pub fn directory_addr(&self) -> String {
        format!("{}:{}", self.host, self.ports.directory())
    }
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.ports.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_registry_url() {
        let endpoint = PeerEndpoint::parse_url("http://10.151.101.173:10000").unwrap();
        assert_eq!(endpoint.host(), "10.151.101.173");
        assert_eq!(endpoint.ports().protocol(), 10000);
        assert_eq!(endpoint.ports().verify(), 10001);
        assert_eq!(endpoint.ports().learn(), 10002);
        assert_eq!(endpoint.ports().directory(), 10003);
        assert_eq!(endpoint.url(), "http://10.151.101.173:10000");
    }

    #[test]
    fn test_parse_bare_host_port() {
        let endpoint = PeerEndpoint::parse_url("localhost:9000").unwrap();
        assert_eq!(endpoint.protocol_addr(), "localhost:9000");
        assert_eq!(endpoint.directory_addr(), "localhost:9003");
    }

    #[test]
    fn test_reject_urls_without_port() {
        assert!(PeerEndpoint::parse_url("http://localhost").is_err());
        assert!(PeerEndpoint::parse_url("").is_err());
    }
}
