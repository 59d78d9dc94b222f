//! In-memory mirror of the registry: the live view of the cluster.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use ledgermesh_transport::{PeerEndpoint, TransportError};

use crate::types::NodeId;

/// Reputation floor for participation: peers below this are excluded from
/// quorum numerators and denominators alike.
pub const REPUTATION_THRESHOLD: i64 = 50;

/// Score assigned on first registration.
pub const DEFAULT_REPUTATION: i64 = 100;

/// One directory entry: where a peer lives and how far it can be trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub url: String,
    pub reputation: i64,
}

impl PeerRecord {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reputation: DEFAULT_REPUTATION,
        }
    }

    pub fn endpoint(&self) -> Result<PeerEndpoint, TransportError> {
        PeerEndpoint::parse_url(&self.url)
    }
}

/// Source of the authoritative membership view.
///
/// Implemented by the registry HTTP client; abstracted here so the consensus
/// core never speaks HTTP itself.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    async fn fetch_peers(&self) -> anyhow::Result<HashMap<NodeId, PeerRecord>>;
}

/// The peer directory: `peerId → {endpoint, reputation}`.
///
/// Writers are the directory listener (new peers announcing themselves) and
/// the reputation controller; everything on the hot path only reads.
/// Reputation here is a cache of the registry's authoritative value,
/// refreshed opportunistically at the start of each round this peer
/// proposes.
pub struct PeerDirectory {
    self_id: NodeId,
    peers: DashMap<NodeId, PeerRecord>,
}

impl PeerDirectory {
    pub fn new(self_id: impl Into<NodeId>) -> Self {
        Self {
            self_id: self_id.into(),
            peers: DashMap::new(),
        }
    }

    pub fn self_id(&self) -> &NodeId {
        &self.self_id
    }

    /// Insert or update a peer record (directory listener path).
    pub fn upsert(&self, node_id: NodeId, record: PeerRecord) {
        debug!(node = %node_id, url = %record.url, reputation = record.reputation, "directory updated");
        self.peers.insert(node_id, record);
    }

    pub fn remove(&self, node_id: &str) {
        self.peers.remove(node_id);
    }

    /// Replace the whole view with a registry snapshot.
    pub fn replace_all(&self, snapshot: HashMap<NodeId, PeerRecord>) {
        self.peers.clear();
        for (node_id, record) in snapshot {
            self.peers.insert(node_id, record);
        }
        info!(peers = self.peers.len(), "directory refreshed from registry");
    }

    pub fn get(&self, node_id: &str) -> Option<PeerRecord> {
        self.peers.get(node_id).map(|r| r.value().clone())
    }

    pub fn endpoint(&self, node_id: &str) -> Option<PeerEndpoint> {
        self.get(node_id).and_then(|r| r.endpoint().ok())
    }

    /// Cached reputation; unknown peers score zero.
    pub fn reputation(&self, node_id: &str) -> i64 {
        self.peers.get(node_id).map(|r| r.reputation).unwrap_or(0)
    }

    pub fn is_reputable(&self, node_id: &str) -> bool {
        self.reputation(node_id) >= REPUTATION_THRESHOLD
    }

    /// Apply a local, clamped reputation delta (reputation controller path).
    pub fn adjust(&self, node_id: &str, delta: i64) -> Option<i64> {
        self.peers.get_mut(node_id).map(|mut record| {
            record.reputation = (record.reputation + delta).clamp(0, 100);
            record.reputation
        })
    }

    /// Every known peer, self included.
    pub fn snapshot(&self) -> HashMap<NodeId, PeerRecord> {
        self.peers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Peers at or above the participation threshold, self included.
    pub fn reputable_peers(&self) -> Vec<(NodeId, PeerRecord)> {
        self.peers
            .iter()
            .filter(|e| e.value().reputation >= REPUTATION_THRESHOLD)
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Reputable peers other than this node: the round's counterparties.
    pub fn other_reputable_peers(&self) -> Vec<(NodeId, PeerRecord)> {
        self.reputable_peers()
            .into_iter()
            .filter(|(id, _)| *id != self.self_id)
            .collect()
    }

    /// Promises required for a prepare round: a strict majority of the
    /// other active peers.
    pub fn prepare_majority(&self) -> usize {
        let active = self.reputable_peers().len();
        (active.saturating_sub(1)) / 2 + 1
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory_with(peers: &[(&str, i64)]) -> PeerDirectory {
        let dir = PeerDirectory::new("node-1");
        for (i, (id, rep)) in peers.iter().enumerate() {
            dir.upsert(
                id.to_string(),
                PeerRecord {
                    url: format!("http://127.0.0.1:{}", 10_000 + i * 10),
                    reputation: *rep,
                },
            );
        }
        dir
    }

    #[test]
    fn test_low_reputation_peers_are_excluded_from_quorum_math() {
        let dir = directory_with(&[
            ("node-1", 100),
            ("node-2", 100),
            ("node-3", 100),
            ("node-4", 100),
            ("node-5", 40),
        ]);
        // node-5 sits below the threshold: 4 active peers remain.
        assert_eq!(dir.reputable_peers().len(), 4);
        assert_eq!(dir.other_reputable_peers().len(), 3);
        assert_eq!(dir.prepare_majority(), 2);
        assert!(!dir.is_reputable("node-5"));
    }

    #[test]
    fn test_prepare_majority_over_small_clusters() {
        assert_eq!(
            directory_with(&[("node-1", 100), ("node-2", 100), ("node-3", 100)]).prepare_majority(),
            2
        );
        assert_eq!(
            directory_with(&[("node-1", 100), ("node-2", 100)]).prepare_majority(),
            1
        );
    }

    #[test]
    fn test_adjust_clamps_to_bounds() {
        let dir = directory_with(&[("node-2", 95), ("node-3", 10)]);
        assert_eq!(dir.adjust("node-2", 10), Some(100));
        assert_eq!(dir.adjust("node-3", -20), Some(0));
        assert_eq!(dir.adjust("node-9", 10), None);
    }

    #[test]
    fn test_rehabilitation_crosses_the_threshold() {
        let dir = directory_with(&[("node-2", 40)]);
        assert!(!dir.is_reputable("node-2"));
        dir.adjust("node-2", 10);
        assert!(dir.is_reputable("node-2"));
    }
}
