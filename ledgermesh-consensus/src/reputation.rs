//! Reputation bookkeeping: the long-term channel through which recurring
//! peer misbehaviour becomes visible.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::directory::PeerDirectory;
use crate::types::NodeId;

/// Step applied when a peer agreed with the reconciled outcome.
pub const AGREEMENT_REWARD: i64 = 10;

/// Step applied when a peer dissented, lied, or stayed silent. Larger than
/// the reward so Byzantine drift is punished faster than honest recovery.
pub const DISAGREEMENT_PENALTY: i64 = 20;

/// Authoritative reputation writer: the registry, behind a trait so the
/// consensus core never speaks HTTP.
#[async_trait]
pub trait ReputationStore: Send + Sync {
    async fn increase(&self, node_id: &str, amount: i64) -> anyhow::Result<()>;
    async fn decrease(&self, node_id: &str, amount: i64) -> anyhow::Result<()>;
}

/// Applies per-round reputation deltas.
///
/// Two write paths with deliberately different reach:
///
/// - every cross-verifier adjusts its **local cache** immediately, so its own
///   next-round filtering sees the updated scores;
/// - exactly one peer per round (the proposer, after deriving the
///   reconciled outcome) pushes the deltas to the **registry**, keeping the
///   authoritative score at one ±step per peer per round regardless of how
///   many verifiers concurred.
///
/// Caches reconcile with the registry at the start of each round a peer
/// proposes.
pub struct ReputationController {
    directory: Arc<PeerDirectory>,
    store: Arc<dyn ReputationStore>,
}

impl ReputationController {
    pub fn new(directory: Arc<PeerDirectory>, store: Arc<dyn ReputationStore>) -> Self {
        Self { directory, store }
    }

    /// Sweep the whole directory, rewarding every peer outside `malicious`
    /// and penalising every peer inside it. Local cache only.
    pub fn record_round_local(&self, malicious: &HashSet<NodeId>) {
        for (node_id, _) in self.directory.snapshot() {
            let delta = if malicious.contains(&node_id) {
                -DISAGREEMENT_PENALTY
            } else {
                AGREEMENT_REWARD
            };
            if let Some(new_score) = self.directory.adjust(&node_id, delta) {
                debug!(node = %node_id, delta, reputation = new_score, "local reputation adjusted");
            }
        }
    }

    /// Same sweep, but also pushed to the registry. Called once per round,
    /// by the proposer, before the round is reported closed.
    pub async fn publish_round(&self, malicious: &HashSet<NodeId>) {
        self.record_round_local(malicious);
        for (node_id, _) in self.directory.snapshot() {
            let result = if malicious.contains(&node_id) {
                self.store.decrease(&node_id, DISAGREEMENT_PENALTY).await
            } else {
                self.store.increase(&node_id, AGREEMENT_REWARD).await
            };
            if let Err(e) = result {
                // The registry is retried implicitly at the next refresh;
                // a failed push leaves the cache ahead of the authority.
                warn!(node = %node_id, error = %e, "failed to push reputation update to registry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::PeerRecord;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        increases: AtomicUsize,
        decreases: AtomicUsize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                increases: AtomicUsize::new(0),
                decreases: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ReputationStore for CountingStore {
        async fn increase(&self, _node_id: &str, _amount: i64) -> anyhow::Result<()> {
            self.increases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn decrease(&self, _node_id: &str, _amount: i64) -> anyhow::Result<()> {
            self.decreases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn directory() -> Arc<PeerDirectory> {
        let dir = Arc::new(PeerDirectory::new("node-1"));
        for (id, rep) in [("node-1", 100), ("node-2", 70), ("node-3", 100)] {
            dir.upsert(
                id.to_string(),
                PeerRecord {
                    url: "http://127.0.0.1:10000".to_string(),
                    reputation: rep,
                },
            );
        }
        dir
    }

    #[test]
    fn test_local_sweep_rewards_and_penalises() {
        let dir = directory();
        let controller = ReputationController::new(Arc::clone(&dir), Arc::new(CountingStore::new()));

        let malicious: HashSet<NodeId> = ["node-3".to_string()].into_iter().collect();
        controller.record_round_local(&malicious);

        assert_eq!(dir.reputation("node-1"), 100, "capped at 100");
        assert_eq!(dir.reputation("node-2"), 80);
        assert_eq!(dir.reputation("node-3"), 80);
    }

    #[tokio::test]
    async fn test_publish_pushes_one_step_per_peer() {
        let dir = directory();
        let store = Arc::new(CountingStore::new());
        let controller = ReputationController::new(Arc::clone(&dir), Arc::clone(&store) as _);

        let malicious: HashSet<NodeId> = ["node-2".to_string()].into_iter().collect();
        controller.publish_round(&malicious).await;

        assert_eq!(store.increases.load(Ordering::SeqCst), 2);
        assert_eq!(store.decreases.load(Ordering::SeqCst), 1);
        assert_eq!(dir.reputation("node-2"), 50);
    }
}
