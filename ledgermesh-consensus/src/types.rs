//! Core types for the LedgerMesh consensus protocol.
//!
//! Wire shapes mirror the JSON the peers actually exchange; every message is
//! a self-contained object with a `type` tag, sent over its own connection.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use ledgermesh_ledger::Verdict;

/// Unique identifier for peers in the cluster, assigned by the operator at
/// startup and used as the registry key.
pub type NodeId = String;

/// A globally ordered proposal number.
///
/// The counter is local to each proposer; the proposer id breaks ties so two
/// peers issuing the same counter value still produce distinct, comparable
/// numbers. Ordering is lexicographic over `(number, proposer)`; the derive
/// order below is load-bearing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProposalNumber {
    pub number: u64,
    pub proposer: NodeId,
}

impl ProposalNumber {
    pub fn new(number: u64, proposer: impl Into<NodeId>) -> Self {
        Self {
            number,
            proposer: proposer.into(),
        }
    }
}

impl std::fmt::Display for ProposalNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.number, self.proposer)
    }
}

/// Peer-to-peer protocol messages (the `type`-tagged envelopes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    /// Phase 1: reserve a proposal number.
    Prepare {
        proposal_number: u64,
        proposer_id: NodeId,
    },
    /// Phase 2: distribute the command under the reserved number.
    Propose {
        proposal_number: u64,
        action: Value,
        proposer_id: NodeId,
    },
    /// Acceptor-to-acceptor vote broadcast on the verification plane.
    Verify {
        proposal_number: u64,
        status: Verdict,
        action: Value,
        node_id: NodeId,
        proposer_id: NodeId,
    },
    /// Verification outcome, unicast to the proposer on the learn plane.
    Learn {
        proposal_number: u64,
        action: Value,
        node_id: NodeId,
        malicious_nodes: Vec<NodeId>,
    },
    /// Local feasibility probe; answered with a bare verdict, never
    /// replicated.
    Query { action: Value },
}

/// Reply to a `prepare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromiseStatus {
    Promise,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareReply {
    pub status: PromiseStatus,
    pub proposal_number: u64,
}

/// Which member of the protocol family this peer speaks.
///
/// The moving-target supervisor rotates peers between variants; both handle
/// the same client commands but commit through different final phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolMode {
    /// Cross-verification with reputation-weighted quorums (the default).
    Byzantine,
    /// Plain prepare/propose/learn without cross-verification.
    Classic,
}

impl std::fmt::Display for ProtocolMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolMode::Byzantine => write!(f, "byzantine"),
            ProtocolMode::Classic => write!(f, "classic"),
        }
    }
}

/// Tunable parameters of the consensus engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Protocol variant this peer runs.
    pub mode: ProtocolMode,

    /// How long a verification tally stays open after its first vote.
    #[serde(with = "duration_secs")]
    pub verify_window: Duration,

    /// How long the proposer collects learns after the first one arrives.
    #[serde(with = "duration_secs")]
    pub learn_window: Duration,

    /// Deadline for any single request/response exchange with a peer; also
    /// bounds the wait for the first learn of a round.
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// Cadence at which collection loops re-check their deadlines.
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            mode: ProtocolMode::Byzantine,
            verify_window: Duration::from_secs(10),
            learn_window: Duration::from_secs(10),
            request_timeout: ledgermesh_transport::SEND_TIMEOUT,
            poll_interval: ledgermesh_transport::POLL_INTERVAL,
        }
    }
}

/// Serialize durations as whole seconds in config files.
mod duration_secs {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Lifecycle of one proposer-driven round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    Preparing,
    Proposing,
    AwaitingLearn,
    Committed,
    Aborted,
}

/// Proposer-side bookkeeping for a round, kept for telemetry until the round
/// resolves.
#[derive(Debug, Clone)]
pub struct ConsensusInstance {
    pub number: ProposalNumber,
    pub command: Value,
    pub phase: RoundPhase,
    pub promises: usize,
    pub learns_received: usize,
}

impl ConsensusInstance {
    pub fn new(number: ProposalNumber, command: Value) -> Self {
        Self {
            number,
            command,
            phase: RoundPhase::Preparing,
            promises: 0,
            learns_received: 0,
        }
    }
}

/// Terminal failures of a consensus round, as surfaced to the client.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    /// Prepare failed to gather a strict majority of promises.
    #[error("no quorum: {promises} promises, {required} required")]
    NoQuorum { promises: usize, required: usize },

    /// No verification outcome reached the proposer in time.
    #[error("no verification outcome arrived for proposal {0}")]
    NoOutcome(u64),

    /// Learned outcomes disagreed; the round cannot be trusted.
    #[error("inconsistent verification outcomes for proposal {0}")]
    InconsistentOutcomes(u64),

    /// Classic mode: a majority of acceptors rejected the command.
    #[error("proposal {0} rejected by the cluster")]
    Rejected(u64),

    /// The cluster is too small to run a round at all.
    #[error("cluster has no other active peers")]
    NoPeers,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_proposal_numbers_order_by_pair() {
        let a = ProposalNumber::new(5, "node-1");
        let b = ProposalNumber::new(6, "node-2");
        let c = ProposalNumber::new(5, "node-2");
        assert!(a < b);
        assert!(a < c, "equal counters fall back to proposer id");
        assert!(c < b);
    }

    #[test]
    fn test_prepare_wire_shape() {
        let msg = PeerMessage::Prepare {
            proposal_number: 3,
            proposer_id: "node-1".to_string(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "prepare", "proposal_number": 3, "proposer_id": "node-1"})
        );
    }

    #[test]
    fn test_verify_wire_shape() {
        let raw = json!({
            "type": "verify",
            "proposal_number": 9,
            "status": "approved",
            "action": {"action": "deposit", "name": "Alice", "amount": 10.0},
            "node_id": "node-2",
            "proposer_id": "node-1",
        });
        let msg: PeerMessage = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&msg).unwrap(), raw);
    }

    #[test]
    fn test_prepare_reply_wire_shape() {
        let reply = PrepareReply {
            status: PromiseStatus::Promise,
            proposal_number: 12,
        };
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"status": "promise", "proposal_number": 12})
        );
    }
}
