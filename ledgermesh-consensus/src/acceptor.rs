//! Acceptor-side protocol state and handlers.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use ledgermesh_ledger::Verdict;
use ledgermesh_transport::send_json;

use crate::directory::PeerDirectory;
use crate::executor::Executor;
use crate::types::{
    ConsensusConfig, NodeId, PeerMessage, PrepareReply, PromiseStatus, ProposalNumber,
    ProtocolMode,
};
use crate::verification::{VerificationEngine, VerifyRecord};

/// Per-peer acceptor state.
///
/// `promised_max` is non-decreasing: it only ever moves to a strictly
/// greater `(n, proposerId)` pair, whether through an incoming prepare or
/// this peer's own proposals.
pub struct AcceptorState {
    promised_max: Mutex<Option<ProposalNumber>>,
    accepted: Mutex<Option<(ProposalNumber, Value)>>,
}

impl AcceptorState {
    pub fn new() -> Self {
        Self {
            promised_max: Mutex::new(None),
            accepted: Mutex::new(None),
        }
    }

    pub fn promised_max(&self) -> Option<ProposalNumber> {
        self.promised_max.lock().clone()
    }

    /// Highest proposal counter this peer has seen, from any proposer. New
    /// local proposals start above it so they are not dead on arrival.
    pub fn highest_number(&self) -> u64 {
        self.promised_max.lock().as_ref().map(|p| p.number).unwrap_or(0)
    }

    /// The most recently accepted proposal, if any.
    pub fn accepted(&self) -> Option<(ProposalNumber, Value)> {
        self.accepted.lock().clone()
    }

    /// Promise `incoming` iff it is strictly greater than anything promised
    /// so far.
    fn try_promise(&self, incoming: ProposalNumber) -> bool {
        let mut promised = self.promised_max.lock();
        match promised.as_ref() {
            Some(current) if incoming <= *current => false,
            _ => {
                *promised = Some(incoming);
                true
            }
        }
    }

    /// A proposer promises its own number before canvassing anyone else, so
    /// concurrent lower-numbered prepares are refused here too.
    pub fn note_own_proposal(&self, number: ProposalNumber) {
        self.try_promise(number);
    }

    fn is_current(&self, incoming: &ProposalNumber) -> bool {
        self.promised_max.lock().as_ref() == Some(incoming)
    }
}

impl Default for AcceptorState {
    fn default() -> Self {
        Self::new()
    }
}

/// Handles the protocol-plane messages addressed to this peer as an
/// acceptor: prepare, propose, the legacy learn envelope, and feasibility
/// queries.
pub struct Acceptor {
    directory: Arc<PeerDirectory>,
    executor: Arc<Executor>,
    verification: Arc<VerificationEngine>,
    state: Arc<AcceptorState>,
    config: ConsensusConfig,
}

impl Acceptor {
    pub fn new(
        directory: Arc<PeerDirectory>,
        executor: Arc<Executor>,
        verification: Arc<VerificationEngine>,
        state: Arc<AcceptorState>,
        config: ConsensusConfig,
    ) -> Self {
        Self {
            directory,
            executor,
            verification,
            state,
            config,
        }
    }

    /// Phase 1: promise iff the pair `(n, proposerId)` beats everything
    /// promised so far.
    pub fn handle_prepare(&self, proposal_number: u64, proposer_id: NodeId) -> PrepareReply {
        let incoming = ProposalNumber::new(proposal_number, proposer_id);
        if self.state.try_promise(incoming.clone()) {
            info!(proposal = %incoming, "promised");
            PrepareReply {
                status: PromiseStatus::Promise,
                proposal_number,
            }
        } else {
            debug!(proposal = %incoming, promised = ?self.state.promised_max(), "rejected stale prepare");
            PrepareReply {
                status: PromiseStatus::Reject,
                proposal_number,
            }
        }
    }

    /// Phase 2: validate at the promised number, vote, and (in byzantine
    /// mode) broadcast the vote to every peer except the proposer. A stale
    /// proposal is voted down but the rejection is still broadcast, so the
    /// cluster's tallies agree on who said what.
    pub fn handle_propose(
        &self,
        proposal_number: u64,
        action: Value,
        proposer_id: NodeId,
    ) -> Verdict {
        let incoming = ProposalNumber::new(proposal_number, proposer_id.clone());
        let vote = if self.state.is_current(&incoming) {
            let verdict = self.executor.state_machine().validate(&action);
            if verdict.is_approved() {
                *self.state.accepted.lock() = Some((incoming.clone(), action.clone()));
            }
            info!(proposal = %incoming, %verdict, "voted on proposal");
            verdict
        } else {
            debug!(proposal = %incoming, promised = ?self.state.promised_max(), "rejected stale proposal");
            Verdict::Rejected
        };

        if self.config.mode == ProtocolMode::Byzantine {
            // Own vote goes straight into the local tally; the broadcast
            // reaches everyone else except the proposer.
            self.verification.record_vote(
                incoming.clone(),
                proposer_id.clone(),
                VerifyRecord {
                    voter: self.directory.self_id().clone(),
                    status: vote,
                    action: action.clone(),
                },
            );
            broadcast_vote(
                Arc::clone(&self.directory),
                proposal_number,
                proposer_id,
                vote,
                action,
            );
        }

        vote
    }

    /// Incoming vote broadcast from a fellow acceptor (or the proposer's
    /// own vote).
    pub fn handle_verify(
        &self,
        proposal_number: u64,
        status: Verdict,
        action: Value,
        node_id: NodeId,
        proposer_id: NodeId,
    ) {
        let number = ProposalNumber::new(proposal_number, proposer_id.clone());
        self.verification.record_vote(
            number,
            proposer_id,
            VerifyRecord {
                voter: node_id,
                status,
                action,
            },
        );
    }

    /// Legacy learn envelope from the classic protocol variant: apply the
    /// command directly, deduplicated through the executed-set.
    pub fn handle_legacy_learn(&self, data: &Value) -> &'static str {
        self.executor.apply_once(data);
        "learned"
    }

    /// Feasibility probe: judge the command locally, mutate nothing.
    pub fn handle_query(&self, action: &Value) -> Verdict {
        self.executor.state_machine().validate(action)
    }
}

/// Broadcast a verify vote to every reputable peer except the proposer and
/// the sender itself. Sends are fire-and-forget on their own tasks; an
/// unreachable peer is that peer's missing vote, not our problem.
pub(crate) fn broadcast_vote(
    directory: Arc<PeerDirectory>,
    proposal_number: u64,
    proposer_id: NodeId,
    status: Verdict,
    action: Value,
) {
    let self_id = directory.self_id().clone();
    for (peer_id, record) in directory.reputable_peers() {
        if peer_id == proposer_id || peer_id == self_id {
            continue;
        }
        let endpoint = match record.endpoint() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(peer = %peer_id, error = %e, "bad peer url, vote not sent");
                continue;
            }
        };
        let message = PeerMessage::Verify {
            proposal_number,
            status,
            action: action.clone(),
            node_id: self_id.clone(),
            proposer_id: proposer_id.clone(),
        };
        let addr = endpoint.verify_addr();
        tokio::spawn(async move {
            if let Err(e) = send_json(&addr, &message).await {
                debug!(%addr, error = %e, "verify broadcast failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promise_is_monotone() {
        let state = AcceptorState::new();
        assert!(state.try_promise(ProposalNumber::new(5, "node-1")));
        assert!(!state.try_promise(ProposalNumber::new(5, "node-1")), "re-promising the same number is refused");
        assert!(!state.try_promise(ProposalNumber::new(4, "node-2")));
        assert!(state.try_promise(ProposalNumber::new(6, "node-2")));
        assert_eq!(state.highest_number(), 6);
    }

    #[test]
    fn test_equal_counter_resolves_by_proposer_id() {
        let state = AcceptorState::new();
        assert!(state.try_promise(ProposalNumber::new(5, "node-1")));
        // Same counter from a lexicographically greater proposer wins.
        assert!(state.try_promise(ProposalNumber::new(5, "node-2")));
        assert!(!state.try_promise(ProposalNumber::new(5, "node-1")));
    }

    #[test]
    fn test_own_proposal_blocks_lower_prepares() {
        let state = AcceptorState::new();
        state.note_own_proposal(ProposalNumber::new(6, "node-2"));
        assert!(!state.try_promise(ProposalNumber::new(5, "node-1")));
    }
}
