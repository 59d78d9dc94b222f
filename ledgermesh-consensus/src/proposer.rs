//! Proposer-side orchestration: one client command, one consensus round.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use ledgermesh_ledger::{canonical_json, Verdict};
use ledgermesh_transport::request_json;

use crate::acceptor::{broadcast_vote, AcceptorState};
use crate::directory::{DirectorySource, PeerDirectory};
use crate::executor::Executor;
use crate::reputation::ReputationController;
use crate::types::{
    ConsensusConfig, ConsensusError, ConsensusInstance, NodeId, PeerMessage, PrepareReply,
    PromiseStatus, ProposalNumber, ProtocolMode, RoundPhase,
};

/// A verification outcome reported by one acceptor.
#[derive(Debug, Clone)]
pub struct LearnRecord {
    pub node_id: NodeId,
    pub action: Value,
    pub malicious_nodes: Vec<NodeId>,
}

/// Collects learn messages per proposal number on the proposer's behalf.
///
/// Fed by the learn listener; drained by the round driver. One record per
/// reporting peer; a retried learn is dropped here, and the executed-set
/// would stop it from double-applying anyway.
pub struct LearnCollector {
    pending: Mutex<HashMap<u64, Vec<LearnRecord>>>,
}

impl LearnCollector {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, proposal_number: u64, record: LearnRecord) {
        let mut pending = self.pending.lock();
        let records = pending.entry(proposal_number).or_default();
        if records.iter().any(|r| r.node_id == record.node_id) {
            debug!(proposal_number, node = %record.node_id, "duplicate learn ignored");
            return;
        }
        records.push(record);
    }

    pub fn count(&self, proposal_number: u64) -> usize {
        self.pending
            .lock()
            .get(&proposal_number)
            .map(|r| r.len())
            .unwrap_or(0)
    }

    pub fn take(&self, proposal_number: u64) -> Vec<LearnRecord> {
        self.pending
            .lock()
            .remove(&proposal_number)
            .unwrap_or_default()
    }
}

impl Default for LearnCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives a client command through prepare → propose → outcome.
///
/// In byzantine mode the outcome is the cross-verified learn consensus; the
/// proposer is the last peer to apply, using the reconciled action its
/// peers agreed on; its own copy of the command is never trusted over
/// theirs. In classic mode the propose replies themselves decide, and the
/// proposer distributes the outcome as a legacy learn envelope.
pub struct Proposer {
    directory: Arc<PeerDirectory>,
    source: Arc<dyn DirectorySource>,
    executor: Arc<Executor>,
    reputation: Arc<ReputationController>,
    acceptor_state: Arc<AcceptorState>,
    learns: Arc<LearnCollector>,
    config: ConsensusConfig,
    last_proposal: Mutex<u64>,
}

impl Proposer {
    pub fn new(
        directory: Arc<PeerDirectory>,
        source: Arc<dyn DirectorySource>,
        executor: Arc<Executor>,
        reputation: Arc<ReputationController>,
        acceptor_state: Arc<AcceptorState>,
        learns: Arc<LearnCollector>,
        config: ConsensusConfig,
    ) -> Self {
        Self {
            directory,
            source,
            executor,
            reputation,
            acceptor_state,
            learns,
            config,
            last_proposal: Mutex::new(0),
        }
    }

    /// Entry point for the learn listener.
    pub fn record_learn(&self, proposal_number: u64, record: LearnRecord) {
        if !self.directory.is_reputable(&record.node_id) {
            debug!(proposal_number, node = %record.node_id, "learn from excluded peer ignored");
            return;
        }
        self.learns.record(proposal_number, record);
    }

    /// Run one full consensus round for `command`. Returns the committed
    /// action, which in byzantine mode is the reconciled majority command,
    /// not necessarily this peer's own serialization of it.
    pub async fn propose(&self, command: Value) -> Result<Value, ConsensusError> {
        self.refresh_directory().await;

        let peers = self.directory.other_reputable_peers();
        if peers.is_empty() {
            return Err(ConsensusError::NoPeers);
        }

        let number = self.next_proposal_number();
        let mut instance = ConsensusInstance::new(number.clone(), command.clone());
        info!(proposal = %number, mode = %self.config.mode, "starting consensus round");

        // Prepare phase: canvass every other active peer serially.
        instance.promises = self.run_prepare(&number, &peers).await;
        let required = self.directory.prepare_majority();
        info!(
            proposal = %number,
            promises = instance.promises,
            required,
            "prepare phase finished"
        );
        if instance.promises < required {
            instance.phase = RoundPhase::Aborted;
            return Err(ConsensusError::NoQuorum {
                promises: instance.promises,
                required,
            });
        }

        instance.phase = RoundPhase::Proposing;
        match self.config.mode {
            ProtocolMode::Byzantine => self.run_byzantine_commit(&number, instance, command).await,
            ProtocolMode::Classic => self.run_classic_commit(&number, instance, command).await,
        }
    }

    /// Start each round from the freshest membership and reputation view
    /// the registry can give us; the cache serves if it cannot.
    async fn refresh_directory(&self) {
        match self.source.fetch_peers().await {
            Ok(snapshot) if !snapshot.is_empty() => self.directory.replace_all(snapshot),
            Ok(_) => warn!("registry returned an empty node list, keeping cached directory"),
            Err(e) => warn!(error = %e, "directory refresh failed, keeping cached view"),
        }
    }

    /// Strictly increasing, and always above every number this peer has
    /// promised, so a fresh proposal is not stillborn against an old one.
    fn next_proposal_number(&self) -> ProposalNumber {
        let mut last = self.last_proposal.lock();
        let next = (*last).max(self.acceptor_state.highest_number()) + 1;
        *last = next;
        let number = ProposalNumber::new(next, self.directory.self_id().clone());
        self.acceptor_state.note_own_proposal(number.clone());
        number
    }

    async fn run_prepare(
        &self,
        number: &ProposalNumber,
        peers: &[(NodeId, crate::directory::PeerRecord)],
    ) -> usize {
        let message = PeerMessage::Prepare {
            proposal_number: number.number,
            proposer_id: number.proposer.clone(),
        };
        let mut promises = 0;
        for (peer_id, record) in peers {
            let Ok(endpoint) = record.endpoint() else {
                warn!(peer = %peer_id, url = %record.url, "bad peer url, skipping prepare");
                continue;
            };
            match request_json(&endpoint.protocol_addr(), &message).await {
                Ok(reply) => match serde_json::from_value::<PrepareReply>(reply) {
                    Ok(PrepareReply {
                        status: PromiseStatus::Promise,
                        ..
                    }) => {
                        debug!(peer = %peer_id, proposal = %number, "promise received");
                        promises += 1;
                    }
                    Ok(_) => debug!(peer = %peer_id, proposal = %number, "prepare rejected"),
                    Err(e) => warn!(peer = %peer_id, error = %e, "unintelligible prepare reply"),
                },
                // Unreachable is indistinguishable from rejection.
                Err(e) => debug!(peer = %peer_id, error = %e, "prepare went unanswered"),
            }
        }
        promises
    }

    /// Byzantine path: fan out the proposal, cast our own vote into the
    /// cluster's tallies, then wait to be told what actually happened.
    async fn run_byzantine_commit(
        &self,
        number: &ProposalNumber,
        mut instance: ConsensusInstance,
        command: Value,
    ) -> Result<Value, ConsensusError> {
        self.fan_out_propose(number, &command);

        // The proposal implicitly carries our vote; broadcasting it lets
        // every acceptor tally the full reputable peer set, ourselves
        // included.
        let own_vote = self.executor.state_machine().validate(&command);
        info!(proposal = %number, verdict = %own_vote, "proposer self-vote");
        broadcast_vote(
            Arc::clone(&self.directory),
            number.number,
            number.proposer.clone(),
            own_vote,
            command.clone(),
        );

        instance.phase = RoundPhase::AwaitingLearn;
        let learns = self.collect_learns(number.number).await;
        instance.learns_received = learns.len();
        if learns.is_empty() {
            instance.phase = RoundPhase::Aborted;
            return Err(ConsensusError::NoOutcome(number.number));
        }

        // Honest verifiers all derive the same outcome; anything else means
        // the round cannot be trusted.
        let canonical = canonical_json(&learns[0].action);
        if learns
            .iter()
            .any(|l| canonical_json(&l.action) != canonical)
        {
            warn!(proposal = %number, "learned outcomes disagree, aborting");
            instance.phase = RoundPhase::Aborted;
            return Err(ConsensusError::InconsistentOutcomes(number.number));
        }
        let committed = learns[0].action.clone();

        // Malicious set: every peer any verifier flagged, plus reputable
        // acceptors that never reported back.
        let mut malicious: HashSet<NodeId> = learns
            .iter()
            .flat_map(|l| l.malicious_nodes.iter().cloned())
            .collect();
        let reporters: HashSet<&NodeId> = learns.iter().map(|l| &l.node_id).collect();
        for (peer_id, _) in self.directory.other_reputable_peers() {
            if !reporters.contains(&peer_id) {
                debug!(proposal = %number, peer = %peer_id, "peer stayed silent through the learn phase");
                malicious.insert(peer_id);
            }
        }

        // The proposer applies last, and applies what the cluster agreed
        // on, not what it originally sent.
        self.executor.apply_once(&committed);
        self.reputation.publish_round(&malicious).await;

        instance.phase = RoundPhase::Committed;
        info!(proposal = %number, learns = instance.learns_received, "round committed");
        Ok(committed)
    }

    /// Classic path: the propose replies decide directly, and the outcome
    /// is distributed as a legacy learn envelope.
    async fn run_classic_commit(
        &self,
        number: &ProposalNumber,
        mut instance: ConsensusInstance,
        command: Value,
    ) -> Result<Value, ConsensusError> {
        let message = PeerMessage::Propose {
            proposal_number: number.number,
            action: command.clone(),
            proposer_id: number.proposer.clone(),
        };
        let mut approvals = 0;
        for (peer_id, record) in self.directory.other_reputable_peers() {
            let Ok(endpoint) = record.endpoint() else {
                continue;
            };
            match request_json(&endpoint.protocol_addr(), &message).await {
                Ok(reply) => {
                    if serde_json::from_value::<Verdict>(reply).ok() == Some(Verdict::Approved) {
                        approvals += 1;
                    }
                }
                Err(e) => debug!(peer = %peer_id, error = %e, "propose went unanswered"),
            }
        }

        let required = self.directory.prepare_majority();
        if approvals < required {
            instance.phase = RoundPhase::Aborted;
            return Err(ConsensusError::Rejected(number.number));
        }

        let envelope = serde_json::json!({ "action": "learn", "data": command });
        for (peer_id, record) in self.directory.other_reputable_peers() {
            let Ok(endpoint) = record.endpoint() else {
                continue;
            };
            let addr = endpoint.protocol_addr();
            let envelope = envelope.clone();
            tokio::spawn(async move {
                if let Err(e) = request_json(&addr, &envelope).await {
                    debug!(%addr, error = %e, "learn distribution failed");
                }
            });
            debug!(peer = %peer_id, proposal = %number, "legacy learn dispatched");
        }

        self.executor.apply_once(&command);
        instance.phase = RoundPhase::Committed;
        info!(proposal = %number, approvals, "round committed (classic)");
        Ok(command)
    }

    /// Propose replies are only this peer's local view of validation; they
    /// decide nothing in byzantine mode, so the sends ride on their own
    /// tasks and the replies go straight to telemetry.
    fn fan_out_propose(&self, number: &ProposalNumber, command: &Value) {
        let message = PeerMessage::Propose {
            proposal_number: number.number,
            action: command.clone(),
            proposer_id: number.proposer.clone(),
        };
        for (peer_id, record) in self.directory.other_reputable_peers() {
            let Ok(endpoint) = record.endpoint() else {
                continue;
            };
            let addr = endpoint.protocol_addr();
            let message = message.clone();
            let proposal = number.to_string();
            tokio::spawn(async move {
                match request_json(&addr, &message).await {
                    Ok(reply) => debug!(peer = %peer_id, proposal = %proposal, ?reply, "propose acknowledged"),
                    Err(e) => debug!(peer = %peer_id, proposal = %proposal, error = %e, "propose went unanswered"),
                }
            });
        }
    }

    /// Wait out the learn phase: up to the request timeout for the first
    /// learn, then a fixed collection window from that first arrival.
    async fn collect_learns(&self, proposal_number: u64) -> Vec<LearnRecord> {
        let wait_start = Instant::now();
        while self.learns.count(proposal_number) == 0 {
            if wait_start.elapsed() >= self.config.request_timeout {
                return self.learns.take(proposal_number);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }

        let window_end = Instant::now() + self.config.learn_window;
        while Instant::now() < window_end {
            tokio::time::sleep(self.config.poll_interval).await;
        }
        self.learns.take(proposal_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_learn_collector_dedups_by_reporter() {
        let collector = LearnCollector::new();
        let learn = LearnRecord {
            node_id: "node-3".to_string(),
            action: json!({"action": "deposit", "name": "Alice", "amount": 10.0}),
            malicious_nodes: vec![],
        };
        collector.record(7, learn.clone());
        collector.record(7, learn); // retry
        assert_eq!(collector.count(7), 1);

        let drained = collector.take(7);
        assert_eq!(drained.len(), 1);
        assert_eq!(collector.count(7), 0);
    }

    #[test]
    fn test_learn_collector_separates_proposals() {
        let collector = LearnCollector::new();
        for n in [1u64, 2] {
            collector.record(
                n,
                LearnRecord {
                    node_id: "node-2".to_string(),
                    action: json!({"n": n}),
                    malicious_nodes: vec![],
                },
            );
        }
        assert_eq!(collector.count(1), 1);
        assert_eq!(collector.count(2), 1);
    }
}
