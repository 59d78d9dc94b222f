//! Cross-verification: how every honest acceptor independently derives the
//! same outcome and the same set of liars.
//!
//! Acceptors broadcast their votes to each other; each one collects votes
//! per proposal, waits out a fixed window, and then evaluates the tally on
//! its own. Because the evaluation is a pure function of the (reputation-
//! filtered) vote set, honest peers holding the same votes reach identical
//! conclusions without any further coordination. The outcome travels back to
//! the proposer as a `learn` message; disagreeing peers pay in reputation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use ledgermesh_ledger::{canonical_json, Verdict};
use ledgermesh_transport::send_json;

use crate::directory::PeerDirectory;
use crate::executor::Executor;
use crate::reputation::ReputationController;
use crate::types::{ConsensusConfig, NodeId, PeerMessage, ProposalNumber};

/// One collected vote.
#[derive(Debug, Clone)]
pub struct VerifyRecord {
    pub voter: NodeId,
    pub status: Verdict,
    pub action: Value,
}

/// What a tally evaluation concluded.
#[derive(Debug)]
pub enum VerificationOutcome {
    /// Fewer than three reputable witnesses: the round is abandoned with no
    /// side effects at all.
    InsufficientWitnesses { witnesses: usize },
    /// The approval threshold was met; `action` is the plurality command and
    /// `malicious` the peers that dissented from it.
    Approved {
        action: Value,
        malicious: HashSet<NodeId>,
    },
    /// The approval threshold was missed; the approvers of the failed
    /// proposal are the dissenters.
    Rejected { malicious: HashSet<NodeId> },
}

/// Evaluate a reputation-filtered tally.
///
/// Pure so that every peer holding the same votes derives the same result:
/// `f = ⌊(T−1)/3⌋`, threshold `2f+1`; on approval the plurality command wins
/// with ties broken by lexicographic order of the canonical JSON.
pub fn evaluate_tally(records: &[VerifyRecord]) -> VerificationOutcome {
    let total = records.len();
    if total < 3 {
        return VerificationOutcome::InsufficientWitnesses { witnesses: total };
    }
    let f = (total - 1) / 3;
    let threshold = 2 * f + 1;

    let approvals = records.iter().filter(|r| r.status.is_approved()).count();
    if approvals < threshold {
        let malicious = records
            .iter()
            .filter(|r| r.status.is_approved())
            .map(|r| r.voter.clone())
            .collect();
        return VerificationOutcome::Rejected { malicious };
    }

    // Group approvals by canonical command; plurality wins.
    let mut groups: HashMap<String, (usize, Value)> = HashMap::new();
    for record in records.iter().filter(|r| r.status.is_approved()) {
        let key = canonical_json(&record.action);
        let entry = groups.entry(key).or_insert((0, record.action.clone()));
        entry.0 += 1;
    }
    let (majority_key, (_, majority_action)) = groups
        .iter()
        .max_by(|(ka, (ca, _)), (kb, (cb, _))| ca.cmp(cb).then(kb.cmp(ka)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .expect("threshold met implies at least one approval");

    let malicious = records
        .iter()
        .filter(|r| !r.status.is_approved() || canonical_json(&r.action) != majority_key)
        .map(|r| r.voter.clone())
        .collect();

    VerificationOutcome::Approved {
        action: majority_action,
        malicious,
    }
}

struct Tally {
    proposer: NodeId,
    deadline: Instant,
    records: Vec<VerifyRecord>,
}

/// Per-peer verification collector and evaluator.
///
/// Votes stream in from the verification listener; a single dispatcher task
/// sleeps until the earliest pending deadline and processes every expired
/// tally, rather than burning one timer task per proposal.
pub struct VerificationEngine {
    directory: Arc<PeerDirectory>,
    executor: Arc<Executor>,
    reputation: Arc<ReputationController>,
    config: ConsensusConfig,
    tallies: Mutex<HashMap<ProposalNumber, Tally>>,
    wakeup: Notify,
}

impl VerificationEngine {
    pub fn new(
        directory: Arc<PeerDirectory>,
        executor: Arc<Executor>,
        reputation: Arc<ReputationController>,
        config: ConsensusConfig,
    ) -> Self {
        Self {
            directory,
            executor,
            reputation,
            config,
            tallies: Mutex::new(HashMap::new()),
            wakeup: Notify::new(),
        }
    }

    /// Record a vote; the window for a proposal opens at its first vote.
    /// Late votes (after the tally fired) and repeat votes from the same
    /// peer are dropped.
    pub fn record_vote(&self, number: ProposalNumber, proposer: NodeId, record: VerifyRecord) {
        let mut tallies = self.tallies.lock();
        let tally = tallies.entry(number.clone()).or_insert_with(|| {
            debug!(proposal = %number, "verification window opened");
            Tally {
                proposer,
                deadline: Instant::now() + self.config.verify_window,
                records: Vec::new(),
            }
        });
        if tally.records.iter().any(|r| r.voter == record.voter) {
            debug!(proposal = %number, voter = %record.voter, "duplicate vote ignored");
            return;
        }
        tally.records.push(record);
        drop(tallies);
        self.wakeup.notify_one();
    }

    /// Start the deadline dispatcher.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.dispatch_loop().await;
        })
    }

    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            let next_deadline = self
                .tallies
                .lock()
                .values()
                .map(|t| t.deadline)
                .min();
            match next_deadline {
                None => self.wakeup.notified().await,
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = self.wakeup.notified() => {}
                    }
                }
            }

            let now = Instant::now();
            let expired: Vec<(ProposalNumber, Tally)> = {
                let mut tallies = self.tallies.lock();
                let keys: Vec<ProposalNumber> = tallies
                    .iter()
                    .filter(|(_, t)| t.deadline <= now)
                    .map(|(n, _)| n.clone())
                    .collect();
                keys.into_iter()
                    .filter_map(|n| tallies.remove(&n).map(|t| (n, t)))
                    .collect()
            };
            for (number, tally) in expired {
                self.conclude(number, tally).await;
            }
        }
    }

    /// Run the cross-verification algorithm for one expired tally.
    async fn conclude(&self, number: ProposalNumber, tally: Tally) {
        // Votes from peers below the participation threshold are ignored
        // entirely: they count toward neither numerator nor denominator.
        let reputable: Vec<VerifyRecord> = tally
            .records
            .into_iter()
            .filter(|r| self.directory.is_reputable(&r.voter))
            .collect();

        match evaluate_tally(&reputable) {
            VerificationOutcome::InsufficientWitnesses { witnesses } => {
                warn!(proposal = %number, witnesses, "insufficient witnesses, abandoning verification");
            }
            VerificationOutcome::Approved { action, malicious } => {
                info!(
                    proposal = %number,
                    witnesses = reputable.len(),
                    malicious = malicious.len(),
                    "verification approved"
                );
                self.send_learn(&number, &tally.proposer, &action, &malicious)
                    .await;
                self.executor.apply_once(&action);
                self.reputation.record_round_local(&malicious);
            }
            VerificationOutcome::Rejected { malicious } => {
                info!(
                    proposal = %number,
                    witnesses = reputable.len(),
                    malicious = malicious.len(),
                    "verification rejected the proposal"
                );
                self.reputation.record_round_local(&malicious);
            }
        }
    }

    async fn send_learn(
        &self,
        number: &ProposalNumber,
        proposer: &NodeId,
        action: &Value,
        malicious: &HashSet<NodeId>,
    ) {
        let Some(endpoint) = self.directory.endpoint(proposer) else {
            warn!(proposal = %number, %proposer, "proposer not in directory, learn not sent");
            return;
        };
        let mut malicious_nodes: Vec<NodeId> = malicious.iter().cloned().collect();
        malicious_nodes.sort();
        let message = PeerMessage::Learn {
            proposal_number: number.number,
            action: action.clone(),
            node_id: self.directory.self_id().clone(),
            malicious_nodes,
        };
        if let Err(e) = send_json(&endpoint.learn_addr(), &message).await {
            warn!(proposal = %number, %proposer, error = %e, "failed to send learn");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vote(voter: &str, status: Verdict, action: Value) -> VerifyRecord {
        VerifyRecord {
            voter: voter.to_string(),
            status,
            action,
        }
    }

    fn deposit() -> Value {
        json!({"action": "deposit", "name": "Alice", "amount": 10.0})
    }

    #[test]
    fn test_unanimous_approval_commits() {
        let records = vec![
            vote("node-1", Verdict::Approved, deposit()),
            vote("node-2", Verdict::Approved, deposit()),
            vote("node-3", Verdict::Approved, deposit()),
        ];
        match evaluate_tally(&records) {
            VerificationOutcome::Approved { action, malicious } => {
                assert_eq!(action, deposit());
                assert!(malicious.is_empty());
            }
            other => panic!("expected approval, got {other:?}"),
        }
    }

    #[test]
    fn test_single_dissenter_is_flagged() {
        // Four voters, one always-rejecting peer: f = 1, threshold = 3.
        let records = vec![
            vote("node-1", Verdict::Approved, deposit()),
            vote("node-2", Verdict::Approved, deposit()),
            vote("node-3", Verdict::Approved, deposit()),
            vote("node-4", Verdict::Rejected, deposit()),
        ];
        match evaluate_tally(&records) {
            VerificationOutcome::Approved { malicious, .. } => {
                assert_eq!(malicious.len(), 1);
                assert!(malicious.contains("node-4"));
            }
            other => panic!("expected approval, got {other:?}"),
        }
    }

    #[test]
    fn test_wrong_command_approver_is_flagged() {
        let forged = json!({"action": "deposit", "name": "Mallory", "amount": 999.0});
        let records = vec![
            vote("node-1", Verdict::Approved, deposit()),
            vote("node-2", Verdict::Approved, deposit()),
            vote("node-3", Verdict::Approved, deposit()),
            vote("node-4", Verdict::Approved, forged),
        ];
        match evaluate_tally(&records) {
            VerificationOutcome::Approved { action, malicious } => {
                assert_eq!(action, deposit());
                assert!(malicious.contains("node-4"));
                assert_eq!(malicious.len(), 1);
            }
            other => panic!("expected approval, got {other:?}"),
        }
    }

    #[test]
    fn test_unanimous_rejection_fails_the_proposal() {
        let records = vec![
            vote("node-1", Verdict::Rejected, deposit()),
            vote("node-2", Verdict::Rejected, deposit()),
            vote("node-3", Verdict::Rejected, deposit()),
        ];
        match evaluate_tally(&records) {
            VerificationOutcome::Rejected { malicious } => {
                assert!(malicious.is_empty(), "no approvers to penalise");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_minority_approvers_of_failed_proposal_are_flagged() {
        let records = vec![
            vote("node-1", Verdict::Approved, deposit()),
            vote("node-2", Verdict::Rejected, deposit()),
            vote("node-3", Verdict::Rejected, deposit()),
            vote("node-4", Verdict::Rejected, deposit()),
        ];
        match evaluate_tally(&records) {
            VerificationOutcome::Rejected { malicious } => {
                assert_eq!(malicious.len(), 1);
                assert!(malicious.contains("node-1"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_two_witnesses_are_insufficient() {
        let records = vec![
            vote("node-2", Verdict::Approved, deposit()),
            vote("node-3", Verdict::Approved, deposit()),
        ];
        assert!(matches!(
            evaluate_tally(&records),
            VerificationOutcome::InsufficientWitnesses { witnesses: 2 }
        ));
    }

    #[test]
    fn test_plurality_tie_breaks_lexicographically() {
        let cmd_a = json!({"action": "deposit", "name": "Alice", "amount": 1.0});
        let cmd_b = json!({"action": "deposit", "name": "Bob", "amount": 1.0});
        // Two approvals each plus two rejections: T = 6, f = 1, threshold = 3.
        // Approvals (4) meet the threshold; the groups tie at two votes.
        let records = vec![
            vote("node-1", Verdict::Approved, cmd_a.clone()),
            vote("node-2", Verdict::Approved, cmd_a.clone()),
            vote("node-3", Verdict::Approved, cmd_b.clone()),
            vote("node-4", Verdict::Approved, cmd_b.clone()),
            vote("node-5", Verdict::Rejected, cmd_a.clone()),
            vote("node-6", Verdict::Rejected, cmd_a.clone()),
        ];
        match evaluate_tally(&records) {
            VerificationOutcome::Approved { action, malicious } => {
                // "…Alice…" sorts before "…Bob…" canonically.
                assert_eq!(action, cmd_a);
                assert_eq!(malicious.len(), 4);
            }
            other => panic!("expected approval, got {other:?}"),
        }
    }
}
