//! # LedgerMesh Consensus Core
//!
//! The replication and agreement subsystem: a multi-phase message protocol
//! that turns a client request into a globally agreed, at-most-once applied
//! state-machine command, under a bounded number of Byzantine peers.
//!
//! ## Round anatomy
//!
//! 1. **Prepare**: the proposer reserves a proposal number `(n, proposerId)`
//!    across a strict majority of the other active peers.
//! 2. **Propose**: the command is fanned out under the reserved number;
//!    every acceptor validates it against its own ledger and votes.
//! 3. **Cross-verify**: acceptors broadcast their votes to each other (never
//!    to the proposer) and, after a fixed window, each one independently
//!    tallies the reputation-filtered votes: with `f = ⌊(T−1)/3⌋` Byzantine
//!    peers tolerated, `2f+1` approvals commit the plurality command and
//!    flag every dissenter as malicious.
//! 4. **Learn**: each verifier unicasts its outcome to the proposer, which
//!    applies the *reconciled* command last and publishes the round's
//!    reputation deltas to the registry.
//!
//! ## Trust model
//!
//! Channels are assumed authenticated; Byzantine means protocol-level
//! deviation (lying, silence, inconsistent votes), not forgery. Misbehaviour
//! is punished through the reputation ledger: peers drifting below the
//! participation threshold stop counting toward any quorum until they earn
//! their way back.
//!
//! The state machine being replicated is external, reached through the
//! [`ledgermesh_ledger::StateMachine`] adapter; this crate treats commands
//! as opaque JSON values identified by their canonical fingerprints.

mod acceptor;
mod directory;
mod executor;
mod proposer;
mod reputation;
mod types;
mod verification;

pub use acceptor::{Acceptor, AcceptorState};
pub use directory::{
    DirectorySource, PeerDirectory, PeerRecord, DEFAULT_REPUTATION, REPUTATION_THRESHOLD,
};
pub use executor::{ApplyOutcome, Executor};
pub use proposer::{LearnCollector, LearnRecord, Proposer};
pub use reputation::{
    ReputationController, ReputationStore, AGREEMENT_REWARD, DISAGREEMENT_PENALTY,
};
pub use types::{
    ConsensusConfig, ConsensusError, ConsensusInstance, NodeId, PeerMessage, PrepareReply,
    PromiseStatus, ProposalNumber, ProtocolMode, RoundPhase,
};
pub use verification::{evaluate_tally, VerificationEngine, VerificationOutcome, VerifyRecord};
