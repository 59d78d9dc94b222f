//! # LedgerMesh Core
//!
//! Node orchestration for the LedgerMesh replicated banking ledger: the
//! configuration surface and the [`Node`] type that wires the wire
//! transport, consensus core, registry client, and ledger state machine
//! into one running peer.
//!
//! A peer's lifecycle:
//!
//! 1. [`NodeConfig::load`]: defaults, optionally overlaid by a YAML file
//!    and command-line flags.
//! 2. [`Node::new`]: assemble the shared state (peer directory, executor,
//!    acceptor, proposer, verification engine) around a host-supplied
//!    [`ledgermesh_ledger::StateMachine`].
//! 3. [`Node::start`]: register with the registry, mirror the membership
//!    view, announce to existing peers, and bring up the four listener
//!    planes plus the verification dispatcher.
//! 4. [`Node::submit`] / [`Node::query`]: the operator surface: replicated
//!    writes and local reads.
//! 5. [`Node::stop`]: deregister and tear down.

mod config;
mod node;

pub use config::NodeConfig;
pub use node::Node;
