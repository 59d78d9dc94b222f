//! # LedgerMesh Account Ledger
//!
//! The replicated state machine behind the consensus core: a small banking
//! ledger holding named accounts with balances, together with the adapter
//! interface through which committed commands reach it.
//!
//! The consensus layer treats commands as opaque JSON values. This crate owns
//! everything that gives those values meaning:
//!
//! - [`Command`]: the typed payloads (`create_account` / `deposit` /
//!   `withdraw`) and their wire shape
//! - [`canonical_json`] / [`fingerprint`]: the canonical serialization and
//!   content hash used for command equality and at-most-once application
//! - [`StateMachine`]: the adapter trait (validate / apply / query) the
//!   consensus core drives
//! - [`BankingLedger`]: the in-memory account table implementing it
//!
//! `validate` must be pure and deterministic across peers: every honest peer
//! evaluates the same command against the same replicated state and must
//! reach the same verdict, because those verdicts are what the cluster
//! cross-checks to spot lying peers.

mod accounts;
mod adapter;
mod command;

pub use accounts::{Account, BankingLedger};
pub use adapter::{LedgerError, StateMachine, Verdict};
pub use command::{canonical_json, fingerprint, Command, Fingerprint};
