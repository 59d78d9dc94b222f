//! The seam between consensus and the ledger it replicates.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of a local feasibility check.
///
/// Also the wire value an acceptor votes with (`"approved"` / `"rejected"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Approved,
    Rejected,
}

impl Verdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, Verdict::Approved)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Approved => write!(f, "approved"),
            Verdict::Rejected => write!(f, "rejected"),
        }
    }
}

/// Errors from the ledger state machine.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The command payload does not decode to a known action.
    #[error("malformed command: {0}")]
    MalformedCommand(String),

    /// `create_account` for a name that already holds an account.
    #[error("account {0} already exists")]
    AccountExists(String),

    /// `deposit`/`withdraw` against a name with no account.
    #[error("no account found for {0}")]
    UnknownAccount(String),

    /// `withdraw` exceeding the available balance.
    #[error("insufficient funds in {name}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        name: String,
        balance: f64,
        requested: f64,
    },
}

/// Interface through which consensus delivers committed commands to the
/// external ledger.
///
/// Commands arrive as opaque JSON values; implementations decode and judge
/// them. The contract the consensus core relies on:
///
/// - `validate` is pure, side-effect free, and deterministic across peers
///   holding identical state; its verdicts are compared across the cluster.
/// - `apply` mutates state exactly as validated; at-most-once delivery is
///   the caller's responsibility (it tracks executed fingerprints), not the
///   implementation's.
/// - `query` is a local read and must never trigger replication.
pub trait StateMachine: Send + Sync {
    /// Judge whether `command` is feasible against current state.
    fn validate(&self, command: &Value) -> Verdict;

    /// Execute a committed command against the state.
    fn apply(&self, command: &Value) -> Result<(), LedgerError>;

    /// Read an account balance locally.
    fn query(&self, name: &str) -> Option<f64>;
}
