//! At-most-once command execution against the local state machine.

use std::sync::Arc;

use dashmap::DashSet;
use serde_json::Value;
use tracing::{debug, info, warn};

use ledgermesh_ledger::{fingerprint, Fingerprint, LedgerError, StateMachine};

/// Result of an idempotent apply attempt.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// First delivery: the command mutated the state machine.
    Applied,
    /// The fingerprint was already in the executed-set; nothing happened.
    Duplicate,
    /// The state machine refused the command (state diverged from what the
    /// cluster validated). The fingerprint is still recorded so redelivery
    /// cannot retry it.
    Failed(LedgerError),
}

impl ApplyOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied)
    }
}

/// The single gateway through which committed commands reach the state
/// machine.
///
/// Every delivery path (cross-verification commit, proposer learn outcome,
/// and the legacy learn envelope) funnels through [`Executor::apply_once`], so the
/// executed-set is the one place where at-most-once is enforced.
pub struct Executor {
    state_machine: Arc<dyn StateMachine>,
    executed: DashSet<Fingerprint>,
}

impl Executor {
    pub fn new(state_machine: Arc<dyn StateMachine>) -> Self {
        Self {
            state_machine,
            executed: DashSet::new(),
        }
    }

    pub fn state_machine(&self) -> &Arc<dyn StateMachine> {
        &self.state_machine
    }

    /// Apply `command` unless its fingerprint has been seen before.
    pub fn apply_once(&self, command: &Value) -> ApplyOutcome {
        let print = fingerprint(command);
        if !self.executed.insert(print.clone()) {
            debug!(fingerprint = %print, "duplicate delivery skipped");
            return ApplyOutcome::Duplicate;
        }
        match self.state_machine.apply(command) {
            Ok(()) => {
                info!(fingerprint = %print, "command applied");
                ApplyOutcome::Applied
            }
            Err(e) => {
                warn!(fingerprint = %print, error = %e, "committed command failed locally");
                ApplyOutcome::Failed(e)
            }
        }
    }

    /// Whether a command has already been delivered.
    pub fn already_executed(&self, command: &Value) -> bool {
        self.executed.contains(&fingerprint(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgermesh_ledger::BankingLedger;
    use serde_json::json;

    #[test]
    fn test_apply_once_deduplicates() {
        let ledger = Arc::new(BankingLedger::new());
        let executor = Executor::new(Arc::clone(&ledger) as _);

        let create = json!({"action": "create_account", "name": "Alice", "initial_balance": 100.0});
        assert!(executor.apply_once(&create).applied());
        assert!(matches!(
            executor.apply_once(&create),
            ApplyOutcome::Duplicate
        ));
        assert_eq!(ledger.balance("Alice"), Some(100.0));
    }

    #[test]
    fn test_key_order_does_not_defeat_dedup() {
        let ledger = Arc::new(BankingLedger::new());
        let executor = Executor::new(Arc::clone(&ledger) as _);
        executor.apply_once(
            &json!({"action": "create_account", "name": "Alice", "initial_balance": 10.0}),
        );

        let a: Value =
            serde_json::from_str(r#"{"action":"deposit","name":"Alice","amount":5.0}"#).unwrap();
        let b: Value =
            serde_json::from_str(r#"{"amount":5.0,"name":"Alice","action":"deposit"}"#).unwrap();
        assert!(executor.apply_once(&a).applied());
        assert!(matches!(executor.apply_once(&b), ApplyOutcome::Duplicate));
        assert_eq!(ledger.balance("Alice"), Some(15.0));
    }

    #[test]
    fn test_failed_apply_is_not_retried() {
        let ledger = Arc::new(BankingLedger::new());
        let executor = Executor::new(Arc::clone(&ledger) as _);

        // Deposit to a non-existent account fails, but stays recorded.
        let deposit = json!({"action": "deposit", "name": "Ghost", "amount": 1.0});
        assert!(matches!(
            executor.apply_once(&deposit),
            ApplyOutcome::Failed(_)
        ));
        assert!(matches!(
            executor.apply_once(&deposit),
            ApplyOutcome::Duplicate
        ));
    }
}
