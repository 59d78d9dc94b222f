//! In-memory account table.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::adapter::{LedgerError, StateMachine, Verdict};
use crate::command::Command;

/// One row of the account table.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    /// Autoincrementing id, assigned at creation.
    pub id: u64,
    pub name: String,
    pub balance: f64,
}

/// The banking ledger: named accounts with balances, keyed by holder name.
///
/// State is in-memory only; replication across restarts is the cluster's
/// job, not this table's. All access is serialized through one mutex so
/// `validate` and `apply` observe a consistent view, matching the
/// single-threaded contract the consensus core assumes of its state machine.
pub struct BankingLedger {
    inner: Mutex<LedgerInner>,
}

struct LedgerInner {
    next_id: u64,
    accounts: HashMap<String, Account>,
}

impl BankingLedger {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LedgerInner {
                next_id: 1,
                accounts: HashMap::new(),
            }),
        }
    }

    /// Current balance for `name`, if an account exists.
    pub fn balance(&self, name: &str) -> Option<f64> {
        self.inner.lock().accounts.get(name).map(|a| a.balance)
    }

    /// Snapshot of every account, ordered by id.
    pub fn accounts(&self) -> Vec<Account> {
        let inner = self.inner.lock();
        let mut rows: Vec<Account> = inner.accounts.values().cloned().collect();
        rows.sort_by_key(|a| a.id);
        rows
    }

    fn decode(command: &Value) -> Result<Command, LedgerError> {
        serde_json::from_value(command.clone())
            .map_err(|e| LedgerError::MalformedCommand(e.to_string()))
    }
}

impl Default for BankingLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine for BankingLedger {
    fn validate(&self, command: &Value) -> Verdict {
        let command = match Self::decode(command) {
            Ok(command) => command,
            Err(e) => {
                debug!(error = %e, "rejecting undecodable command");
                return Verdict::Rejected;
            }
        };
        let inner = self.inner.lock();
        match command {
            Command::CreateAccount { .. } => Verdict::Approved,
            Command::Deposit { ref name, .. } => {
                if inner.accounts.contains_key(name) {
                    Verdict::Approved
                } else {
                    Verdict::Rejected
                }
            }
            Command::Withdraw { ref name, amount } => match inner.accounts.get(name) {
                Some(account) if account.balance >= amount => Verdict::Approved,
                _ => Verdict::Rejected,
            },
        }
    }

    fn apply(&self, command: &Value) -> Result<(), LedgerError> {
        let command = Self::decode(command)?;
        let mut inner = self.inner.lock();
        match command {
            Command::CreateAccount {
                name,
                initial_balance,
            } => {
                if inner.accounts.contains_key(&name) {
                    return Err(LedgerError::AccountExists(name));
                }
                let id = inner.next_id;
                inner.next_id += 1;
                info!(account = %name, id, balance = initial_balance, "account created");
                inner.accounts.insert(
                    name.clone(),
                    Account {
                        id,
                        name,
                        balance: initial_balance,
                    },
                );
                Ok(())
            }
            Command::Deposit { name, amount } => {
                let account = inner
                    .accounts
                    .get_mut(&name)
                    .ok_or_else(|| LedgerError::UnknownAccount(name.clone()))?;
                account.balance += amount;
                info!(account = %name, amount, balance = account.balance, "deposit applied");
                Ok(())
            }
            Command::Withdraw { name, amount } => {
                let account = inner
                    .accounts
                    .get_mut(&name)
                    .ok_or_else(|| LedgerError::UnknownAccount(name.clone()))?;
                if account.balance < amount {
                    warn!(account = %name, balance = account.balance, amount, "withdrawal exceeds balance");
                    return Err(LedgerError::InsufficientFunds {
                        name,
                        balance: account.balance,
                        requested: amount,
                    });
                }
                account.balance -= amount;
                info!(account = %name, amount, balance = account.balance, "withdrawal applied");
                Ok(())
            }
        }
    }

    fn query(&self, name: &str) -> Option<f64> {
        self.balance(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create(name: &str, balance: f64) -> Value {
        json!({"action": "create_account", "name": name, "initial_balance": balance})
    }

    #[test]
    fn test_create_then_deposit_then_withdraw() {
        let ledger = BankingLedger::new();
        ledger.apply(&create("Alice", 100.0)).unwrap();
        ledger
            .apply(&json!({"action": "deposit", "name": "Alice", "amount": 25.0}))
            .unwrap();
        ledger
            .apply(&json!({"action": "withdraw", "name": "Alice", "amount": 30.0}))
            .unwrap();
        assert_eq!(ledger.balance("Alice"), Some(95.0));
    }

    #[test]
    fn test_validate_rules() {
        let ledger = BankingLedger::new();
        ledger.apply(&create("Alice", 50.0)).unwrap();

        // create_account is always feasible
        assert_eq!(ledger.validate(&create("Bob", 0.0)), Verdict::Approved);
        // deposit requires the account to exist
        assert_eq!(
            ledger.validate(&json!({"action": "deposit", "name": "Alice", "amount": 1.0})),
            Verdict::Approved
        );
        assert_eq!(
            ledger.validate(&json!({"action": "deposit", "name": "Nobody", "amount": 1.0})),
            Verdict::Rejected
        );
        // withdraw additionally requires cover
        assert_eq!(
            ledger.validate(&json!({"action": "withdraw", "name": "Alice", "amount": 50.0})),
            Verdict::Approved
        );
        assert_eq!(
            ledger.validate(&json!({"action": "withdraw", "name": "Alice", "amount": 80.0})),
            Verdict::Rejected
        );
    }

    #[test]
    fn test_malformed_commands_are_rejected_not_fatal() {
        let ledger = BankingLedger::new();
        let garbage = json!({"action": "transmogrify", "target": 7});
        assert_eq!(ledger.validate(&garbage), Verdict::Rejected);
        assert!(matches!(
            ledger.apply(&garbage),
            Err(LedgerError::MalformedCommand(_))
        ));
    }

    #[test]
    fn test_overdraw_leaves_balance_untouched() {
        let ledger = BankingLedger::new();
        ledger.apply(&create("Alice", 50.0)).unwrap();
        let err = ledger
            .apply(&json!({"action": "withdraw", "name": "Alice", "amount": 80.0}))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(ledger.balance("Alice"), Some(50.0));
    }

    #[test]
    fn test_account_ids_autoincrement() {
        let ledger = BankingLedger::new();
        ledger.apply(&create("Alice", 1.0)).unwrap();
        ledger.apply(&create("Bob", 2.0)).unwrap();
        let rows = ledger.accounts();
        assert_eq!(rows[0].id, 1);
        assert_eq!(rows[1].id, 2);
    }
}
