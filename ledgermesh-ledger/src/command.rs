//! Command payloads and their canonical form.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A client command against the account ledger.
///
/// The wire shape is the flat object the operator menu produces, e.g.
/// `{"action":"deposit","name":"Alice","amount":10.0}`. Equality is
/// structural over the canonical serialization, not over the in-memory
/// representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    CreateAccount {
        name: String,
        initial_balance: f64,
    },
    Deposit {
        name: String,
        amount: f64,
    },
    Withdraw {
        name: String,
        amount: f64,
    },
}

impl Command {
    /// The account this command touches.
    pub fn account(&self) -> &str {
        match self {
            Command::CreateAccount { name, .. }
            | Command::Deposit { name, .. }
            | Command::Withdraw { name, .. } => name,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("command serialization is infallible")
    }
}

/// Content hash of a command's canonical form, hex encoded.
///
/// Keys the executed-set that enforces at-most-once application.
pub type Fingerprint = String;

/// Serialize `value` canonically: object keys sorted, arrays in order,
/// scalars in serde_json's stable formatting.
///
/// Two structurally equal values always canonicalize to the same byte
/// string regardless of how their maps were built, so hashing the canonical
/// form gives a peer-independent identity for a command.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Deterministic blake3 hash of the canonical form.
pub fn fingerprint(value: &Value) -> Fingerprint {
    blake3::hash(canonical_json(value).as_bytes())
        .to_hex()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_wire_shape() {
        let cmd = Command::CreateAccount {
            name: "Alice".to_string(),
            initial_balance: 100.0,
        };
        assert_eq!(
            cmd.to_value(),
            json!({"action": "create_account", "name": "Alice", "initial_balance": 100.0})
        );

        let parsed: Command =
            serde_json::from_value(json!({"action": "withdraw", "name": "Bob", "amount": 5.5}))
                .unwrap();
        assert_eq!(
            parsed,
            Command::Withdraw {
                name: "Bob".to_string(),
                amount: 5.5
            }
        );
    }

    #[test]
    fn test_canonical_form_sorts_keys() {
        let value = json!({"name": "Alice", "action": "deposit", "amount": 10.0});
        assert_eq!(
            canonical_json(&value),
            r#"{"action":"deposit","amount":10.0,"name":"Alice"}"#
        );
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": 2, "x": 3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": {"x": 3, "y": 2}, "b": 1}"#).unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_distinguishes_amounts() {
        let deposit_10 = json!({"action": "deposit", "name": "Alice", "amount": 10.0});
        let deposit_20 = json!({"action": "deposit", "name": "Alice", "amount": 20.0});
        assert_ne!(fingerprint(&deposit_10), fingerprint(&deposit_20));
    }
}
