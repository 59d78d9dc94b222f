//! Serialization laws for the wire protocol, checked property-style.

use proptest::prelude::*;
use serde_json::{json, Value};

use ledgermesh_consensus::{PeerMessage, PrepareReply, PromiseStatus};
use ledgermesh_ledger::{canonical_json, fingerprint, Command, Verdict};

fn account_name() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9_]{0,11}"
}

/// Amounts with a stable decimal representation, as the menu produces.
fn amount() -> impl Strategy<Value = f64> {
    (0u64..=1_000_000u64, 0u64..100u64).prop_map(|(whole, cents)| whole as f64 + cents as f64 / 100.0)
}

fn command() -> impl Strategy<Value = Command> {
    prop_oneof![
        (account_name(), amount()).prop_map(|(name, initial_balance)| Command::CreateAccount {
            name,
            initial_balance,
        }),
        (account_name(), amount()).prop_map(|(name, amount)| Command::Deposit { name, amount }),
        (account_name(), amount()).prop_map(|(name, amount)| Command::Withdraw { name, amount }),
    ]
}

fn node_id() -> impl Strategy<Value = String> {
    "node-[1-9]"
}

fn verdict() -> impl Strategy<Value = Verdict> {
    prop_oneof![Just(Verdict::Approved), Just(Verdict::Rejected)]
}

fn peer_message() -> impl Strategy<Value = PeerMessage> {
    prop_oneof![
        (1u64..10_000, node_id()).prop_map(|(proposal_number, proposer_id)| {
            PeerMessage::Prepare {
                proposal_number,
                proposer_id,
            }
        }),
        (1u64..10_000, command(), node_id()).prop_map(|(proposal_number, command, proposer_id)| {
            PeerMessage::Propose {
                proposal_number,
                action: command.to_value(),
                proposer_id,
            }
        }),
        (1u64..10_000, verdict(), command(), node_id(), node_id()).prop_map(
            |(proposal_number, status, command, node_id, proposer_id)| PeerMessage::Verify {
                proposal_number,
                status,
                action: command.to_value(),
                node_id,
                proposer_id,
            }
        ),
        (
            1u64..10_000,
            command(),
            node_id(),
            proptest::collection::vec(node_id(), 0..4)
        )
            .prop_map(|(proposal_number, command, node_id, malicious_nodes)| {
                PeerMessage::Learn {
                    proposal_number,
                    action: command.to_value(),
                    node_id,
                    malicious_nodes,
                }
            }),
    ]
}

proptest! {
    /// Serialising then deserialising any message yields the original.
    #[test]
    fn prop_peer_message_round_trip(message in peer_message()) {
        let encoded = serde_json::to_string(&message).unwrap();
        let decoded: PeerMessage = serde_json::from_str(&encoded).unwrap();
        prop_assert_eq!(message, decoded);
    }

    /// Commands survive the wire unchanged.
    #[test]
    fn prop_command_round_trip(command in command()) {
        let value = command.to_value();
        let decoded: Command = serde_json::from_value(value).unwrap();
        prop_assert_eq!(command, decoded);
    }

    /// The canonical form is stable under re-parsing, so fingerprints are
    /// identities, not accidents of formatting.
    #[test]
    fn prop_canonical_form_is_a_fixpoint(command in command()) {
        let value = command.to_value();
        let canonical = canonical_json(&value);
        let reparsed: Value = serde_json::from_str(&canonical).unwrap();
        prop_assert_eq!(canonical_json(&reparsed), canonical);
        prop_assert_eq!(fingerprint(&reparsed), fingerprint(&value));
    }

    /// Distinct commands never collide on fingerprints within a run.
    #[test]
    fn prop_fingerprint_separates_commands(a in command(), b in command()) {
        if a != b {
            prop_assert_ne!(fingerprint(&a.to_value()), fingerprint(&b.to_value()));
        }
    }
}

#[test]
fn test_prepare_reply_shapes() {
    let promise: PrepareReply =
        serde_json::from_value(json!({"status": "promise", "proposal_number": 4})).unwrap();
    assert_eq!(promise.status, PromiseStatus::Promise);

    let reject: PrepareReply =
        serde_json::from_value(json!({"status": "reject", "proposal_number": 4})).unwrap();
    assert_eq!(reject.status, PromiseStatus::Reject);
}

#[test]
fn test_verdict_is_a_bare_string_on_the_wire() {
    assert_eq!(serde_json::to_value(Verdict::Approved).unwrap(), json!("approved"));
    assert_eq!(serde_json::to_value(Verdict::Rejected).unwrap(), json!("rejected"));
}
