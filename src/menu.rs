//! The interactive operator menu.
//!
//! Five numeric choices: create, deposit, withdraw, check, exit. The first
//! three are replicated writes driven through consensus; check is a
//! local-only read against this peer's ledger.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use ledgermesh_core::Node;
use ledgermesh_ledger::{BankingLedger, Command};

pub async fn run(node: &Node, ledger: &Arc<BankingLedger>) {
    let node_id = node.config().node_id.clone();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        println!();
        println!("--- Banking Service Menu for Node {node_id} ---");
        println!("1. Create Account");
        println!("2. Deposit Money");
        println!("3. Withdraw Money");
        println!("4. Check Balance");
        println!("5. Exit");

        let Some(choice) = prompt(&mut lines, "Enter your choice: ").await else {
            break;
        };

        match choice.as_str() {
            "1" => {
                let Some((name, amount)) = read_name_and_amount(
                    &mut lines,
                    "Enter account holder's name: ",
                    "Enter initial balance: ",
                )
                .await
                else {
                    continue;
                };
                submit(
                    node,
                    Command::CreateAccount {
                        name,
                        initial_balance: amount,
                    },
                )
                .await;
            }
            "2" => {
                let Some((name, amount)) = read_name_and_amount(
                    &mut lines,
                    "Enter account holder's name: ",
                    "Enter amount to deposit: ",
                )
                .await
                else {
                    continue;
                };
                submit(node, Command::Deposit { name, amount }).await;
            }
            "3" => {
                let Some((name, amount)) = read_name_and_amount(
                    &mut lines,
                    "Enter account holder's name: ",
                    "Enter amount to withdraw: ",
                )
                .await
                else {
                    continue;
                };
                submit(node, Command::Withdraw { name, amount }).await;
            }
            "4" => {
                let Some(name) = prompt(&mut lines, "Enter account holder's name: ").await else {
                    continue;
                };
                match ledger.balance(&name) {
                    Some(balance) => println!("{name}'s current balance: {balance}"),
                    None => println!("No account found for {name}."),
                }
            }
            "5" => {
                println!("Exiting Banking Service for Node {node_id}. Goodbye!");
                break;
            }
            _ => println!("Invalid choice. Please try again."),
        }
    }
}

async fn submit(node: &Node, command: Command) {
    println!("Submitting {} for consensus...", command.account());
    match node.submit(command.to_value()).await {
        Ok(committed) => println!("Committed: {committed}"),
        Err(e) => println!("Round aborted: {e}"),
    }
}

async fn prompt(lines: &mut Lines<BufReader<Stdin>>, text: &str) -> Option<String> {
    println!("{text}");
    let line = lines.next_line().await.ok().flatten()?;
    let trimmed = line.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

async fn read_name_and_amount(
    lines: &mut Lines<BufReader<Stdin>>,
    name_prompt: &str,
    amount_prompt: &str,
) -> Option<(String, f64)> {
    let name = prompt(lines, name_prompt).await?;
    let raw = prompt(lines, amount_prompt).await?;
    match raw.parse::<f64>() {
        Ok(amount) => Some((name, amount)),
        Err(_) => {
            println!("Not a number: {raw}");
            None
        }
    }
}
