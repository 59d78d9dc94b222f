//! # LedgerMesh Admin CLI
//!
//! Command-line client for inspecting and administering a LedgerMesh
//! cluster through its registry: membership listing, reputation queries and
//! adjustments, and deregistration of dead peers.
//!
//! ```bash
//! # Who is in the cluster, and how trusted are they?
//! ledgermesh-cli nodes
//!
//! # Punish a peer by the protocol's standard step
//! ledgermesh-cli reputation decrease node-4
//!
//! # Remove a peer that crashed without deregistering
//! ledgermesh-cli deregister node-4
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use ledgermesh_registry::RegistryClient;

/// Admin client for the LedgerMesh registry.
#[derive(Parser)]
#[command(name = "ledgermesh-cli")]
#[command(about = "Administer a LedgerMesh cluster through its registry")]
#[command(version)]
struct Cli {
    /// Registry endpoint.
    #[arg(long, global = true, default_value = "http://127.0.0.1:5000")]
    registry: String,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = Format::Table)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List every registered node with its URL and reputation.
    Nodes,
    /// Show the registered node count.
    Total,
    /// Query or adjust a node's reputation.
    Reputation {
        #[command(subcommand)]
        action: ReputationAction,
    },
    /// Remove a node from the registry.
    Deregister {
        /// Node to remove.
        node_id: String,
    },
}

#[derive(Subcommand)]
enum ReputationAction {
    /// Read a node's current score.
    Get { node_id: String },
    /// Raise a node's score (default +10, capped at 100).
    Increase {
        node_id: String,
        #[arg(long)]
        amount: Option<i64>,
    },
    /// Lower a node's score (default −20, floored at 0).
    Decrease {
        node_id: String,
        #[arg(long)]
        amount: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = RegistryClient::new(&cli.registry);

    match cli.command {
        Commands::Nodes => {
            let nodes = client.nodes().await?;
            match cli.format {
                Format::Json => {
                    println!("{}", serde_json::to_string_pretty(&nodes)?);
                }
                Format::Table => {
                    let mut rows: Vec<_> = nodes.into_iter().collect();
                    rows.sort_by(|a, b| a.0.cmp(&b.0));
                    println!("{:<16} {:<30} {:>10}", "NODE", "URL", "REPUTATION");
                    for (node_id, entry) in rows {
                        println!("{:<16} {:<30} {:>10}", node_id, entry.url, entry.reputation);
                    }
                }
            }
        }
        Commands::Total => {
            let total = client.total_nodes().await?;
            match cli.format {
                Format::Json => println!("{}", serde_json::json!({ "total_nodes": total })),
                Format::Table => println!("{total} node(s) registered"),
            }
        }
        Commands::Reputation { action } => match action {
            ReputationAction::Get { node_id } => {
                let reputation = client.reputation(&node_id).await?;
                print_reputation(cli.format, &node_id, reputation);
            }
            ReputationAction::Increase { node_id, amount } => {
                let reputation = client.increase_reputation(&node_id, amount).await?;
                print_reputation(cli.format, &node_id, reputation);
            }
            ReputationAction::Decrease { node_id, amount } => {
                let reputation = client.decrease_reputation(&node_id, amount).await?;
                print_reputation(cli.format, &node_id, reputation);
            }
        },
        Commands::Deregister { node_id } => {
            client.deregister(&node_id).await?;
            println!("Node {node_id} deregistered.");
        }
    }

    Ok(())
}

fn print_reputation(format: Format, node_id: &str, reputation: i64) {
    match format {
        Format::Json => println!(
            "{}",
            serde_json::json!({ "node_id": node_id, "reputation": reputation })
        ),
        Format::Table => println!("{node_id}: reputation {reputation}"),
    }
}
