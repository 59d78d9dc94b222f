// LedgerMesh peer node.
//
// Runs one member of a replicated banking-ledger cluster: four listener
// planes for the consensus protocol in the background, and the interactive
// operator menu in the foreground. Client commands entered at the menu are
// driven through prepare / propose / cross-verify / learn before they touch
// any balance.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use ledgermesh_consensus::ProtocolMode;
use ledgermesh_core::{Node, NodeConfig};
use ledgermesh_ledger::BankingLedger;

mod menu;

/// LedgerMesh peer node: a member of a Byzantine-tolerant replicated
/// banking ledger.
#[derive(Parser)]
#[command(name = "ledgermesh")]
#[command(about = "LedgerMesh peer node with interactive banking menu")]
#[command(version)]
struct Args {
    /// Operator-assigned node identifier (unique across the cluster).
    #[arg(long)]
    node_id: Option<String>,

    /// Base protocol port; verify/learn/directory listeners follow at +1/+2/+3.
    #[arg(long)]
    port: Option<u16>,

    /// IP address to bind the listeners to.
    #[arg(long)]
    bind: Option<String>,

    /// Host other peers reach this node at.
    #[arg(long)]
    advertise_host: Option<String>,

    /// Base URL of the registry service.
    #[arg(long)]
    registry: Option<String>,

    /// Protocol variant to run (the MTD supervisor rotates this).
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Optional YAML config file; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run headless: no interactive menu, serve until interrupted.
    #[arg(long)]
    headless: bool,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Mode {
    Byzantine,
    Classic,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ledgermesh=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let mut config = NodeConfig::load(args.config.as_deref())?;
    if let Some(node_id) = args.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(host) = args.advertise_host {
        config.advertise_host = host;
    }
    if let Some(registry) = args.registry {
        config.registry_url = registry;
    }
    if let Some(mode) = args.mode {
        config.consensus.mode = match mode {
            Mode::Byzantine => ProtocolMode::Byzantine,
            Mode::Classic => ProtocolMode::Classic,
        };
    }

    let ledger = Arc::new(BankingLedger::new());
    let mut node = Node::new(config, Arc::clone(&ledger) as _);

    if let Err(e) = node.start().await {
        error!(error = %e, "failed to start node");
        return Err(e);
    }

    if args.headless {
        info!("running headless; press ctrl-c to stop");
        tokio::signal::ctrl_c().await?;
    } else {
        tokio::select! {
            _ = menu::run(&node, &ledger) => {
                info!("operator menu exited");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
            }
        }
    }

    node.stop().await?;
    info!("node stopped");
    Ok(())
}
