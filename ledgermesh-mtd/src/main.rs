//! # LedgerMesh MTD Supervisor
//!
//! Moving-target-defence wrapper for a peer node: runs the node binary with
//! a randomly chosen protocol variant, kills it after a bounded lifetime,
//! and re-rolls, so an adversary probing a peer never knows which member
//! of the protocol family it is currently talking to.
//!
//! The supervised node deregisters itself on SIGINT, so rotation looks like
//! a clean leave/rejoin to the rest of the cluster.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rand::seq::SliceRandom;
use tokio::process::Command;
use tracing::{info, warn};

/// Protocol variants the supervisor rotates between.
const MODES: &[&str] = &["byzantine", "classic"];

/// Moving-target-defence supervisor for a LedgerMesh peer.
#[derive(Parser)]
#[command(name = "ledgermesh-mtd")]
#[command(about = "Rotates a LedgerMesh peer between protocol variants on a timer")]
#[command(version)]
struct Args {
    /// Path to the node binary to supervise.
    #[arg(long, default_value = "ledgermesh")]
    node_binary: String,

    /// Node id passed through to the peer.
    #[arg(long)]
    node_id: String,

    /// Base protocol port passed through to the peer.
    #[arg(long, default_value_t = 10_000)]
    port: u16,

    /// Registry endpoint passed through to the peer.
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    registry: String,

    /// Seconds each incarnation is allowed to live.
    #[arg(long, default_value_t = 60)]
    lifetime: u64,

    /// Seconds to pause between incarnations.
    #[arg(long, default_value_t = 10)]
    cooldown: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ledgermesh_mtd=info".parse()?),
        )
        .init();

    let args = Args::parse();
    info!(
        node = %args.node_id,
        binary = %args.node_binary,
        lifetime = args.lifetime,
        "starting moving-target rotation"
    );

    loop {
        let mode = *MODES
            .choose(&mut rand::thread_rng())
            .expect("mode list is non-empty");
        if let Err(e) = run_incarnation(&args, mode).await {
            warn!(error = %e, "incarnation failed, rotating anyway");
        }
        info!(cooldown = args.cooldown, "waiting before the next incarnation");
        tokio::time::sleep(Duration::from_secs(args.cooldown)).await;
    }
}

/// Launch one incarnation of the node and let it live for at most the
/// configured lifetime.
async fn run_incarnation(args: &Args, mode: &str) -> Result<()> {
    info!(mode, "launching node incarnation");
    let mut child = Command::new(&args.node_binary)
        .arg("--node-id")
        .arg(&args.node_id)
        .arg("--port")
        .arg(args.port.to_string())
        .arg("--registry")
        .arg(&args.registry)
        .arg("--mode")
        .arg(mode)
        .arg("--headless")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning {}", args.node_binary))?;

    let lifetime = Duration::from_secs(args.lifetime);
    tokio::select! {
        status = child.wait() => {
            let status = status?;
            info!(%status, "node exited on its own");
        }
        _ = tokio::time::sleep(lifetime) => {
            info!("lifetime expired, terminating incarnation");
            child.start_kill().context("terminating the node process")?;
            let status = child.wait().await?;
            info!(%status, "incarnation terminated");
        }
    }
    Ok(())
}
