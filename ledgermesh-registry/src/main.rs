//! Registry service binary.

use anyhow::Result;
use clap::Parser;
use tracing::info;

use ledgermesh_registry::{RegistryConfig, RegistryService};

/// LedgerMesh registry: the authoritative membership and reputation
/// directory for a peer cluster.
#[derive(Parser)]
#[command(name = "ledgermesh-registry")]
#[command(about = "Membership and reputation registry for LedgerMesh clusters")]
#[command(version)]
struct Args {
    /// Address to bind the HTTP service to.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Port to serve on.
    #[arg(long, default_value_t = 5000)]
    port: u16,

    /// Disable permissive CORS (enabled by default for admin tooling).
    #[arg(long)]
    no_cors: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ledgermesh_registry=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let service = RegistryService::new(RegistryConfig {
        bind_address: args.bind,
        port: args.port,
        cors_enabled: !args.no_cors,
    });

    let addr = service.start().await?;
    info!(%addr, "registry ready");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping registry");
    Ok(())
}
