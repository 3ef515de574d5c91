//! Coordinator binary

use clap::Parser;
use leaderless::common::{ReadAgreement, ServiceConfig};
use leaderless::Coordinator;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "leaderless-server")]
#[command(about = "Leaderless quorum coordinator over independent Postgres replicas")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./leaderless.toml when present)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Bind address for HTTP
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Fraction of replicas that must acknowledge a write
    #[arg(long)]
    write_fraction: Option<f64>,

    /// Fraction of replicas used for the read threshold
    #[arg(long)]
    read_fraction: Option<f64>,

    /// How many matching replicas a read needs
    #[arg(long, value_enum)]
    read_agreement: Option<ReadAgreement>,

    /// Per-replica deadline in milliseconds
    #[arg(long)]
    replica_timeout_ms: Option<u64>,

    /// Log level used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // File and environment first, CLI flags win
    let mut config = ServiceConfig::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(wf) = cli.write_fraction {
        config.write_fraction = wf;
    }
    if let Some(rf) = cli.read_fraction {
        config.read_fraction = rf;
    }
    if let Some(agreement) = cli.read_agreement {
        config.read_agreement = agreement;
    }
    if let Some(ms) = cli.replica_timeout_ms {
        config.replica_timeout_ms = ms;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::debug!(?config, "Loaded configuration");

    Coordinator::new(config).serve().await?;
    Ok(())
}
