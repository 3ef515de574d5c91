//! Maintenance binary: report per-replica row counts and drop the table

use clap::{Parser, Subcommand};
use leaderless::common::{parse_duration, ServiceConfig};
use leaderless::ops::Reaper;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "leaderless-reaper")]
#[command(about = "Count rows on every replica, then drop the table everywhere")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./leaderless.toml when present)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count, then drop
    Run {
        /// Repeat every interval (e.g. "30s", "5m") instead of running once
        #[arg(long, value_parser = parse_every)]
        every: Option<Duration>,
    },

    /// Only log per-replica row counts
    Count,

    /// Only drop the table on every replica
    Drop,
}

fn parse_every(s: &str) -> Result<Duration, String> {
    let period = parse_duration(s).map_err(|e| e.to_string())?;
    if period.is_zero() {
        return Err("interval must be greater than zero".into());
    }
    Ok(period)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ServiceConfig::load(cli.config.as_deref())?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let reaper = Reaper::from_config(&config)?;

    match cli.command {
        Commands::Count => {
            let counts = reaper.count_rows().await;
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
        Commands::Drop => {
            let report = reaper.drop_table().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Run { every: None } => {
            reaper.run_cycle().await;
        }
        Commands::Run { every: Some(period) } => {
            tracing::info!("Reaping every {:?}", period);
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        reaper.run_cycle().await;
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Reaper stopped");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
