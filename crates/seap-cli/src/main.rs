use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use seap_client::SeapClient;
use seap_sync::SyncConfig;

#[derive(Debug, Parser)]
#[command(name = "seap-cli")]
#[command(about = "SEAP direct-acquisition watch command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scrape today's notices once and append new matches to the table.
    Run,
    /// Stay resident and run the daily scrape on the configured cron.
    Watch,
    /// Fetch and print the full detail record for one notice.
    Detail { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = SyncConfig::from_env();
    init_logging(&config.log_file)?;

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let summary = seap_sync::run_once(&config).await?;
            println!(
                "run complete: run_id={} date={} matched={} written={}",
                summary.run_id, summary.date, summary.matched, summary.written
            );
        }
        Commands::Watch => {
            seap_sync::watch(config).await?;
        }
        Commands::Detail { id } => {
            let client = SeapClient::new(&config.client_config())?;
            let detail = client.fetch_detail(id).await?;
            println!("{}", serde_json::to_string_pretty(&detail)?);
        }
    }

    Ok(())
}

/// Timestamped, leveled lines to both the console and the log file.
fn init_logging(log_file: &Path) -> Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("opening log file {}", log_file.display()))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        .init();
    Ok(())
}
