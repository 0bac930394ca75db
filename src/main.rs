//! Longmem CLI
//!
//! Runs the memory engine over a JSON chat request and prints the bounded
//! window as JSON.

use clap::{Parser, Subcommand};
use longmem::{ChatRequest, MemoryConfig, MemoryService, StrategyKind};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Longmem - keep long conversations inside a token budget
#[derive(Parser, Debug)]
#[command(name = "longmem")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the config file (default: ~/.longmem/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit a chat request into its budget
    Process {
        /// Request file (JSON); `-` reads stdin
        #[arg(short, long)]
        input: PathBuf,

        /// Room the request belongs to
        #[arg(long, default_value = "default")]
        room: String,

        /// Override the configured strategy (supa or hypa)
        #[arg(long)]
        strategy: Option<StrategyKind>,
    },
    /// Show how many summaries the store holds
    Stats,
    /// List rooms with saved state
    Rooms,
    /// Forget a room's rolling summary
    Reset {
        /// Room to reset
        #[arg(long)]
        room: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.unwrap_or_else(MemoryConfig::default_path);
    let config = MemoryConfig::load(&config_path)?;
    info!("Data directory: {:?}", config.storage.data_dir);

    let service = MemoryService::open(config).await?;

    match cli.command {
        Command::Process {
            input,
            room,
            strategy,
        } => {
            let content = read_input(&input).await?;
            let mut request: ChatRequest = serde_json::from_str(&content)?;
            if strategy.is_some() {
                request.strategy = strategy;
            }
            let response = service.process_chat(&room, request).await?;
            print_json(&response)?;
        }
        Command::Stats => {
            let count = service.store().len().await?;
            print_json(&serde_json::json!({ "summaries": count }))?;
        }
        Command::Rooms => {
            let rooms = service.rooms().list_rooms().await?;
            print_json(&rooms)?;
        }
        Command::Reset { room } => {
            let removed = service.rooms().remove(&room).await?;
            print_json(&serde_json::json!({ "room": room, "removed": removed }))?;
        }
    }

    Ok(())
}

async fn read_input(path: &PathBuf) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        let mut content = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut tokio::io::stdin(), &mut content).await?;
        Ok(content)
    } else {
        Ok(tokio::fs::read_to_string(path).await?)
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}
