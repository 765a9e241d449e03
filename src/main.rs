//! CLI entry point for deckrun.
//!
//! Run a protocol and write its summary:
//! ```bash
//! deckrun run protocol.json --output summary.json
//! ```
//!
//! Check configuration and a protocol without running anything:
//! ```bash
//! deckrun --config config/deckrun.toml validate protocol.json
//! ```

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deck_engine::RunStatus;
use deck_hardware::BuiltinCatalog;
use deckrun::config::{DeckrunConfig, DEFAULT_CONFIG_PATH};
use deckrun::{logging, run_protocol, Protocol};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "deckrun")]
#[command(about = "Run liquid-handling protocols on a simulated robot", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a protocol and write the run summary
    Run {
        /// Protocol document or JSON command list
        protocol: PathBuf,

        /// Summary destination; stdout when absent
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Load the configuration and, optionally, parse a protocol
    Validate {
        protocol: Option<PathBuf>,
    },

    /// List the built-in labware load names
    Labware,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = DeckrunConfig::load_from(&cli.config)?;
    logging::init_from_config(&config.application)?;
    info!(name = %config.application.name, config = %cli.config.display(), "Configuration loaded");

    match cli.command {
        Commands::Run { protocol, output } => run(&config, protocol, output).await,
        Commands::Validate { protocol } => {
            if let Some(path) = protocol {
                let protocol = Protocol::load(&path)?;
                println!(
                    "{}: {} commands, {} labware offsets",
                    path.display(),
                    protocol.commands.len(),
                    protocol.labware_offsets.len()
                );
            }
            println!("Configuration OK");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Labware => {
            for name in BuiltinCatalog::new().labware_names() {
                println!("{}", name);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(config: &DeckrunConfig, protocol: PathBuf, output: Option<PathBuf>) -> Result<ExitCode> {
    let document = Protocol::load(&protocol)?;
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };
    let summary = run_protocol(config, document, interrupt).await?;

    let json = serde_json::to_string_pretty(&summary).context("Failed to serialise run summary")?;
    match output {
        Some(path) => {
            tokio::fs::write(&path, json)
                .await
                .with_context(|| format!("Failed to write summary to {}", path.display()))?;
            info!(path = %path.display(), "Run summary written");
        }
        None => println!("{}", json),
    }

    let (succeeded, failed) = summary.counts();
    info!(status = %summary.status, succeeded, failed, "Run complete");
    Ok(if summary.status == RunStatus::Succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
