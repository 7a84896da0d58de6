//! Tally CLI - bank statement imports in your terminal

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{account, categories, import, rules};
use tally_core::OperationResult;

/// Tally - import bank statements into your ledger
#[derive(Parser)]
#[command(name = "tally", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, process and confirm statement imports
    Import {
        #[command(subcommand)]
        command: import::ImportCommands,
    },

    /// Manage categorization rules
    Rules {
        #[command(subcommand)]
        command: rules::RulesCommands,
    },

    /// Manage accounts statements are imported into
    Account {
        #[command(subcommand)]
        command: account::AccountCommands,
    },

    /// List categories
    Categories {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    fn wants_json(&self) -> bool {
        match self {
            Commands::Import { command } => command.wants_json(),
            Commands::Rules { command } => command.wants_json(),
            Commands::Account { command } => command.wants_json(),
            Commands::Categories { json } => *json,
        }
    }
}

/// Log to stderr, filtered by `TALLY_LOG` (default `warn`)
fn init_tracing() {
    let filter = EnvFilter::try_from_env("TALLY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let json = cli.command.wants_json();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if json {
                let result = match e.downcast_ref::<tally_core::Error>() {
                    Some(core) => OperationResult::<()>::from_error(core),
                    None => OperationResult::<()>::fail(format!("{:#}", e)),
                };
                match serde_json::to_string_pretty(&result) {
                    Ok(text) => println!("{}", text),
                    Err(_) => output::error(&format!("{:#}", e)),
                }
            } else {
                output::error(&format!("{:#}", e));
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Import { command } => import::run(command).await,
        Commands::Rules { command } => rules::run(command).await,
        Commands::Account { command } => account::run(command).await,
        Commands::Categories { json } => categories::run(json).await,
    }
}
