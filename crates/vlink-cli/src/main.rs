//! vlink command-line client
//!
//! A small operator frontend for the vlink core library: interactive
//! login (with the one-time-passcode step), a polling loop that prints
//! snapshot updates, and one-shot remote commands.

mod args;
mod commands;

use args::{Cli, Commands};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with environment-based filtering.
    // Set RUST_LOG=debug for verbose request logs.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Login { vin } => commands::login(vin).await,
        Commands::Logout { vin } => commands::logout(vin).await,
        Commands::Run { vin, api_key } => commands::run(vin, api_key).await,
        Commands::Command { vin, api_key, name } => commands::command(vin, api_key, name).await,
    }
}
