//! Strata - unified CLI entrypoint.
//!
//! Usage:
//!   strata start --config config/strata.toml
//!   strata init [--dsn DSN]
//!   strata config validate --config config/strata.toml
//!   strata config show

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use strata::cli::commands::{run_config, run_init, run_start};
use strata::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine config path - use global --config or default
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/strata.toml"));

    match cli.command {
        Commands::Start(_args) => run_start(&config_path).await,
        Commands::Init(args) => run_init(args, &config_path),
        Commands::Config(args) => run_config(args, &config_path),
    }
}
