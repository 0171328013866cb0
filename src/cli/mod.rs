//! Command-line interface.

pub mod commands;

use clap::{Parser, Subcommand};

/// Strata - versioned record broker.
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the broker server.
    Start(commands::StartArgs),
    /// Initialize a database and apply migrations.
    Init(commands::InitArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
}
