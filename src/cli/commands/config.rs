//! Config command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::core::config::Config;

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate the configuration file.
    Validate,
    /// Print the effective configuration.
    Show,
}

pub fn run_config(args: ConfigArgs, config_path: &Path) -> Result<()> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    match args.command {
        ConfigCommand::Validate => {
            println!("configuration is valid");
        }
        ConfigCommand::Show => {
            let rendered = toml::to_string_pretty(&config)?;
            print!("{rendered}");
        }
    }
    Ok(())
}
