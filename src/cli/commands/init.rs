//! Init command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use crate::core::config::Config;
use crate::store::Store;

/// Initialize a database and apply migrations.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Storage DSN override (defaults to the configured dsn).
    #[arg(long)]
    pub dsn: Option<String>,
}

pub fn run_init(args: InitArgs, config_path: &Path) -> Result<()> {
    let dsn = match args.dsn {
        Some(dsn) => dsn,
        None => {
            let config = Config::from_file(config_path)
                .with_context(|| format!("failed to load config from {}", config_path.display()))?;
            config.storage.dsn
        }
    };

    let store = Store::open(&dsn)?;
    println!("initialized store at {dsn}");
    println!("server version: {}", store.server_version()?);
    Ok(())
}
