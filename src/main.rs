//! Trellis - unified CLI entrypoint.
//!
//! Usage:
//!   trellis start --config config/trellis.toml
//!   trellis config validate --config config/trellis.toml
//!   trellis config show --config config/trellis.toml
//!   trellis config generate --region 1

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use trellis::cli::commands::{run_config, run_start};
use trellis::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine config path - use global --config or default
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/trellis.toml"));

    match cli.command {
        Commands::Start(_args) => run_start(&config_path, cli.log_level.as_deref()).await,
        Commands::Config(args) => run_config(args),
    }
}
