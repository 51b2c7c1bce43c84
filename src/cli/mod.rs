//! Command-line interface.
//!
//! Unified CLI for Trellis operations.

pub mod commands;

use clap::{Parser, Subcommand};

/// Trellis - fleet control plane state synchronization core.
#[derive(Parser, Debug)]
#[command(name = "trellis")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the Trellis controller.
    Start(commands::StartArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
}
