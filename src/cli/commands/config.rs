//! Config command implementation.

use crate::core::config::Config;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate a configuration file.
    Validate {
        /// Config file path.
        #[arg(short, long, default_value = "config/trellis.toml")]
        config: PathBuf,
    },
    /// Print a configuration with defaults applied.
    Show {
        /// Config file path.
        #[arg(short, long, default_value = "config/trellis.toml")]
        config: PathBuf,
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
    /// Generate a configuration template.
    Generate {
        /// Region id for the template.
        #[arg(long, default_value_t = 1)]
        region: u32,
        /// Output file path (stdout when omitted).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Run the config command.
pub fn run_config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate { config } => validate_config(&config),
        ConfigCommand::Show { config, format } => show_config(&config, &format),
        ConfigCommand::Generate { region, output } => generate_config(region, output.as_deref()),
    }
}

fn validate_config(path: &PathBuf) -> Result<()> {
    let config = Config::from_file(path)?;
    println!(
        "config ok: region {} ({}), store mode {}",
        config.region.id, config.region.controller_host, config.store.mode
    );
    Ok(())
}

fn show_config(path: &PathBuf, format: &str) -> Result<()> {
    let config = Config::from_file(path)?;
    let rendered = match format {
        "toml" => toml::to_string_pretty(&config).context("failed to render config as TOML")?,
        "json" => {
            serde_json::to_string_pretty(&config).context("failed to render config as JSON")?
        }
        other => anyhow::bail!("unknown output format {:?}", other),
    };
    println!("{}", rendered);
    Ok(())
}

fn generate_config(region: u32, output: Option<&std::path::Path>) -> Result<()> {
    let template = Config::template(region);
    let rendered =
        toml::to_string_pretty(&template).context("failed to render config template")?;
    match output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("wrote {}", path.display());
        }
        None => println!("{}", rendered),
    }
    Ok(())
}
