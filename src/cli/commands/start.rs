//! Start command implementation.

use crate::core::config::Config;
use crate::core::runtime::Runtime;
use crate::ops::observability::init_tracing;
use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

/// Start the Trellis controller.
#[derive(Args, Debug)]
pub struct StartArgs {
    // No additional arguments - config is handled globally
}

/// Run the start command with the given config path and overrides.
pub async fn run_start(config_path: &Path, log_level: Option<&str>) -> Result<()> {
    let mut config = Config::from_file(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    config.apply_overrides(log_level);

    init_tracing(&config.telemetry.log_level)?;

    let mut runtime = Runtime::new(config)?;
    runtime.run().await
}
