//! Configuration parsing and validation.
//!
//! Trellis configuration is loaded from TOML files with CLI overrides.
//! Sections mirror the runtime components: region identity, store backend,
//! lease keeper tuning, and telemetry.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level Trellis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Region identity for this controller.
    pub region: RegionConfig,

    /// Versioned store backend configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Lease keeper configuration.
    #[serde(default)]
    pub lease: LeaseConfig,

    /// Telemetry and observability configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Region identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Region identifier. Scopes every store key; must be non-zero.
    pub id: u32,

    /// Hostname or address identifying this controller within the region.
    #[serde(default = "default_controller_host")]
    pub controller_host: String,
}

/// Versioned store backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Mode: "embedded" or "external".
    #[serde(default = "default_store_mode")]
    pub mode: String,

    /// Store endpoints for external mode.
    #[serde(default)]
    pub endpoints: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            mode: default_store_mode(),
            endpoints: Vec::new(),
        }
    }
}

/// Lease keeper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Lease TTL in seconds for ephemeral registration data.
    #[serde(default = "default_lease_ttl_seconds")]
    pub ttl_seconds: i64,

    /// Retry interval in milliseconds after a lease cycle fails.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_lease_ttl_seconds(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl LeaseConfig {
    /// Retry interval as a Duration.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_controller_host() -> String {
    "localhost".to_string()
}

fn default_store_mode() -> String {
    "embedded".to_string()
}

fn default_lease_ttl_seconds() -> i64 {
    20
}

fn default_retry_interval_ms() -> u64 {
    5_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, log_level: Option<&str>) {
        if let Some(level) = log_level {
            self.telemetry.log_level = level.to_string();
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.region.id == 0 {
            anyhow::bail!("region.id must be non-zero");
        }
        if self.region.controller_host.is_empty() {
            anyhow::bail!("region.controller_host must not be empty");
        }
        match self.store.mode.as_str() {
            "embedded" => {}
            "external" => {
                if self.store.endpoints.is_empty() {
                    anyhow::bail!("store.endpoints required for external mode");
                }
            }
            other => anyhow::bail!("unknown store.mode {:?}", other),
        }
        if self.lease.ttl_seconds <= 0 {
            anyhow::bail!("lease.ttl_seconds must be > 0");
        }
        if self.lease.retry_interval_ms == 0 {
            anyhow::bail!("lease.retry_interval_ms must be > 0");
        }
        match self.telemetry.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => anyhow::bail!("unknown telemetry.log_level {:?}", other),
        }
        Ok(())
    }

    /// Generate a configuration template with defaults.
    pub fn template(region_id: u32) -> Self {
        Self {
            region: RegionConfig {
                id: region_id,
                controller_host: default_controller_host(),
            },
            store: StoreConfig::default(),
            lease: LeaseConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}
