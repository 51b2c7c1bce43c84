//! Health checks and telemetry setup.
//!
//! Metric namespaces:
//! - trellis.sync.*
//! - trellis.lease.*
//! - trellis.store.*

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Initialize the tracing subscriber from the configured log level.
///
/// `RUST_LOG` takes precedence when set.
pub fn init_tracing(log_level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .context("invalid log level")?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .context("tracing subscriber already initialized")?;
    Ok(())
}

/// Readiness status for operational probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessStatus {
    /// Overall ready state.
    pub ready: bool,
    /// Highest revision applied to the caches.
    pub synced_revision: u64,
    /// Whether a lease is currently held.
    pub lease_held: bool,
    /// Individual component status.
    pub components: ComponentStatus,
}

/// Component readiness flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStatus {
    /// Store backend reachable.
    pub store: bool,
    /// Sync engine listed and dispatching.
    pub sync: bool,
    /// Lease keeper holding a lease.
    pub lease_keeper: bool,
}

/// Health check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Overall healthy state.
    pub healthy: bool,
    /// Status message.
    pub message: String,
}

impl HealthStatus {
    /// Create a healthy status.
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            message: "OK".to_string(),
        }
    }

    /// Create an unhealthy status.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: message.into(),
        }
    }
}

/// Stable metric names.
pub mod metrics {
    /// Highest revision applied to all caches, gauge.
    pub const SYNC_REVISION: &str = "trellis.sync.revision";
    /// Watch events dispatched, counter.
    pub const SYNC_EVENTS_TOTAL: &str = "trellis.sync.events_total";
    /// Events dropped for unregistered types, counter.
    pub const SYNC_UNKNOWN_TYPE_TOTAL: &str = "trellis.sync.unknown_type_total";
    /// Currently held lease id, gauge (zero when none).
    pub const LEASE_CURRENT: &str = "trellis.lease.current";
    /// Lease cycles restarted after loss, counter.
    pub const LEASE_RECOVERIES_TOTAL: &str = "trellis.lease.recoveries_total";
    /// Current store revision, gauge.
    pub const STORE_REVISION: &str = "trellis.store.revision";
}
