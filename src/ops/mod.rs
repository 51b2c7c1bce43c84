//! Operational endpoints and telemetry.
//!
//! - [`observability`] - Health checks and telemetry setup

pub mod observability;
