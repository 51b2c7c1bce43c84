//! Watch/dispatch engine, typed caches, and lease keeper.
//!
//! - [`engine`] - Single-task dispatch loop and revision barrier
//! - [`cache`] - Typed cache contract and generic projection
//! - [`lease_data`] - Lease-scoped ephemeral data recovery

pub mod cache;
pub mod engine;
pub mod lease_data;
