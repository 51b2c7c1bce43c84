//! Trellis - controller-side state synchronization core for fleet control planes.
//!
//! Trellis keeps a set of strongly-typed in-memory object caches consistent
//! with a replicated, versioned key-value store, and maintains ephemeral,
//! lease-scoped registration data so a controller that loses its lease can
//! recover without duplicating or losing state. Request handlers write
//! through compare-and-set transactions and block on a revision barrier
//! until their own write is visible in the caches.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Request Handlers                          │
//! │        (read typed caches, write via apply_stm_wait)            │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine                              │
//! │   cache registry │ dispatch loop │ revision barrier │ STM wait  │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Lease Keeper                              │
//! │    grant → register ephemeral data → keepalive → re-register    │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Versioned Store                            │
//! │   ordered prefix watch │ CAS transactions │ renewable leases    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Component lifecycle orchestration
//! - [`core::error`] - Error types and retriability
//!
//! ## Store
//! - [`store::api`] - The versioned-store contract Trellis consumes
//! - [`store::key`] - Region-scoped key encoding
//! - [`store::event`] - Watch stream events
//! - [`store::mem`] - Embedded in-process store for single-node mode and tests
//!
//! ## Sync
//! - [`sync::engine`] - Watch/dispatch engine and revision barrier
//! - [`sync::cache`] - Typed cache contract and generic projection
//! - [`sync::lease_data`] - Lease keeper and ephemeral registration
//!
//! ## Operations
//! - [`ops::observability`] - Health checks and telemetry setup
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations
//!
//! # Key Invariants
//!
//! - Cache mutation happens on exactly one dispatch task, in
//!   non-decreasing global revision order.
//! - The synced revision never regresses; a caller observing
//!   `rev >= R` sees every cache mutation up to R applied.
//! - A revision waiter is always released when the dispatch loop exits,
//!   with an error if its revision was never reached.
//! - Ephemeral registration data is re-derived under a fresh lease after
//!   every lease loss; stale lease ids are never reused.

// Core infrastructure
pub mod core;

// Versioned store contract and embedded implementation
pub mod store;

// Watch/dispatch engine, typed caches, lease keeper
pub mod sync;

// Operational endpoints and telemetry
pub mod ops;

// Command-line interface
pub mod cli;
