//! Component lifecycle orchestration.
//!
//! The runtime coordinates component lifecycle:
//! - Start order: store → sync engine → lease keeper
//! - Shutdown order: lease keeper → sync engine
//!
//! The engine and keeper are explicit instances owned here and handed out
//! by `Arc`; there is no process-global synchronization state.

use crate::core::config::Config;
use crate::core::error::TrellisResult;
use crate::store::api::VersionedStore;
use crate::store::mem::MemStore;
use crate::sync::cache::{ObjCache, TypedCache};
use crate::sync::engine::SyncEngine;
use crate::sync::lease_data::{
    ControllerRecord, ControllerRegistration, LeaseKeeper, LeaseKeeperConfig,
};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Component health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// Component is starting.
    Starting,
    /// Component is healthy and operational.
    Healthy,
    /// Component has failed.
    Failed,
    /// Component is stopping.
    Stopping,
    /// Component has stopped.
    Stopped,
}

/// Health status aggregated from all components.
#[derive(Debug, Clone)]
pub struct RuntimeHealth {
    /// Versioned store backend health.
    pub store: ComponentHealth,
    /// Sync engine health.
    pub sync: ComponentHealth,
    /// Lease keeper health.
    pub lease_keeper: ComponentHealth,
}

impl Default for RuntimeHealth {
    fn default() -> Self {
        Self {
            store: ComponentHealth::Starting,
            sync: ComponentHealth::Starting,
            lease_keeper: ComponentHealth::Starting,
        }
    }
}

impl RuntimeHealth {
    /// Check if the runtime is ready to serve requests.
    pub fn is_ready(&self) -> bool {
        matches!(
            (self.store, self.sync, self.lease_keeper),
            (
                ComponentHealth::Healthy,
                ComponentHealth::Healthy,
                ComponentHealth::Healthy
            )
        )
    }

    /// Check if the runtime is alive (no component failed).
    pub fn is_alive(&self) -> bool {
        !matches!(
            (self.store, self.sync, self.lease_keeper),
            (ComponentHealth::Failed, _, _)
                | (_, ComponentHealth::Failed, _)
                | (_, _, ComponentHealth::Failed)
        )
    }
}

/// Trellis runtime holding all component handles.
pub struct Runtime {
    /// Configuration.
    config: Arc<Config>,

    /// Versioned store backend.
    store: Arc<dyn VersionedStore>,

    /// Sync engine.
    sync: Arc<SyncEngine>,

    /// Lease keeper.
    lease_keeper: Arc<LeaseKeeper>,

    /// Cache of controller liveness records in this region.
    controllers: Arc<ObjCache<ControllerRecord>>,

    /// Runtime health status.
    health: RuntimeHealth,

    /// Whether the runtime is running.
    running: Arc<AtomicBool>,

    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,

    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
}

impl Runtime {
    /// Create a new runtime with the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let store: Arc<dyn VersionedStore> = match config.store.mode.as_str() {
            "embedded" => Arc::new(MemStore::new()),
            other => anyhow::bail!(
                "store.mode {:?} is not available in this build; use \"embedded\"",
                other
            ),
        };

        let sync = Arc::new(SyncEngine::new(Arc::clone(&store), config.region.id));

        let controllers = Arc::new(ObjCache::<ControllerRecord>::new());
        sync.register_cache(Arc::clone(&controllers) as Arc<dyn TypedCache>);

        let lease_keeper = Arc::new(LeaseKeeper::new(
            Arc::clone(&store),
            LeaseKeeperConfig {
                ttl_seconds: config.lease.ttl_seconds,
                retry_interval: config.lease.retry_interval(),
            },
        ));
        lease_keeper.add_source(Arc::new(ControllerRegistration::new(
            config.region.id,
            config.region.controller_host.clone(),
        )));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config: Arc::new(config),
            store,
            sync,
            lease_keeper,
            controllers,
            health: RuntimeHealth::default(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the versioned store backend.
    pub fn store(&self) -> &Arc<dyn VersionedStore> {
        &self.store
    }

    /// Get the sync engine.
    pub fn sync(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    /// Get the lease keeper.
    pub fn lease_keeper(&self) -> &Arc<LeaseKeeper> {
        &self.lease_keeper
    }

    /// Get the controller liveness cache for this region.
    pub fn controllers(&self) -> &Arc<ObjCache<ControllerRecord>> {
        &self.controllers
    }

    /// Get the current health status.
    pub fn health(&self) -> &RuntimeHealth {
        &self.health
    }

    /// Check if the runtime is ready to serve requests.
    pub fn is_ready(&self) -> bool {
        self.health.is_ready()
    }

    /// Check if the runtime is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get a shutdown receiver for graceful shutdown coordination.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Initialize and start all runtime components.
    ///
    /// Caches must be registered on the sync engine before this is called;
    /// the engine blocks until the initial store listing is applied.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(
            region = self.config.region.id,
            store_mode = %self.config.store.mode,
            "starting Trellis runtime"
        );

        self.health.store = ComponentHealth::Healthy;

        self.sync
            .start()
            .await
            .context("failed to start sync engine")?;
        self.health.sync = ComponentHealth::Healthy;

        self.lease_keeper.start();
        self.health.lease_keeper = ComponentHealth::Healthy;

        self.running.store(true, Ordering::Release);
        tracing::info!("Trellis runtime started");
        Ok(())
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Run the runtime until a shutdown signal arrives.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("shutdown signal received (SIGINT)");
            }
            _ = async {
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            } => {
                tracing::info!("shutdown requested by component");
            }
        }

        self.stop().await
    }

    /// Stop all runtime components in reverse start order.
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("stopping Trellis runtime");
        self.running.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(true);

        self.health.lease_keeper = ComponentHealth::Stopping;
        self.lease_keeper.stop().await;
        self.health.lease_keeper = ComponentHealth::Stopped;

        self.health.sync = ComponentHealth::Stopping;
        self.sync.stop().await;
        self.health.sync = ComponentHealth::Stopped;

        self.health.store = ComponentHealth::Stopped;
        tracing::info!("Trellis runtime stopped");
        Ok(())
    }

    /// Start the runtime for tests (no signal handling).
    pub async fn start_for_tests(&mut self) -> TrellisResult<()> {
        self.health.store = ComponentHealth::Healthy;
        self.sync.start().await?;
        self.health.sync = ComponentHealth::Healthy;
        self.lease_keeper.start();
        self.health.lease_keeper = ComponentHealth::Healthy;
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    /// Stop the runtime for tests.
    pub async fn shutdown_for_tests(&mut self) {
        let _ = self.shutdown_tx.send(true);
        self.lease_keeper.stop().await;
        self.sync.stop().await;
        self.running.store(false, Ordering::Release);
    }
}
