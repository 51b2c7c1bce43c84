//! Lease keeper and ephemeral registration.
//!
//! `LeaseKeeper` guarantees that this controller's lease-scoped data (its
//! liveness record and any other state that must vanish if the controller
//! disappears) is present in the store whenever the controller is alive
//! and reachable. The supervisory loop cycles
//! acquire-lease → register → keepalive, and on any failure abandons the
//! lease, backs off, and re-derives everything under a fresh lease. There
//! is no repair-in-place: the store may already have purged the old
//! lease's data during a partition, so full re-registration from current
//! in-memory truth is the only correct recovery.

use crate::core::error::{TrellisError, TrellisResult};
use crate::store::api::VersionedStore;
use crate::store::key;
use crate::sync::cache::CacheObject;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A producer of ephemeral, lease-scoped store data.
///
/// `publish` is called once per granted lease, on initial startup and
/// after every recovery, and must be idempotent: publishing the same data
/// twice under one lease yields the same final store state.
#[async_trait]
pub trait EphemeralSource: Send + Sync {
    /// Name for logs.
    fn name(&self) -> &str;

    /// Write this source's data attached to `lease_id`.
    async fn publish(&self, store: &dyn VersionedStore, lease_id: i64) -> TrellisResult<()>;
}

/// Lease keeper tuning.
#[derive(Debug, Clone)]
pub struct LeaseKeeperConfig {
    /// Lease TTL in seconds.
    pub ttl_seconds: i64,

    /// Wait between failed cycles.
    pub retry_interval: Duration,
}

impl Default for LeaseKeeperConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 20,
            retry_interval: Duration::from_secs(5),
        }
    }
}

/// State shared between the keeper handle and the supervisory task.
struct KeeperShared {
    store: Arc<dyn VersionedStore>,
    config: LeaseKeeperConfig,
    sources: RwLock<Vec<Arc<dyn EphemeralSource>>>,
    lease_id: AtomicI64,
}

impl KeeperShared {
    /// The supervisory loop: acquire → register → keepalive → backoff.
    async fn supervise(&self, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let lease_id = match self.store.grant(self.config.ttl_seconds).await {
                Ok(id) => id,
                Err(error) => {
                    tracing::warn!(%error, "lease grant failed");
                    if !self.backoff(&mut shutdown_rx).await {
                        break;
                    }
                    continue;
                }
            };
            self.lease_id.store(lease_id, Ordering::Release);

            if let Err(error) = self.publish_all(lease_id).await {
                // Abandon the partially registered lease; with no
                // keepalive it expires on its own.
                tracing::warn!(lease_id, %error, "ephemeral registration failed");
                self.lease_id.store(0, Ordering::Release);
                if !self.backoff(&mut shutdown_rx).await {
                    break;
                }
                continue;
            }
            tracing::info!(lease_id, "ephemeral data registered");

            match self.store.keep_alive(lease_id, shutdown_rx.clone()).await {
                Ok(()) => break,
                Err(error) => {
                    tracing::warn!(lease_id, %error, "lease lost, re-registering");
                    self.lease_id.store(0, Ordering::Release);
                    if !self.backoff(&mut shutdown_rx).await {
                        break;
                    }
                }
            }
        }
        tracing::debug!("lease keeper loop exited");
    }

    /// Publish every source under the given lease.
    async fn publish_all(&self, lease_id: i64) -> TrellisResult<()> {
        let sources: Vec<Arc<dyn EphemeralSource>> =
            self.sources.read().unwrap().iter().cloned().collect();
        for source in sources {
            if let Err(error) = source.publish(self.store.as_ref(), lease_id).await {
                tracing::warn!(source = source.name(), lease_id, %error, "publish failed");
                return Err(error);
            }
            tracing::debug!(source = source.name(), lease_id, "published");
        }
        Ok(())
    }

    /// Wait one retry interval. Returns false if stop was requested, so
    /// the loop exits without sitting out the full interval.
    async fn backoff(&self, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.config.retry_interval) => true,
            _ = shutdown_rx.changed() => false,
        }
    }
}

struct KeeperInner {
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

/// Supervisory loop keeping lease-scoped registration data alive.
pub struct LeaseKeeper {
    shared: Arc<KeeperShared>,
    inner: Mutex<KeeperInner>,
}

impl LeaseKeeper {
    /// Create a keeper over a store.
    pub fn new(store: Arc<dyn VersionedStore>, config: LeaseKeeperConfig) -> Self {
        Self {
            shared: Arc::new(KeeperShared {
                store,
                config,
                sources: RwLock::new(Vec::new()),
                lease_id: AtomicI64::new(0),
            }),
            inner: Mutex::new(KeeperInner {
                shutdown_tx: None,
                task: None,
            }),
        }
    }

    /// Add an ephemeral source. Sources added after `start` take effect on
    /// the next lease cycle.
    pub fn add_source(&self, source: Arc<dyn EphemeralSource>) {
        self.shared.sources.write().unwrap().push(source);
    }

    /// The currently held lease id, or zero when none is held.
    ///
    /// Callers tagging their own ephemeral writes must tolerate transient
    /// zero values while a lease cycle is recovering.
    pub fn lease_id(&self) -> i64 {
        self.shared.lease_id.load(Ordering::Acquire)
    }

    /// Check if the supervisory loop is running.
    pub fn is_running(&self) -> bool {
        self.inner.lock().task.is_some()
    }

    /// Spawn the supervisory loop. A second call while the loop is
    /// running is a no-op.
    pub fn start(&self) {
        let mut inner = self.inner.lock();
        if inner.task.is_some() {
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        inner.shutdown_tx = Some(shutdown_tx);
        inner.task = Some(tokio::spawn(async move {
            shared.supervise(shutdown_rx).await;
        }));
    }

    /// Signal the loop to exit and block until it has, including any
    /// in-flight keepalive call. Resets state so a later `start` begins
    /// cleanly; safe to call from a different task than `start`.
    pub async fn stop(&self) {
        let (shutdown_tx, task) = {
            let mut inner = self.inner.lock();
            (inner.shutdown_tx.take(), inner.task.take())
        };
        if let Some(shutdown_tx) = shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
        if let Some(task) = task {
            if let Err(error) = task.await {
                tracing::warn!(%error, "lease keeper task panicked");
            }
        }
        self.shared.lease_id.store(0, Ordering::Release);
    }
}

/// This controller's liveness record, visible to every peer in the
/// region while the controller holds a lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerRecord {
    /// Region the controller serves.
    pub region: u32,

    /// Hostname or address identifying the controller.
    pub host: String,

    /// Build version the controller is running.
    pub build_version: String,

    /// Process start time, milliseconds since the Unix epoch.
    pub started_at_ms: u64,
}

impl CacheObject for ControllerRecord {
    const TYPE_STRING: &'static str = "Controller";

    fn obj_key(&self) -> String {
        self.host.clone()
    }
}

/// Publishes this controller's liveness record under the current lease.
pub struct ControllerRegistration {
    record: ControllerRecord,
}

impl ControllerRegistration {
    /// Create the registration for this process.
    pub fn new(region: u32, host: impl Into<String>) -> Self {
        let started_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            record: ControllerRecord {
                region,
                host: host.into(),
                build_version: env!("CARGO_PKG_VERSION").to_string(),
                started_at_ms,
            },
        }
    }

    /// The record this registration publishes.
    pub fn record(&self) -> &ControllerRecord {
        &self.record
    }
}

#[async_trait]
impl EphemeralSource for ControllerRegistration {
    fn name(&self) -> &str {
        "controller-liveness"
    }

    async fn publish(&self, store: &dyn VersionedStore, lease_id: i64) -> TrellisResult<()> {
        let store_key = key::store_key(
            self.record.region,
            ControllerRecord::TYPE_STRING,
            &self.record.host,
        );
        let value = serde_json::to_vec(&self.record)
            .map_err(|e| TrellisError::internal(format!("encode controller record: {}", e)))?;
        store.put(&store_key, value, Some(lease_id)).await?;
        Ok(())
    }
}
