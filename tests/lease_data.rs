//! Tests for the lease keeper: registration, recovery, shutdown.

mod common;

use async_trait::async_trait;
use common::{wait_until, REGION};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use trellis::core::error::TrellisResult;
use trellis::store::api::VersionedStore;
use trellis::store::key;
use trellis::store::mem::MemStore;
use trellis::sync::cache::CacheObject;
use trellis::sync::lease_data::{
    ControllerRecord, ControllerRegistration, EphemeralSource, LeaseKeeper, LeaseKeeperConfig,
};

/// An ephemeral source that counts how often it is published.
struct CountingSource {
    publishes: AtomicUsize,
}

impl CountingSource {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            publishes: AtomicUsize::new(0),
        })
    }

    fn count(&self) -> usize {
        self.publishes.load(Ordering::Acquire)
    }
}

#[async_trait]
impl EphemeralSource for CountingSource {
    fn name(&self) -> &str {
        "counting"
    }

    async fn publish(&self, store: &dyn VersionedStore, lease_id: i64) -> TrellisResult<()> {
        self.publishes.fetch_add(1, Ordering::AcqRel);
        store
            .put("1/Source/counting", b"{}".to_vec(), Some(lease_id))
            .await?;
        Ok(())
    }
}

fn test_keeper(store: &Arc<MemStore>, retry: Duration) -> Arc<LeaseKeeper> {
    let store: Arc<dyn VersionedStore> = Arc::clone(store) as Arc<dyn VersionedStore>;
    Arc::new(LeaseKeeper::new(
        store,
        LeaseKeeperConfig {
            ttl_seconds: 20,
            retry_interval: retry,
        },
    ))
}

fn controller_key() -> String {
    key::store_key(REGION, ControllerRecord::TYPE_STRING, "ctrl-test")
}

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
async fn start_registers_controller_record_under_lease() {
    let store = Arc::new(MemStore::new());
    let keeper = test_keeper(&store, Duration::from_millis(100));
    keeper.add_source(Arc::new(ControllerRegistration::new(REGION, "ctrl-test")));

    keeper.start();
    wait_until("lease grant", 5, || keeper.lease_id() != 0).await;
    let mut record = None;
    for _ in 0..500 {
        record = store.get(&controller_key()).await.unwrap();
        if record.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let record = record.expect("controller record never registered");
    assert_eq!(record.lease_id, Some(keeper.lease_id()));
    let decoded: ControllerRecord = serde_json::from_slice(&record.value).unwrap();
    assert_eq!(decoded.region, REGION);
    assert_eq!(decoded.host, "ctrl-test");
    assert_eq!(decoded.obj_key(), "ctrl-test");

    keeper.stop().await;
    assert_eq!(keeper.lease_id(), 0);
    assert!(!keeper.is_running());
}

#[tokio::test]
async fn publish_is_idempotent() {
    let store = Arc::new(MemStore::new());
    let registration = ControllerRegistration::new(REGION, "ctrl-test");
    let lease_id = store.grant(20).await.unwrap();

    registration
        .publish(store.as_ref(), lease_id)
        .await
        .unwrap();
    let first = store.get(&controller_key()).await.unwrap().unwrap();

    registration
        .publish(store.as_ref(), lease_id)
        .await
        .unwrap();
    let second = store.get(&controller_key()).await.unwrap().unwrap();

    assert_eq!(store.stats().keys, 1);
    assert_eq!(first.value, second.value);
    assert_eq!(second.lease_id, Some(lease_id));
}

// ============================================================================
// Recovery
// ============================================================================

#[tokio::test]
async fn lease_loss_triggers_regrant_and_reregistration() {
    let store = Arc::new(MemStore::new());
    let keeper = test_keeper(&store, Duration::from_millis(100));
    keeper.add_source(Arc::new(ControllerRegistration::new(REGION, "ctrl-test")));
    let counting = CountingSource::new();
    keeper.add_source(Arc::clone(&counting) as Arc<dyn EphemeralSource>);

    keeper.start();
    wait_until("initial registration", 5, || keeper.lease_id() != 0).await;
    let first_lease = keeper.lease_id();
    wait_until("initial publish", 5, || counting.count() == 1).await;

    // Break the lease: the store purges its data and the keepalive fails.
    store.expire_lease(first_lease).unwrap();
    wait_until("re-registration", 5, || {
        let lease = keeper.lease_id();
        lease != 0 && lease != first_lease
    })
    .await;

    let second_lease = keeper.lease_id();
    assert_ne!(second_lease, first_lease);
    wait_until("counting source republished", 5, || counting.count() == 2).await;

    // The controller record is back, attached to the new lease.
    let record = store.get(&controller_key()).await.unwrap().unwrap();
    assert_eq!(record.lease_id, Some(second_lease));

    keeper.stop().await;
}

#[tokio::test]
async fn grant_failure_backs_off_and_recovers() {
    let store = Arc::new(MemStore::new());
    store.set_grant_failure(true);
    let keeper = test_keeper(&store, Duration::from_millis(50));
    keeper.add_source(Arc::new(ControllerRegistration::new(REGION, "ctrl-test")));

    keeper.start();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(keeper.lease_id(), 0);

    store.set_grant_failure(false);
    wait_until("recovery after grant failures", 5, || {
        keeper.lease_id() != 0
    })
    .await;
    keeper.stop().await;
}

// ============================================================================
// Shutdown semantics
// ============================================================================

#[tokio::test]
async fn stop_during_backoff_returns_promptly() {
    let store = Arc::new(MemStore::new());
    store.set_grant_failure(true);
    // A long retry interval: stop must not sit it out.
    let keeper = test_keeper(&store, Duration::from_secs(60));
    keeper.start();
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(1), keeper.stop())
        .await
        .expect("stop must return promptly during backoff");
    assert!(!keeper.is_running());
}

#[tokio::test]
async fn stop_interrupts_blocked_keepalive() {
    let store = Arc::new(MemStore::new());
    let keeper = test_keeper(&store, Duration::from_millis(100));
    keeper.add_source(Arc::new(ControllerRegistration::new(REGION, "ctrl-test")));

    keeper.start();
    wait_until("registration", 5, || keeper.lease_id() != 0).await;

    // The loop is parked in its keepalive call now.
    tokio::time::timeout(Duration::from_secs(1), keeper.stop())
        .await
        .expect("stop must interrupt the keepalive");
}

#[tokio::test]
async fn start_is_idempotent_and_restartable() {
    let store = Arc::new(MemStore::new());
    let keeper = test_keeper(&store, Duration::from_millis(100));
    keeper.add_source(Arc::new(ControllerRegistration::new(REGION, "ctrl-test")));

    keeper.start();
    keeper.start();
    assert!(keeper.is_running());
    wait_until("first registration", 5, || keeper.lease_id() != 0).await;
    let first_lease = keeper.lease_id();
    keeper.stop().await;
    assert!(!keeper.is_running());

    keeper.start();
    wait_until("second registration", 5, || keeper.lease_id() != 0).await;
    assert_ne!(keeper.lease_id(), first_lease);
    keeper.stop().await;
}
