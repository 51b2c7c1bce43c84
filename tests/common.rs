//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use trellis::core::config::Config;
use trellis::core::error::TrellisResult;
use trellis::store::api::VersionedStore;
use trellis::store::event::WatchEvent;
use trellis::store::key;
use trellis::store::mem::MemStore;
use trellis::sync::cache::CacheObject;
use trellis::sync::engine::SyncEngine;

/// Region used throughout the tests.
pub const REGION: u32 = 1;

/// Create a minimal valid configuration file.
pub fn create_minimal_config() -> NamedTempFile {
    let config_content = r#"
[region]
id = 1
controller_host = "ctrl-test"
"#;

    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(config_content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Create a configuration with custom settings.
pub fn create_config_with_settings(region_id: u32, store_mode: &str, log_level: &str) -> NamedTempFile {
    let config_content = format!(
        r#"
[region]
id = {}
controller_host = "ctrl-test"

[store]
mode = "{}"

[telemetry]
log_level = "{}"
"#,
        region_id, store_mode, log_level
    );

    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(config_content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Load a config from a temp file.
pub fn load_config(file: &NamedTempFile) -> Config {
    Config::from_file(file.path()).expect("Failed to load config")
}

/// A test object type projected into caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetNode {
    pub name: String,
    pub capacity: u32,
}

impl CacheObject for FleetNode {
    const TYPE_STRING: &'static str = "FleetNode";

    fn obj_key(&self) -> String {
        self.name.clone()
    }
}

impl FleetNode {
    pub fn new(name: &str, capacity: u32) -> Self {
        Self {
            name: name.to_string(),
            capacity,
        }
    }

    /// The store key for this node in the test region.
    pub fn store_key(&self) -> String {
        key::store_key(REGION, Self::TYPE_STRING, &self.name)
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("encode FleetNode")
    }
}

/// Write a node into the store directly, returning the commit revision.
pub async fn put_node(store: &MemStore, node: &FleetNode) -> u64 {
    store
        .put(&node.store_key(), node.encode(), None)
        .await
        .expect("put node")
}

/// Create a sync engine over a store for the test region.
pub fn new_engine(store: &Arc<MemStore>) -> Arc<SyncEngine> {
    let store: Arc<dyn VersionedStore> = Arc::clone(store) as Arc<dyn VersionedStore>;
    Arc::new(SyncEngine::new(store, REGION))
}

/// Spawn a raw watch over `prefix`, collecting every delivered event.
///
/// Returns the watch task handle, the captured events, and the shutdown
/// sender that terminates the watch.
pub fn spawn_watch(
    store: &Arc<MemStore>,
    prefix: &str,
) -> (
    JoinHandle<TrellisResult<()>>,
    Arc<Mutex<Vec<WatchEvent>>>,
    watch::Sender<bool>,
) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&events);
    let store = Arc::clone(store);
    let prefix = prefix.to_string();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        store
            .watch(&prefix, shutdown_rx, &mut |event| {
                captured.lock().push(event);
            })
            .await
    });
    (handle, events, shutdown_tx)
}

/// Poll `condition` every 10ms until it holds, panicking after `secs`.
pub async fn wait_until(what: &str, secs: u64, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(secs);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
