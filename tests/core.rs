//! Tests for configuration, key encoding, errors, and the runtime.

mod common;

use common::{create_config_with_settings, create_minimal_config, load_config, wait_until};
use trellis::core::config::Config;
use trellis::core::error::TrellisError;
use trellis::core::runtime::Runtime;
use trellis::store::key;

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn minimal_config_gets_defaults() {
    let file = create_minimal_config();
    let config = load_config(&file);

    assert_eq!(config.region.id, 1);
    assert_eq!(config.region.controller_host, "ctrl-test");
    assert_eq!(config.store.mode, "embedded");
    assert!(config.store.endpoints.is_empty());
    assert_eq!(config.lease.ttl_seconds, 20);
    assert_eq!(config.lease.retry_interval_ms, 5_000);
    assert_eq!(config.telemetry.log_level, "info");
}

#[test]
fn zero_region_is_rejected() {
    let result = Config::from_toml("[region]\nid = 0\n");
    assert!(result.is_err());
}

#[test]
fn unknown_store_mode_is_rejected() {
    let file = create_config_with_settings(1, "etcd", "info");
    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn external_mode_requires_endpoints() {
    let file = create_config_with_settings(1, "external", "info");
    assert!(Config::from_file(file.path()).is_err());

    let config = Config::from_toml(
        r#"
[region]
id = 1

[store]
mode = "external"
endpoints = ["http://store-0:2379"]
"#,
    )
    .unwrap();
    assert_eq!(config.store.endpoints.len(), 1);
}

#[test]
fn bad_log_level_is_rejected() {
    let file = create_config_with_settings(1, "embedded", "loud");
    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn invalid_lease_settings_are_rejected() {
    let toml = r#"
[region]
id = 1

[lease]
ttl_seconds = 0
"#;
    assert!(Config::from_toml(toml).is_err());

    let toml = r#"
[region]
id = 1

[lease]
retry_interval_ms = 0
"#;
    assert!(Config::from_toml(toml).is_err());
}

#[test]
fn overrides_replace_log_level() {
    let file = create_minimal_config();
    let mut config = load_config(&file);
    config.apply_overrides(Some("debug"));
    assert_eq!(config.telemetry.log_level, "debug");
    config.apply_overrides(None);
    assert_eq!(config.telemetry.log_level, "debug");
}

#[test]
fn template_validates_and_round_trips() {
    let template = Config::template(7);
    template.validate().unwrap();

    let rendered = toml::to_string_pretty(&template).unwrap();
    let parsed = Config::from_toml(&rendered).unwrap();
    assert_eq!(parsed.region.id, 7);
}

// ============================================================================
// Key encoding
// ============================================================================

#[test]
fn key_encode_and_parse_round_trip() {
    let encoded = key::store_key(3, "FleetNode", "node-7");
    assert_eq!(encoded, "3/FleetNode/node-7");

    let parsed = key::parse_store_key(&encoded).unwrap();
    assert_eq!(parsed.region, 3);
    assert_eq!(parsed.type_string, "FleetNode");
    assert_eq!(parsed.obj_key, "node-7");
}

#[test]
fn object_key_may_contain_separators() {
    let encoded = key::store_key(1, "Policy", r#"{"org":"acme","name":"a/b"}"#);
    let parsed = key::parse_store_key(&encoded).unwrap();
    assert_eq!(parsed.obj_key, r#"{"org":"acme","name":"a/b"}"#);
}

#[test]
fn region_prefix_covers_encoded_keys() {
    let prefix = key::region_prefix(12);
    assert_eq!(prefix, "12/");
    assert!(key::store_key(12, "T", "k").starts_with(&prefix));
}

#[test]
fn malformed_keys_are_rejected() {
    for bad in ["", "1", "1/", "1/T", "1/T/", "0/T/k", "x/T/k", "//k"] {
        assert!(
            key::parse_store_key(bad).is_err(),
            "key {:?} must be rejected",
            bad
        );
    }
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn retriability_classification() {
    assert!(TrellisError::unavailable("down").is_retriable());
    assert!(TrellisError::LeaseNotFound { lease_id: 1 }.is_retriable());
    assert!(TrellisError::LeaseLost {
        lease_id: 1,
        message: "gone".to_string()
    }
    .is_retriable());

    assert!(!TrellisError::TxnConflict {
        key: "1/T/k".to_string()
    }
    .is_retriable());
    assert!(!TrellisError::SyncStopped {
        waited: 5,
        reached: 3
    }
    .is_retriable());
    assert!(!TrellisError::invalid("nope").is_retriable());
}

#[test]
fn error_messages_carry_context() {
    let error = TrellisError::SyncStopped {
        waited: 10,
        reached: 7,
    };
    let message = error.to_string();
    assert!(message.contains("10"));
    assert!(message.contains("7"));
}

// ============================================================================
// Runtime
// ============================================================================

#[tokio::test]
async fn runtime_starts_syncs_and_registers_itself() {
    let file = create_minimal_config();
    let mut runtime = Runtime::new(load_config(&file)).unwrap();
    assert!(!runtime.is_running());
    assert!(!runtime.is_ready());

    runtime.start_for_tests().await.unwrap();
    assert!(runtime.is_running());
    assert!(runtime.is_ready());

    // The controller's own liveness record flows through the store, the
    // dispatch loop, and into the controllers cache.
    let controllers = std::sync::Arc::clone(runtime.controllers());
    wait_until("own liveness record in cache", 5, || {
        controllers.get("ctrl-test").is_some()
    })
    .await;
    let record = controllers.get("ctrl-test").unwrap();
    assert_eq!(record.region, 1);
    assert_eq!(record.build_version, env!("CARGO_PKG_VERSION"));

    runtime.shutdown_for_tests().await;
    assert!(!runtime.is_running());
    assert!(runtime.sync().is_done());
}

#[tokio::test]
async fn runtime_rejects_external_store_mode() {
    let config = Config::from_toml(
        r#"
[region]
id = 1

[store]
mode = "external"
endpoints = ["http://store-0:2379"]
"#,
    )
    .unwrap();
    assert!(Runtime::new(config).is_err());
}

#[tokio::test]
async fn runtime_shutdown_receiver_observes_shutdown() {
    let file = create_minimal_config();
    let runtime = Runtime::new(load_config(&file)).unwrap();
    let mut shutdown_rx = runtime.shutdown_receiver();
    assert!(!*shutdown_rx.borrow());
    runtime.shutdown();
    shutdown_rx.changed().await.unwrap();
    assert!(*shutdown_rx.borrow());
}
