//! Integration tests for the config module
//!
//! Covers the two persistence surfaces working together with the controller:
//! - loader: controller.toml parsing, partial overrides, validation
//! - prefs: the JSON key/value preference store, legacy records, clamping
//!
//! Test Organization:
//! - Controller config loading (4 tests)
//! - Preference store (5 tests)
//! - Preference survives a controller restart (1 test)

use pinned_panel::config::{loader, JsonPreferenceStore, PreferenceStore, PREF_KEY};
use pinned_panel::error::ConfigError;
use pinned_panel::{
    ControllerConfig, PanelController, PanelKind, Preference, SimulatedHost, SimulatedHostOptions,
    MAX_DWELL_SECONDS,
};
use serde_json::Value;
use std::fs;
use std::sync::Arc;

fn queue_preference(dwell_seconds: u64) -> Preference {
    Preference {
        enabled: true,
        desired_panel: Some(PanelKind::Queue),
        dwell_seconds,
    }
}

// ============================================================================
// Controller config loading
// ============================================================================

#[test]
fn test_missing_config_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = loader::load_or_default(&dir.path().join("controller.toml")).unwrap();
    assert_eq!(config, ControllerConfig::default());
}

#[test]
fn test_partial_config_overrides_only_named_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("controller.toml");
    fs::write(
        &path,
        "[timings]\nclose_settle_ms = 400\nreadiness_ceiling_ms = 30000\n",
    )
    .unwrap();

    let config = loader::load_or_default(&path).unwrap();
    assert_eq!(config.timings.close_settle_ms, 400);
    assert_eq!(config.timings.readiness_ceiling_ms, Some(30_000));
    assert_eq!(config.timings.open_settle_ms, 100);
    assert_eq!(config.catalog, ControllerConfig::default().catalog);
}

#[test]
fn test_invalid_config_is_an_error_not_a_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("controller.toml");

    fs::write(&path, "[timings]\nretry_delay_ms = 0\n").unwrap();
    assert!(matches!(
        loader::load_or_default(&path),
        Err(ConfigError::ValidationFailed(_))
    ));

    fs::write(&path, "[timings\n").unwrap();
    assert!(matches!(loader::load_or_default(&path), Err(ConfigError::InvalidToml(_))));
}

#[test]
fn test_saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("controller.toml");
    let mut config = ControllerConfig::default();
    config.timings.startup_switch_attempts = 5;
    config.catalog.panels.retain(|p| p.kind != PanelKind::Connect);

    loader::save_config_to_file(&config, &path).unwrap();
    let loaded = loader::load_config_from_file(&path).unwrap();
    assert_eq!(loaded, config);
    assert!(loaded.catalog.spec(PanelKind::Connect).is_none());
}

// ============================================================================
// Preference store
// ============================================================================

#[test]
fn test_store_writes_record_under_namespace_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    let store = JsonPreferenceStore::new(&path);

    let stored = store.set(queue_preference(45)).unwrap();
    assert_eq!(stored, queue_preference(45));

    let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    let record = &raw[PREF_KEY];
    assert_eq!(record["enabled"], Value::Bool(true));
    assert_eq!(record["desiredPanel"], Value::String("Queue".to_string()));
    assert_eq!(record["dwellSeconds"], Value::from(45));
}

#[test]
fn test_store_clamps_dwell_on_write() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonPreferenceStore::new(dir.path().join("storage.json"));
    let stored = store.set(queue_preference(3)).unwrap();
    assert_eq!(stored.dwell_seconds, 20);
    assert_eq!(store.get().dwell_seconds, 20);
}

#[test]
fn test_legacy_string_record_is_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    let record = r#"{"autoRestoreEnabled":true,"autoRestorePanel":"Connect to a device","autoRestoreTimeout":"30"}"#;
    let mut map = serde_json::Map::new();
    map.insert(PREF_KEY.to_string(), Value::String(record.to_string()));
    fs::write(&path, Value::Object(map).to_string()).unwrap();

    let prefs = JsonPreferenceStore::new(&path).get();
    assert!(prefs.enabled);
    assert_eq!(prefs.desired_panel, Some(PanelKind::Connect));
    assert_eq!(prefs.dwell_seconds, 30);
}

#[test]
fn test_garbage_storage_reads_as_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    fs::write(&path, "not json at all").unwrap();
    let store = JsonPreferenceStore::new(&path);
    assert_eq!(store.get(), Preference::default());

    // A write replaces the unreadable file with a valid map.
    store.set(queue_preference(20)).unwrap();
    assert_eq!(store.get(), queue_preference(20));
}

#[test]
fn test_out_of_range_dwell_in_file_is_capped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    fs::write(
        &path,
        format!(r#"{{"{}": {{"enabled": true, "desiredPanel": "Queue", "dwellSeconds": 1e30}}}}"#, PREF_KEY),
    )
    .unwrap();

    let prefs = JsonPreferenceStore::new(&path).get();
    assert_eq!(prefs.dwell_seconds, MAX_DWELL_SECONDS);
    assert_eq!(prefs.dwell(), std::time::Duration::from_secs(86_400));
}

// ============================================================================
// Restart
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_preference_survives_controller_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    let host = SimulatedHost::new(SimulatedHostOptions::default());
    host.open_now(PanelKind::FriendActivity);

    let first = Arc::new(PanelController::new(
        Arc::new(host.clone()),
        Arc::new(JsonPreferenceStore::new(&path)),
        ControllerConfig::default(),
    ));
    first.apply_preference_and_reconcile(queue_preference(25)).await.unwrap();
    first.shutdown();
    drop(first);

    let second = PanelController::new(
        Arc::new(host.clone()),
        Arc::new(JsonPreferenceStore::new(&path)),
        ControllerConfig::default(),
    );
    assert_eq!(second.preference(), queue_preference(25));
    assert_eq!(second.observe(), Some(PanelKind::Queue));
}
