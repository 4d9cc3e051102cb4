//! Scenario: config hash stability
//!
//! GREEN when:
//! - The same layers hash identically on every load.
//! - Key order inside a document does not move the hash.
//! - An overlay that changes a value changes the hash, and the overlay wins.

use hm_config::{load_layered_yaml_from_strings, BatchPolicy, StorageBackend};

const BASE_YAML: &str = r#"
server:
  bind_addr: "0.0.0.0:5000"
storage:
  backend: "postgres"
  database_url_env: "HM_DATABASE_URL"
  timeout_ms: 5000
ingest:
  batch_policy: "atomic"
  max_batch: 1000
"#;

const BASE_YAML_REORDERED: &str = r#"
ingest:
  max_batch: 1000
  batch_policy: "atomic"
storage:
  timeout_ms: 5000
  database_url_env: "HM_DATABASE_URL"
  backend: "postgres"
server:
  bind_addr: "0.0.0.0:5000"
"#;

const OVERLAY_YAML: &str = r#"
storage:
  backend: "memory"
ingest:
  batch_policy: "per_item"
"#;

#[test]
fn same_input_produces_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
}

#[test]
fn key_order_does_not_change_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
}

#[test]
fn overlay_wins_and_changes_hash() {
    let base = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let layered = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_ne!(base.config_hash, layered.config_hash);

    let s = layered.settings().unwrap();
    assert_eq!(s.storage.backend, StorageBackend::Memory);
    assert_eq!(s.ingest.batch_policy, BatchPolicy::PerItem);
    // Untouched keys survive the merge.
    assert_eq!(s.storage.timeout_ms, 5000);
    assert_eq!(s.server.bind_addr, "0.0.0.0:5000");
}

#[test]
fn empty_layer_is_ignored() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML, ""]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
}
