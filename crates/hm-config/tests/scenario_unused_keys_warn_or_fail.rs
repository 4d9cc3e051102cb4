//! Scenario: unused config keys
//!
//! GREEN when:
//! - A config that only uses known keys reports clean.
//! - A stray key is listed under Warn and is an error under Fail.
//! - Near-miss names ("/storage/backendx") are not covered by a consumed prefix.

use hm_config::{load_layered_yaml_from_strings, report_unused_keys, UnusedKeyPolicy};

const CLEAN: &str = r#"
server:
  bind_addr: "127.0.0.1:5000"
storage:
  backend: "memory"
retention:
  sweep_interval_secs: 60
"#;

const STRAY: &str = r#"
storage:
  backendx: "memory"
legacy:
  csv_export: true
"#;

#[test]
fn known_keys_are_clean() {
    let loaded = load_layered_yaml_from_strings(&[CLEAN]).unwrap();
    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Fail).unwrap();
    assert!(report.is_clean(), "{:?}", report.unused_leaf_pointers);
}

#[test]
fn stray_keys_are_listed_under_warn() {
    let loaded = load_layered_yaml_from_strings(&[CLEAN, STRAY]).unwrap();
    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn).unwrap();
    assert_eq!(
        report.unused_leaf_pointers,
        vec!["/legacy/csv_export".to_string(), "/storage/backendx".to_string()]
    );
}

#[test]
fn stray_keys_fail_under_fail() {
    let loaded = load_layered_yaml_from_strings(&[STRAY]).unwrap();
    let err = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Fail).unwrap_err();
    assert!(err.to_string().contains("CONFIG_UNUSED_KEYS"));
}
