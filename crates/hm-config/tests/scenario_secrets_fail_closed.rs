//! Scenario: secret resolution fails closed
//!
//! Each test points the config at its own sentinel env var names so tests
//! running in parallel never see each other's variables.
//!
//! GREEN when:
//! - Missing API key -> SECRETS_MISSING naming the variable.
//! - Missing shared secret -> SECRETS_MISSING naming the variable.
//! - Missing database URL fails only for the postgres backend.
//! - Debug output never contains a resolved value.

use hm_config::{resolve_secrets, Settings, StorageBackend};

fn settings(tag: &str, backend: StorageBackend) -> Settings {
    let mut s = Settings::default();
    s.secrets.api_key_env = format!("HM_TEST_{tag}_API_KEY");
    s.secrets.shared_secret_env = format!("HM_TEST_{tag}_SHARED_SECRET");
    s.storage.database_url_env = format!("HM_TEST_{tag}_DATABASE_URL");
    s.storage.backend = backend;
    s
}

#[test]
fn missing_api_key_fails() {
    let s = settings("NOKEY", StorageBackend::Memory);
    std::env::set_var(&s.secrets.shared_secret_env, "stamp-secret");
    let err = resolve_secrets(&s).unwrap_err().to_string();
    assert!(err.contains("SECRETS_MISSING"), "got: {err}");
    assert!(err.contains("HM_TEST_NOKEY_API_KEY"), "got: {err}");
}

#[test]
fn blank_shared_secret_fails() {
    let s = settings("BLANKSECRET", StorageBackend::Memory);
    std::env::set_var(&s.secrets.api_key_env, "key");
    std::env::set_var(&s.secrets.shared_secret_env, "   ");
    let err = resolve_secrets(&s).unwrap_err().to_string();
    assert!(err.contains("HM_TEST_BLANKSECRET_SHARED_SECRET"), "got: {err}");
}

#[test]
fn database_url_required_only_for_postgres() {
    let mem = settings("MEMDB", StorageBackend::Memory);
    std::env::set_var(&mem.secrets.api_key_env, "key");
    std::env::set_var(&mem.secrets.shared_secret_env, "secret");
    let resolved = resolve_secrets(&mem).unwrap();
    assert!(resolved.database_url.is_none());

    let pg = settings("PGDB", StorageBackend::Postgres);
    std::env::set_var(&pg.secrets.api_key_env, "key");
    std::env::set_var(&pg.secrets.shared_secret_env, "secret");
    let err = resolve_secrets(&pg).unwrap_err().to_string();
    assert!(err.contains("HM_TEST_PGDB_DATABASE_URL"), "got: {err}");
}

#[test]
fn debug_redacts_values() {
    let s = settings("REDACT", StorageBackend::Postgres);
    std::env::set_var(&s.secrets.api_key_env, "api-key-value-123");
    std::env::set_var(&s.secrets.shared_secret_env, "shared-secret-value-456");
    std::env::set_var(&s.storage.database_url_env, "postgres://u:p@h/db");
    let resolved = resolve_secrets(&s).unwrap();
    let dbg = format!("{resolved:?}");
    assert!(!dbg.contains("api-key-value-123"));
    assert!(!dbg.contains("shared-secret-value-456"));
    assert!(!dbg.contains("u:p@h"));
    assert!(dbg.contains("<REDACTED>"));
}
