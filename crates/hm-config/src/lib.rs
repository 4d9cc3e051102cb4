//! hm-config
//!
//! Layered YAML configuration for the healthmon daemon and CLI.
//!
//! - Documents merge in order; later documents override earlier ones.
//! - The merged document is hashed over its canonical JSON form.
//! - Literal secrets are refused (`CONFIG_SECRET_DETECTED`); YAML carries env
//!   var NAMES only and [`resolve_secrets`] reads them once at startup.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;

mod secrets;
mod settings;

pub use secrets::{resolve_secrets, ResolvedSecrets};
pub use settings::{
    BatchPolicy, IngestSettings, RetentionSettings, SecretEnvNames, ServerSettings, Settings,
    StorageBackend, StorageSettings,
};

/// Credential shapes refused anywhere in a config document. Values shorter
/// than eight characters are never treated as credentials.
const CREDENTIAL_MARKERS: &[&str] = &[
    "sk-", "sk_live", "sk_test", "AKIA", "ghp_", "gho_", "glpat-", "xoxb-", "xoxp-",
    "-----BEGIN",
];

/// A connection URL carries its password inline.
const CREDENTIAL_URLS: &[&str] = &["postgres://", "postgresql://"];

/// Merged configuration plus its identity.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// sha256 of `canonical_json`.
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

impl LoadedConfig {
    pub fn settings(&self) -> Result<Settings> {
        Settings::from_config_json(&self.config_json)
    }
}

/// Read and merge YAML files in order.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let docs = paths
        .iter()
        .map(|p| fs::read_to_string(p).with_context(|| format!("CONFIG_READ: {p}")))
        .collect::<Result<Vec<String>>>()?;
    let refs: Vec<&str> = docs.iter().map(String::as_str).collect();
    load_layered_yaml_from_strings(&refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());
    for (i, raw) in yaml_docs.iter().enumerate() {
        let layer: serde_yaml::Value =
            serde_yaml::from_str(raw).with_context(|| format!("CONFIG_YAML: layer {i}"))?;
        // Empty files parse as null.
        if layer.is_null() {
            continue;
        }
        let layer = serde_json::to_value(layer)
            .with_context(|| format!("CONFIG_YAML: layer {i} is not JSON-representable"))?;
        overlay(&mut merged, layer);
    }

    reject_credentials(&merged)?;

    let canonical_json = hm_audit::canonical_json(&merged).context("CONFIG_CANONICAL")?;
    Ok(LoadedConfig {
        config_hash: hm_audit::sha256_hex(canonical_json.as_bytes()),
        canonical_json,
        config_json: merged,
    })
}

/// Objects merge key by key; anything else in `top` replaces `base`.
fn overlay(base: &mut Value, top: Value) {
    match (base, top) {
        (Value::Object(base_map), Value::Object(top_map)) => {
            for (k, v) in top_map {
                overlay(base_map.entry(k).or_insert(Value::Null), v);
            }
        }
        (slot, v) => *slot = v,
    }
}

fn reject_credentials(v: &Value) -> Result<()> {
    for (ptr, leaf) in leaves(v) {
        if leaf.as_str().is_some_and(looks_like_secret) {
            bail!("CONFIG_SECRET_DETECTED leaf={ptr} value=REDACTED");
        }
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    CREDENTIAL_URLS.iter().any(|u| t.starts_with(u))
        || (t.len() >= 8 && CREDENTIAL_MARKERS.iter().any(|m| t.starts_with(m)))
}

/// Every scalar leaf with its JSON pointer, in document order. The root of a
/// scalar document is `/`.
fn leaves(root: &Value) -> Vec<(String, &Value)> {
    let mut out = Vec::new();
    let mut stack = vec![(String::new(), root)];
    while let Some((ptr, v)) = stack.pop() {
        match v {
            Value::Object(map) => {
                for (k, child) in map.iter().rev() {
                    let token = k.replace('~', "~0").replace('/', "~1");
                    stack.push((format!("{ptr}/{token}"), child));
                }
            }
            Value::Array(items) => {
                for (i, child) in items.iter().enumerate().rev() {
                    stack.push((format!("{ptr}/{i}"), child));
                }
            }
            _ if ptr.is_empty() => out.push(("/".to_string(), v)),
            _ => out.push((ptr, v)),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Unused-key guard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    pub consumed_prefixes: Vec<String>,
    /// Sorted.
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// JSON pointers [`Settings`] reads. Keep in step with `settings.rs`.
pub fn consumed_pointers() -> &'static [&'static str] {
    &[
        "/server/bind_addr",
        "/server/trust_forwarded_for",
        "/storage/backend",
        "/storage/database_url_env",
        "/storage/timeout_ms",
        "/storage/max_connections",
        "/retention/sweep_interval_secs",
        "/ingest/batch_policy",
        "/ingest/max_batch",
        "/secrets/api_key_env",
        "/secrets/shared_secret_env",
    ]
}

/// Leaves of `config_json` that no consumed pointer covers. A typo such as
/// `ingest/batch_polcy` would otherwise fall back to the default silently.
pub fn report_unused_keys(config_json: &Value, policy: UnusedKeyPolicy) -> Result<UnusedKeyReport> {
    let consumed: BTreeSet<&str> = consumed_pointers().iter().copied().collect();

    let unused: BTreeSet<String> = leaves(config_json)
        .into_iter()
        .map(|(ptr, _)| ptr)
        .filter(|ptr| !consumed.iter().any(|c| covers(c, ptr)))
        .collect();

    let report = UnusedKeyReport {
        consumed_prefixes: consumed.iter().map(|c| c.to_string()).collect(),
        unused_leaf_pointers: unused.into_iter().collect(),
    };
    if report.is_clean() {
        return Ok(report);
    }

    let first: Vec<&str> = report
        .unused_leaf_pointers
        .iter()
        .take(12)
        .map(String::as_str)
        .collect();
    match policy {
        UnusedKeyPolicy::Fail => bail!(
            "CONFIG_UNUSED_KEYS: {} unused key(s): {:?}",
            report.unused_leaf_pointers.len(),
            first
        ),
        UnusedKeyPolicy::Warn => {
            tracing::warn!(
                unused = report.unused_leaf_pointers.len(),
                first = ?first,
                "CONFIG_UNUSED_KEYS"
            );
            Ok(report)
        }
    }
}

/// "/a/b" covers "/a/b" and "/a/b/c" but not "/a/bc".
fn covers(prefix: &str, leaf: &str) -> bool {
    prefix == "/"
        || leaf
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}
