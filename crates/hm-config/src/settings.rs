use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Postgres => "postgres",
            StorageBackend::Memory => "memory",
        }
    }
}

/// What to do with a batch that contains invalid elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// First invalid element rejects the whole batch; nothing is written.
    #[default]
    Atomic,
    /// Invalid elements are reported back; valid ones are processed.
    PerItem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: String,
    /// Take the report source address from the first `X-Forwarded-For` hop.
    /// Only safe behind a proxy that overwrites the header; off by default.
    pub trust_forwarded_for: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            trust_forwarded_for: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    /// Env var NAME holding the Postgres URL.
    pub database_url_env: String,
    pub timeout_ms: u64,
    pub max_connections: u32,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Postgres,
            database_url_env: "HM_DATABASE_URL".to_string(),
            timeout_ms: 5_000,
            max_connections: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    pub sweep_interval_secs: u64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub batch_policy: BatchPolicy,
    pub max_batch: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            batch_policy: BatchPolicy::Atomic,
            max_batch: 1_000,
        }
    }
}

/// Env var NAMES, never values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretEnvNames {
    pub api_key_env: String,
    pub shared_secret_env: String,
}

impl Default for SecretEnvNames {
    fn default() -> Self {
        Self {
            api_key_env: "HM_API_KEY".to_string(),
            shared_secret_env: "HM_SHARED_SECRET".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub retention: RetentionSettings,
    pub ingest: IngestSettings,
    pub secrets: SecretEnvNames,
}

impl Settings {
    pub fn from_config_json(config_json: &Value) -> Result<Self> {
        let settings: Settings =
            serde_json::from_value(config_json.clone()).context("CONFIG_INVALID: settings")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.timeout_ms == 0 {
            bail!("CONFIG_INVALID: storage.timeout_ms must be > 0");
        }
        if self.storage.max_connections == 0 {
            bail!("CONFIG_INVALID: storage.max_connections must be > 0");
        }
        if self.ingest.max_batch == 0 {
            bail!("CONFIG_INVALID: ingest.max_batch must be > 0");
        }
        if self.retention.sweep_interval_secs == 0 {
            bail!("CONFIG_INVALID: retention.sweep_interval_secs must be > 0");
        }
        for (ptr, name) in [
            ("/secrets/api_key_env", &self.secrets.api_key_env),
            ("/secrets/shared_secret_env", &self.secrets.shared_secret_env),
            ("/storage/database_url_env", &self.storage.database_url_env),
        ] {
            if name.trim().is_empty() {
                bail!("CONFIG_INVALID: {ptr} must name an environment variable");
            }
        }
        Ok(())
    }

    pub fn storage_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.storage.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_document_yields_defaults() {
        let s = Settings::from_config_json(&json!({})).unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(s.ingest.batch_policy, BatchPolicy::Atomic);
        assert_eq!(s.storage.backend, StorageBackend::Postgres);
    }

    #[test]
    fn forwarded_for_is_untrusted_unless_enabled() {
        let s = Settings::from_config_json(&json!({})).unwrap();
        assert!(!s.server.trust_forwarded_for);
        let s = Settings::from_config_json(&json!({"server": {"trust_forwarded_for": true}}))
            .unwrap();
        assert!(s.server.trust_forwarded_for);
    }

    #[test]
    fn unknown_enum_value_is_rejected() {
        let err = Settings::from_config_json(&json!({"ingest": {"batch_policy": "sometimes"}}))
            .unwrap_err();
        assert!(format!("{err:#}").contains("CONFIG_INVALID"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err =
            Settings::from_config_json(&json!({"storage": {"timeout_ms": 0}})).unwrap_err();
        assert!(err.to_string().contains("timeout_ms"));
    }
}
