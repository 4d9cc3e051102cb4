//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (e.g. `"HM_API_KEY"`).
//! - Callers invoke [`resolve_secrets`] once at startup and pass the result
//!   into constructors. No other module reads these variables.
//! - `Debug` redacts values. Errors name the variable, never the value.
//! - The API key and the shared secret are required. The database URL is
//!   required only for the `postgres` backend.

use anyhow::{bail, Result};

use crate::{Settings, StorageBackend};

#[derive(Clone)]
pub struct ResolvedSecrets {
    pub api_key: String,
    pub shared_secret: String,
    pub database_url: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("api_key", &"<REDACTED>")
            .field("shared_secret", &"<REDACTED>")
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// Unset and blank are the same thing.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

pub fn resolve_secrets(settings: &Settings) -> Result<ResolvedSecrets> {
    let names = &settings.secrets;

    let Some(api_key) = resolve_env(&names.api_key_env) else {
        bail!(
            "SECRETS_MISSING: required env var '{}' (api key) is not set or empty",
            names.api_key_env
        );
    };
    let Some(shared_secret) = resolve_env(&names.shared_secret_env) else {
        bail!(
            "SECRETS_MISSING: required env var '{}' (tamper-stamp shared secret) is not set or empty",
            names.shared_secret_env
        );
    };

    let database_url = resolve_env(&settings.storage.database_url_env);
    if settings.storage.backend == StorageBackend::Postgres && database_url.is_none() {
        bail!(
            "SECRETS_MISSING: required env var '{}' (database url) is not set or empty",
            settings.storage.database_url_env
        );
    }

    Ok(ResolvedSecrets {
        api_key,
        shared_secret,
        database_url,
    })
}
