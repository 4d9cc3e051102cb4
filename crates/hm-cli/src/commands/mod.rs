//! Command handler modules for hm-cli.
//!
//! Shared helpers live here; command-specific logic lives in the submodules.

pub mod raw;
pub mod report;
pub mod rollup;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use hm_config::Settings;

pub fn parse_day(day: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(day.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid --day '{day}', expected YYYY-MM-DD"))
}

/// No paths means built-in defaults.
pub fn load_settings(paths: &[String]) -> Result<Settings> {
    if paths.is_empty() {
        return Ok(Settings::default());
    }
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    hm_config::load_layered_yaml(&path_refs)?.settings()
}

/// Read a secret from the env var `name`, failing when unset or blank.
pub fn env_secret(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => anyhow::bail!("SECRETS_MISSING: required env var '{name}' is not set or empty"),
    }
}

pub async fn postgres_stores() -> Result<hm_db::Stores> {
    let pool = hm_db::connect_from_env().await?;
    Ok(hm_db::Stores::postgres(pool))
}
