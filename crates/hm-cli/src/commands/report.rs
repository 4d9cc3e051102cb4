use std::fs;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::warn;

use super::{env_secret, load_settings};

pub async fn send(url: &str, file: &str, config_paths: &[String]) -> Result<()> {
    let raw = fs::read_to_string(file).with_context(|| format!("read report file failed: {file}"))?;
    let body: Value =
        serde_json::from_str(&raw).with_context(|| format!("report file is not JSON: {file}"))?;

    let settings = load_settings(config_paths)?;
    let api_key = env_secret(&settings.secrets.api_key_env)?;

    let resp = reqwest::Client::new()
        .post(url)
        .header("x-api-key", api_key)
        .json(&body)
        .send()
        .await
        .with_context(|| format!("POST {url} failed"))?;

    let status = resp.status();
    let text = resp.text().await.context("read response body failed")?;
    println!("status={}", status.as_u16());
    println!("{text}");

    if !status.is_success() {
        warn!(url, %status, "daemon refused the report");
        anyhow::bail!("REPORT_REFUSED: daemon answered {status}");
    }
    Ok(())
}
