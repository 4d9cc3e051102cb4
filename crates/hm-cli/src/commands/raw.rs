use anyhow::{Context, Result};
use hm_audit::TamperKey;
use tracing::warn;

use super::{env_secret, load_settings, parse_day, postgres_stores};

pub async fn verify(machine: &str, day: &str, config_paths: &[String]) -> Result<()> {
    let day = parse_day(day)?;
    let settings = load_settings(config_paths)?;
    let secret = env_secret(&settings.secrets.shared_secret_env)?;
    let key = TamperKey::new(&secret).context("shared secret rejected")?;

    let stores = postgres_stores().await?;
    let checks = hm_ingest::reconcile::verify_day(&stores, &key, machine, day).await?;

    let bad = checks.iter().filter(|c| !c.ok).count();
    for c in &checks {
        println!("record_id={} stamp_ok={}", c.record_id, c.ok);
        if !c.ok {
            warn!(
                machine_id = machine,
                %day,
                record_id = %c.record_id,
                "raw record stamp mismatch"
            );
        }
    }
    println!(
        "machine_id={} day={} records={} mismatches={}",
        machine,
        day,
        checks.len(),
        bad
    );

    if bad > 0 {
        anyhow::bail!("STAMP_MISMATCH: {bad} raw record(s) failed verification");
    }
    Ok(())
}
