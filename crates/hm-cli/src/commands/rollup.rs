use anyhow::Result;
use tracing::{info, warn};

use super::{parse_day, postgres_stores};

pub async fn reconcile(machine: &str, day: &str, apply: bool) -> Result<()> {
    let day = parse_day(day)?;
    let stores = postgres_stores().await?;
    let report = hm_ingest::reconcile::reconcile_day(&stores, machine, day, apply).await?;

    println!("machine_id={}", report.machine_id);
    println!("day={}", report.day);
    println!("raw_records={}", report.raw_records);
    println!("differences={}", report.differences.join(","));
    println!("applied={}", report.applied);
    if let Some(e) = &report.expected {
        println!("expected={}", serde_json::to_string(e)?);
    }
    if let Some(s) = &report.stored {
        println!("stored={}", serde_json::to_string(s)?);
    }

    if report.applied {
        info!(machine_id = machine, %day, differences = ?report.differences, "rollup row replaced");
    }
    if !report.is_clean() && !report.applied {
        warn!(
            machine_id = machine,
            %day,
            differences = ?report.differences,
            "stored rollup row drifted from raw log"
        );
        anyhow::bail!(
            "ROLLUP_DRIFT: stored row differs from raw log ({}); re-run with --apply",
            report.differences.join(",")
        );
    }
    Ok(())
}
