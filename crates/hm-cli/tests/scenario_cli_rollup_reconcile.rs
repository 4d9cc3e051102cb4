//! `hm rollup reconcile` and `hm raw verify` against a live Postgres.
//!
//! Requires HM_DATABASE_URL; run with `cargo test -- --ignored`.
//! Failures are logged through tracing at `warn` before the command exits.

use std::process::Command;

use assert_cmd::prelude::*;
use chrono::{Duration, Utc};
use hm_audit::TamperKey;
use hm_ingest::{IngestContext, IngestCoordinator, IngestOptions};
use predicates::prelude::*;
use serde_json::json;

const SECRET: &str = "cli-test-shared-secret";

#[tokio::test]
#[ignore = "requires HM_DATABASE_URL pointing at a scratch Postgres"]
async fn reconcile_and_verify_clean_day() -> anyhow::Result<()> {
    let pool = hm_db::connect_from_env().await?;
    hm_db::migrate(&pool).await?;
    let stores = hm_db::Stores::postgres(pool);
    let rollup = stores.rollup.clone();

    let machine = format!("cli-{}", std::process::id());
    let ts = Utc::now() - Duration::hours(1);
    let day = ts.date_naive().format("%Y-%m-%d").to_string();

    let coordinator = IngestCoordinator::new(
        stores,
        Some(TamperKey::new(SECRET)?),
        IngestOptions::default(),
    );
    let body = json!([
        { "machineId": machine, "ts": ts.timestamp_millis(), "checks": { "sleep": { "ok": false } } },
        { "machineId": machine, "ts": ts.timestamp_millis() + 1, "checks": { "sleep": { "ok": true } } }
    ]);
    let ack = coordinator.ingest(body, &IngestContext::now(None)).await?;
    assert_eq!(ack.count, 2);

    Command::cargo_bin("hm")?
        .args(["rollup", "reconcile", "--machine", &machine, "--day", &day])
        .assert()
        .success()
        .stdout(predicate::str::contains("raw_records=2"))
        .stdout(predicate::str::contains("applied=false"));

    Command::cargo_bin("hm")?
        .env("HM_SHARED_SECRET", SECRET)
        .args(["raw", "verify", "--machine", &machine, "--day", &day])
        .assert()
        .success()
        .stdout(predicate::str::contains("mismatches=0"));

    Command::cargo_bin("hm")?
        .env("HM_SHARED_SECRET", "some-other-secret")
        .args(["raw", "verify", "--machine", &machine, "--day", &day])
        .assert()
        .failure()
        .stderr(predicate::str::contains("STAMP_MISMATCH"))
        .stderr(predicate::str::contains("raw record stamp mismatch"));

    // Drift the stored row; reconcile refuses without --apply and says why.
    let day_date = ts.date_naive();
    let mut row = rollup
        .summary(&machine, day_date)
        .await?
        .expect("row exists after ingest");
    row.report_count += 3;
    rollup.replace(&row).await?;

    Command::cargo_bin("hm")?
        .args(["rollup", "reconcile", "--machine", &machine, "--day", &day])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ROLLUP_DRIFT"))
        .stderr(predicate::str::contains("stored rollup row drifted from raw log"));

    Command::cargo_bin("hm")?
        .args(["rollup", "reconcile", "--machine", &machine, "--day", &day, "--apply"])
        .assert()
        .success()
        .stdout(predicate::str::contains("applied=true"));

    Ok(())
}
