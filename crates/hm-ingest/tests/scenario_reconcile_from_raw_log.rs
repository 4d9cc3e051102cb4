//! Scenario: rebuild a rollup row from the raw log, and audit raw stamps
//!
//! GREEN when:
//! - A clean day reconciles with no differences.
//! - A drifted row is reported column by column, and `apply` restores it.
//! - A raw record whose stamp no longer matches its checks is flagged.
//! - A day past retention is refused.
//! - A batch whose reports share one receipt time and one report time
//!   replays in submission order and reconciles clean.

use chrono::{Duration, Utc};
use hm_audit::TamperKey;
use hm_db::Stores;
use hm_ingest::reconcile::{reconcile_day, verify_day, ReconcileError};
use hm_ingest::{IngestContext, IngestCoordinator, IngestOptions};
use hm_schemas::RawRecord;
use serde_json::json;
use uuid::Uuid;

const SECRET: &str = "reconcile-secret";

async fn seeded() -> (Stores, chrono::NaiveDate) {
    let stores = Stores::memory();
    let coord = IngestCoordinator::new(
        stores.clone(),
        Some(TamperKey::new(SECRET).unwrap()),
        IngestOptions::default(),
    );
    let now = Utc::now();
    for (mins, ok) in [(30, true), (10, false), (20, true)] {
        let ts = now - Duration::minutes(mins);
        coord
            .ingest(
                json!({"machineId": "r1", "ts": ts.to_rfc3339(),
                       "checks": {"diskEncryption": {"ok": ok}}}),
                &IngestContext::now(None),
            )
            .await
            .unwrap();
    }
    // Reports may straddle midnight; use the day of the newest one.
    let day = (now - Duration::minutes(10)).date_naive();
    (stores, day)
}

#[tokio::test]
async fn clean_day_has_no_differences() {
    let (stores, day) = seeded().await;
    let report = reconcile_day(&stores, "r1", day, false).await.unwrap();
    assert!(report.is_clean(), "{:?}", report.differences);
    assert!(!report.applied);
}

#[tokio::test]
async fn drifted_row_is_detected_and_repaired() {
    let (stores, day) = seeded().await;
    let mut drifted = stores.rollup.summary("r1", day).await.unwrap().unwrap();
    drifted.report_count += 5;
    drifted.score = 100;
    stores.rollup.replace(&drifted).await.unwrap();

    let report = reconcile_day(&stores, "r1", day, false).await.unwrap();
    assert_eq!(report.differences, vec!["score", "reportCount"]);
    assert!(!report.applied);

    let report = reconcile_day(&stores, "r1", day, true).await.unwrap();
    assert!(report.applied);
    let fixed = stores.rollup.summary("r1", day).await.unwrap().unwrap();
    assert_eq!(Some(fixed), report.expected);
    assert!(reconcile_day(&stores, "r1", day, false).await.unwrap().is_clean());
}

#[tokio::test]
async fn forged_raw_record_fails_stamp_check() {
    let (stores, day) = seeded().await;
    let key = TamperKey::new(SECRET).unwrap();
    let records = stores.raw.records_for("r1", day).await.unwrap();
    let genuine = &records[0];

    let forged = RawRecord {
        record_id: Uuid::new_v4(),
        payload: json!({"machineId": "r1", "checks": {"diskEncryption": {"ok": true}}}),
        integrity_digest: key
            .stamp(&json!({"diskEncryption": {"ok": false}}))
            .unwrap(),
        ..genuine.clone()
    };
    stores.raw.append(&forged).await.unwrap();

    let checks = verify_day(&stores, &key, "r1", day).await.unwrap();
    let bad: Vec<_> = checks.iter().filter(|c| !c.ok).collect();
    assert_eq!(bad.len(), 1);
    assert_eq!(bad[0].record_id, forged.record_id);
}

#[tokio::test]
async fn day_past_retention_is_refused() {
    let stores = Stores::memory();
    let old = (Utc::now() - Duration::days(31)).date_naive();
    let err = reconcile_day(&stores, "r1", old, false).await.unwrap_err();
    assert!(matches!(err, ReconcileError::PastRetention { .. }));
}

#[tokio::test]
async fn tied_batch_replays_in_submission_order() {
    // Record ids are random, so a wrong tie-break would show up within a few
    // rounds.
    for _ in 0..16 {
        let stores = Stores::memory();
        let coord = IngestCoordinator::new(
            stores.clone(),
            Some(TamperKey::new(SECRET).unwrap()),
            IngestOptions::default(),
        );
        let ctx = IngestContext::now(None);
        let all_ok = json!({"diskEncryption": {"ok": true}, "osUpdate": {"ok": true},
                            "antivirus": {"ok": true}, "sleep": {"ok": true}});
        let mut disk_off = all_ok.clone();
        disk_off["diskEncryption"] = json!({"ok": false});
        let batch = json!([
            {"machineId": "tie", "checks": disk_off},
            {"machineId": "tie", "checks": all_ok}
        ]);
        coord.ingest(batch, &ctx).await.unwrap();

        let day = ctx.received_at.date_naive();
        let live = stores.rollup.summary("tie", day).await.unwrap().unwrap();
        assert_eq!(live.score, 100);

        let report = reconcile_day(&stores, "tie", day, false).await.unwrap();
        assert!(report.is_clean(), "{:?}", report.differences);
    }
}
