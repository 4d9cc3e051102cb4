//! Scenario: many agents reporting at once
//!
//! GREEN when:
//! - N concurrent single-report calls for one machine-day give
//!   `report_count == N` and N raw records.
//! - The rollup holds the fields of the report with the max timestamp.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use hm_audit::TamperKey;
use hm_db::Stores;
use hm_ingest::{IngestContext, IngestCoordinator, IngestOptions};
use serde_json::json;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reports_lose_nothing() {
    let stores = Stores::memory();
    let coord = Arc::new(IngestCoordinator::new(
        stores.clone(),
        Some(TamperKey::new("concurrent-secret").unwrap()),
        IngestOptions::default(),
    ));
    let base = Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap();
    const N: i64 = 48;

    let mut handles = Vec::new();
    for i in 0..N {
        let coord = Arc::clone(&coord);
        let ts = base + Duration::minutes(i);
        handles.push(tokio::spawn(async move {
            let body = json!({
                "machineId": "fleet-7",
                "hostname": format!("h{i}"),
                "ts": ts.to_rfc3339(),
                // Odd minutes fail antivirus.
                "checks": {
                    "diskEncryption": {"ok": true},
                    "osUpdate": {"ok": true},
                    "antivirus": {"ok": i % 2 == 0},
                    "sleep": {"ok": true}
                }
            });
            coord.ingest(body, &IngestContext::now(None)).await.unwrap()
        }));
    }
    for h in handles {
        assert_eq!(h.await.unwrap().count, 1);
    }

    let day = base.date_naive();
    let row = stores.rollup.summary("fleet-7", day).await.unwrap().unwrap();
    assert_eq!(row.report_count, N);
    assert_eq!(row.hostname.as_deref(), Some("h47"));
    assert_eq!(row.score, 80);
    assert_eq!(row.last_seen, base + Duration::minutes(N - 1));
    assert_eq!(
        stores.raw.records_for("fleet-7", day).await.unwrap().len(),
        N as usize
    );
}
