//! Rebuild a day's rollup from its raw records, and re-check raw stamps.
//!
//! Both read the raw log only. Neither runs on the ingest path.

use chrono::{NaiveDate, Utc};
use hm_audit::TamperKey;
use hm_db::{retention_cutoff, StoreError, Stores};
use hm_schemas::{DailySummary, RawRecord, Report, ReportError, RollupUpdate};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("raw record {record_id} no longer validates: {source}")]
    BadRecord {
        record_id: Uuid,
        source: ReportError,
    },
    #[error("day {day} is past raw-log retention; raw records may be gone")]
    PastRetention { day: NaiveDate },
    #[error(transparent)]
    Stamp(#[from] hm_audit::StampError),
}

/// Fold raw records, in arrival order, into the row they imply.
pub fn fold_records(records: &[RawRecord]) -> Result<Option<DailySummary>, ReconcileError> {
    let mut ordered: Vec<&RawRecord> = records.iter().collect();
    // Receipt times tie within a batch; seq is the order the merges ran in.
    ordered.sort_by_key(|r| r.seq);

    let mut row: Option<DailySummary> = None;
    for rec in ordered {
        let report = Report::from_json(rec.payload.clone(), rec.received_at).map_err(|source| {
            ReconcileError::BadRecord {
                record_id: rec.record_id,
                source,
            }
        })?;
        let update = RollupUpdate {
            machine_id: report.machine_id.clone(),
            day: rec.day,
            last_seen: rec.report_ts,
            score: hm_score::score(&report.checks),
            hostname: report.hostname,
            platform: report.platform,
            arch: report.arch,
            checks: report.checks,
        };
        match row.as_mut() {
            Some(r) => {
                r.fold(&update);
            }
            None => row = Some(DailySummary::first(&update)),
        }
    }
    Ok(row)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub machine_id: String,
    pub day: NaiveDate,
    pub raw_records: usize,
    pub expected: Option<DailySummary>,
    pub stored: Option<DailySummary>,
    pub differences: Vec<&'static str>,
    pub applied: bool,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.differences.is_empty()
    }
}

/// Compare the stored row with what the raw log implies. With `apply`, a
/// differing stored row is replaced by the expected one.
pub async fn reconcile_day(
    stores: &Stores,
    machine_id: &str,
    day: NaiveDate,
    apply: bool,
) -> Result<ReconcileReport, ReconcileError> {
    // A day that straddles the cutoff may have lost some of its records.
    if day <= retention_cutoff(Utc::now()).date_naive() {
        return Err(ReconcileError::PastRetention { day });
    }

    let records = stores.raw.records_for(machine_id, day).await?;
    let expected = fold_records(&records)?;
    let stored = stores.rollup.summary(machine_id, day).await?;

    let differences = match (&expected, &stored) {
        (Some(e), Some(s)) => s.diff(e),
        (None, None) => Vec::new(),
        (Some(_), None) => vec!["missingRow"],
        (None, Some(_)) => vec!["noRawRecords"],
    };

    let mut applied = false;
    if apply && !differences.is_empty() {
        if let Some(e) = &expected {
            stores.rollup.replace(e).await?;
            applied = true;
            tracing::info!(machine_id, %day, ?differences, "rollup row replaced from raw log");
        }
    }

    Ok(ReconcileReport {
        machine_id: machine_id.to_string(),
        day,
        raw_records: records.len(),
        expected,
        stored,
        differences,
        applied,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StampCheck {
    pub record_id: Uuid,
    pub ok: bool,
}

/// Recompute every raw stamp of one machine-day.
pub async fn verify_day(
    stores: &Stores,
    key: &TamperKey,
    machine_id: &str,
    day: NaiveDate,
) -> Result<Vec<StampCheck>, ReconcileError> {
    let records = stores.raw.records_for(machine_id, day).await?;
    let mut out = Vec::with_capacity(records.len());
    for rec in &records {
        let checks = rec.payload.get("checks").cloned().unwrap_or(Value::Null);
        let ok = key.verify(&checks, &rec.integrity_digest)?;
        if !ok {
            tracing::warn!(machine_id, %day, record_id = %rec.record_id, "raw stamp mismatch");
        }
        out.push(StampCheck {
            record_id: rec.record_id,
            ok,
        });
    }
    Ok(out)
}
