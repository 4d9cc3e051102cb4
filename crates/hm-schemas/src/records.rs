use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::CheckSet;

/// One accepted report as it lands in the raw log. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    pub record_id: Uuid,
    /// Arrival position in the log, assigned by the store on append. Later
    /// appends get larger values; the value passed to `append` is ignored.
    #[serde(default)]
    pub seq: i64,
    pub machine_id: String,
    pub day: NaiveDate,
    pub received_at: DateTime<Utc>,
    pub report_ts: DateTime<Utc>,
    pub payload: Value,
    pub source_address: Option<String>,
    /// Hex HMAC-SHA-256 over the canonical `checks` object.
    pub integrity_digest: String,
}

/// The per-report input to a rollup merge.
#[derive(Debug, Clone, PartialEq)]
pub struct RollupUpdate {
    pub machine_id: String,
    pub day: NaiveDate,
    /// Report timestamp, not receipt time.
    pub last_seen: DateTime<Utc>,
    pub hostname: Option<String>,
    pub platform: Option<String>,
    pub arch: Option<String>,
    pub checks: CheckSet,
    pub score: u8,
}

/// One row per `(machine_id, day)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    pub machine_id: String,
    pub day: NaiveDate,
    pub last_seen: DateTime<Utc>,
    pub hostname: Option<String>,
    pub platform: Option<String>,
    pub arch: Option<String>,
    pub latest_checks: CheckSet,
    pub score: u8,
    pub report_count: i64,
}

impl DailySummary {
    pub fn first(update: &RollupUpdate) -> Self {
        Self {
            machine_id: update.machine_id.clone(),
            day: update.day,
            last_seen: update.last_seen,
            hostname: update.hostname.clone(),
            platform: update.platform.clone(),
            arch: update.arch.clone(),
            latest_checks: update.checks.clone(),
            score: update.score,
            report_count: 1,
        }
    }

    /// Fold one more report into the row.
    ///
    /// The count always moves. Latest-wins fields move only when the report is
    /// at least as new as `last_seen`, so ties go to the later arrival. Absent
    /// descriptive fields keep the stored value. Returns whether the report
    /// became the latest.
    pub fn fold(&mut self, update: &RollupUpdate) -> bool {
        self.report_count += 1;
        if update.last_seen < self.last_seen {
            return false;
        }
        self.last_seen = update.last_seen;
        if update.hostname.is_some() {
            self.hostname = update.hostname.clone();
        }
        if update.platform.is_some() {
            self.platform = update.platform.clone();
        }
        if update.arch.is_some() {
            self.arch = update.arch.clone();
        }
        self.latest_checks = update.checks.clone();
        self.score = update.score;
        true
    }

    /// Column-for-column comparison that ignores nothing. Used by reconciliation.
    pub fn diff(&self, other: &DailySummary) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.last_seen != other.last_seen {
            out.push("lastSeen");
        }
        if self.hostname != other.hostname {
            out.push("hostname");
        }
        if self.platform != other.platform {
            out.push("platform");
        }
        if self.arch != other.arch {
            out.push("arch");
        }
        if self.latest_checks != other.latest_checks {
            out.push("latestChecks");
        }
        if self.score != other.score {
            out.push("score");
        }
        if self.report_count != other.report_count {
            out.push("reportCount");
        }
        out
    }
}

/// What a merge reports back to the ingest path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    pub report_count: i64,
    pub score: u8,
    pub last_seen: DateTime<Utc>,
    pub became_latest: bool,
}

impl From<(&DailySummary, bool)> for MergeOutcome {
    fn from((row, became_latest): (&DailySummary, bool)) -> Self {
        Self {
            report_count: row.report_count,
            score: row.score,
            last_seen: row.last_seen,
            became_latest,
        }
    }
}

/// Latest known state of a machine across all days. Read-side projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineState {
    pub machine_id: String,
    pub hostname: Option<String>,
    pub platform: Option<String>,
    pub arch: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub last_day: NaiveDate,
    pub checks: CheckSet,
    pub score: u8,
}

impl MachineState {
    pub fn from_update(update: &RollupUpdate) -> Self {
        Self {
            machine_id: update.machine_id.clone(),
            hostname: update.hostname.clone(),
            platform: update.platform.clone(),
            arch: update.arch.clone(),
            last_seen: update.last_seen,
            last_day: update.day,
            checks: update.checks.clone(),
            score: update.score,
        }
    }

    /// Same ordering rule as [`DailySummary::fold`], without a count.
    pub fn apply(&mut self, update: &RollupUpdate) -> bool {
        if update.last_seen < self.last_seen {
            return false;
        }
        self.last_seen = update.last_seen;
        self.last_day = update.day;
        if update.hostname.is_some() {
            self.hostname = update.hostname.clone();
        }
        if update.platform.is_some() {
            self.platform = update.platform.clone();
        }
        if update.arch.is_some() {
            self.arch = update.arch.clone();
        }
        self.checks = update.checks.clone();
        self.score = update.score;
        true
    }

    pub fn has_issues(&self) -> bool {
        self.score < 100
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CheckResult;
    use chrono::TimeZone;

    fn update(hour: u32, score: u8, hostname: Option<&str>) -> RollupUpdate {
        RollupUpdate {
            machine_id: "m1".into(),
            day: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            last_seen: Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap(),
            hostname: hostname.map(str::to_string),
            platform: Some("linux".into()),
            arch: None,
            checks: [("sleep".to_string(), CheckResult::passing())]
                .into_iter()
                .collect(),
            score,
        }
    }

    #[test]
    fn older_report_counts_but_does_not_overwrite() {
        let mut row = DailySummary::first(&update(10, 70, Some("a")));
        let latest = row.fold(&update(8, 100, Some("b")));
        assert!(!latest);
        assert_eq!(row.report_count, 2);
        assert_eq!(row.score, 70);
        assert_eq!(row.hostname.as_deref(), Some("a"));
    }

    #[test]
    fn equal_timestamp_goes_to_later_arrival() {
        let mut row = DailySummary::first(&update(10, 70, Some("a")));
        assert!(row.fold(&update(10, 95, None)));
        assert_eq!(row.score, 95);
        // Absent hostname keeps the stored one.
        assert_eq!(row.hostname.as_deref(), Some("a"));
    }

    #[test]
    fn diff_names_changed_columns() {
        let a = DailySummary::first(&update(10, 70, Some("a")));
        let mut b = a.clone();
        b.fold(&update(11, 70, Some("a")));
        assert_eq!(a.diff(&b), vec!["lastSeen", "reportCount"]);
    }

    #[test]
    fn machine_state_flags_issues_below_full_score() {
        let mut st = MachineState::from_update(&update(9, 100, None));
        assert!(!st.has_issues());
        assert!(st.apply(&update(12, 75, None)));
        assert!(st.has_issues());
        assert!(!st.apply(&update(11, 100, None)));
        assert_eq!(st.score, 75);
    }
}
