//! Inbound report schema.
//!
//! `WireReport` is the exact shape field agents POST. It is decoded from a
//! single JSON element and then promoted to a validated [`Report`]; nothing
//! downstream touches the untyped payload except the raw log, which stores it
//! verbatim.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::CheckSet;

/// Why a single report element was refused at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportError {
    #[error("request body must be a JSON object or an array of objects")]
    BadBody,
    #[error("report must be a JSON object")]
    NotAnObject,
    #[error("missing machineId")]
    MissingMachineId,
    #[error("missing checks")]
    MissingChecks,
    #[error("invalid ts: {0}")]
    Timestamp(String),
    #[error("malformed report: {0}")]
    Schema(String),
    /// Postgres `jsonb` cannot store U+0000.
    #[error("report contains a NUL character")]
    NulCharacter,
}

/// `ts` on the wire: ISO-8601 text or epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    Millis(i64),
    Text(String),
}

impl WireTimestamp {
    pub fn resolve(&self) -> Result<DateTime<Utc>, ReportError> {
        match self {
            WireTimestamp::Millis(ms) => DateTime::<Utc>::from_timestamp_millis(*ms)
                .ok_or_else(|| ReportError::Timestamp(format!("epoch millis out of range: {ms}"))),
            WireTimestamp::Text(s) => parse_iso8601(s),
        }
    }
}

/// Accepts RFC 3339 with offset, a naive date-time (taken as UTC), or a bare
/// date (UTC midnight).
fn parse_iso8601(s: &str) -> Result<DateTime<Utc>, ReportError> {
    let t = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(ndt.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        if let Some(ndt) = d.and_hms_opt(0, 0, 0) {
            return Ok(ndt.and_utc());
        }
    }
    Err(ReportError::Timestamp(format!("not ISO-8601: {t:?}")))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireReport {
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub arch: Option<String>,
    #[serde(default, alias = "timestamp")]
    pub ts: Option<WireTimestamp>,
    #[serde(default)]
    pub checks: Option<CheckSet>,
}

/// A report that passed boundary validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub machine_id: String,
    pub hostname: Option<String>,
    pub platform: Option<String>,
    pub arch: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// True when the agent sent no `ts` and receipt time was used.
    pub timestamp_defaulted: bool,
    pub checks: CheckSet,
    /// `checks` exactly as submitted. Input to the tamper stamp.
    pub checks_json: Value,
    /// The whole element exactly as submitted.
    pub payload: Value,
}

impl Report {
    /// Validate one JSON element. `received_at` fills a missing `ts`.
    pub fn from_json(payload: Value, received_at: DateTime<Utc>) -> Result<Self, ReportError> {
        let Value::Object(obj) = &payload else {
            return Err(ReportError::NotAnObject);
        };
        if contains_nul(&payload) {
            return Err(ReportError::NulCharacter);
        }
        let checks_json = obj.get("checks").cloned().unwrap_or(Value::Null);

        let wire: WireReport = serde_json::from_value(payload.clone())
            .map_err(|e| ReportError::Schema(e.to_string()))?;

        let machine_id = match wire.machine_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => return Err(ReportError::MissingMachineId),
        };
        let checks = wire.checks.ok_or(ReportError::MissingChecks)?;

        let (timestamp, timestamp_defaulted) = match &wire.ts {
            Some(ts) => (ts.resolve()?, false),
            None => (received_at, true),
        };

        Ok(Self {
            machine_id,
            hostname: wire.hostname,
            platform: wire.platform,
            arch: wire.arch,
            timestamp,
            timestamp_defaulted,
            checks,
            checks_json,
            payload,
        })
    }

    /// UTC calendar day of the report timestamp. Rollup key component.
    pub fn day(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Any key or string value anywhere in `v` holding U+0000.
fn contains_nul(v: &Value) -> bool {
    match v {
        Value::String(s) => s.contains('\0'),
        Value::Array(items) => items.iter().any(contains_nul),
        Value::Object(obj) => obj.iter().any(|(k, v)| k.contains('\0') || contains_nul(v)),
        _ => false,
    }
}

/// Split a request body into its elements. A lone object is a batch of one.
pub fn split_batch(body: Value) -> Result<Vec<Value>, ReportError> {
    match body {
        Value::Object(_) => Ok(vec![body]),
        Value::Array(items) => Ok(items),
        _ => Err(ReportError::BadBody),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap()
    }

    #[test]
    fn missing_ts_defaults_to_receipt_time() {
        let r = Report::from_json(json!({"machineId": "m1", "checks": {}}), received()).unwrap();
        assert_eq!(r.timestamp, received());
        assert!(r.timestamp_defaulted);
        assert_eq!(r.day(), NaiveDate::from_ymd_opt(2025, 3, 14).unwrap());
    }

    #[test]
    fn epoch_millis_and_iso_text_both_resolve() {
        let millis = Report::from_json(
            json!({"machineId": "m1", "ts": 1_700_000_000_000i64, "checks": {}}),
            received(),
        )
        .unwrap();
        assert_eq!(millis.timestamp.timestamp_millis(), 1_700_000_000_000);

        let text = Report::from_json(
            json!({"machineId": "m1", "ts": "2025-01-02T23:59:59+02:00", "checks": {}}),
            received(),
        )
        .unwrap();
        // Offset is normalised before the day is taken.
        assert_eq!(text.day(), NaiveDate::from_ymd_opt(2025, 1, 2).unwrap());
        assert_eq!(text.timestamp.to_rfc3339(), "2025-01-02T21:59:59+00:00");

        let aliased = Report::from_json(
            json!({"machineId": "m1", "timestamp": "2025-01-05", "checks": {}}),
            received(),
        )
        .unwrap();
        assert_eq!(aliased.day(), NaiveDate::from_ymd_opt(2025, 1, 5).unwrap());
    }

    #[test]
    fn blank_machine_id_is_rejected() {
        let err = Report::from_json(json!({"machineId": "  ", "checks": {}}), received())
            .unwrap_err();
        assert_eq!(err, ReportError::MissingMachineId);
    }

    #[test]
    fn absent_or_null_checks_are_rejected() {
        let err = Report::from_json(json!({"machineId": "m1"}), received()).unwrap_err();
        assert_eq!(err, ReportError::MissingChecks);
        let err =
            Report::from_json(json!({"machineId": "m1", "checks": null}), received()).unwrap_err();
        assert_eq!(err, ReportError::MissingChecks);
    }

    #[test]
    fn non_conforming_shapes_are_schema_errors() {
        let bad_check = Report::from_json(
            json!({"machineId": "m1", "checks": {"sleep": true}}),
            received(),
        );
        assert!(matches!(bad_check, Err(ReportError::Schema(_))));

        let bad_host = Report::from_json(
            json!({"machineId": "m1", "hostname": 42, "checks": {}}),
            received(),
        );
        assert!(matches!(bad_host, Err(ReportError::Schema(_))));

        let bad_ts = Report::from_json(
            json!({"machineId": "m1", "ts": "yesterday", "checks": {}}),
            received(),
        );
        assert!(matches!(bad_ts, Err(ReportError::Timestamp(_))));
    }

    #[test]
    fn payload_is_kept_verbatim() {
        let body = json!({"machineId": "m1", "agentVersion": "2.1", "checks": {"x": {"ok": true}}});
        let r = Report::from_json(body.clone(), received()).unwrap();
        assert_eq!(r.payload, body);
        assert_eq!(r.checks_json, json!({"x": {"ok": true}}));
    }

    #[test]
    fn split_batch_accepts_object_or_array_only() {
        assert_eq!(split_batch(json!({"a": 1})).unwrap().len(), 1);
        assert_eq!(split_batch(json!([{}, {}])).unwrap().len(), 2);
        assert_eq!(split_batch(json!("nope")).unwrap_err(), ReportError::BadBody);
    }

    #[test]
    fn nul_anywhere_in_the_payload_is_refused() {
        let in_details = json!({"machineId": "m1", "checks": {
            "antivirus": {"ok": true, "details": "av\u{0000}x"}
        }});
        assert_eq!(
            Report::from_json(in_details, received()).unwrap_err(),
            ReportError::NulCharacter
        );

        let in_key = json!({"machineId": "m1", "checks": {}, "extra\u{0000}": 1});
        assert_eq!(
            Report::from_json(in_key, received()).unwrap_err(),
            ReportError::NulCharacter
        );

        let escaped_text = json!({"machineId": "m1", "hostname": "a\\u0000b", "checks": {}});
        assert!(Report::from_json(escaped_text, received()).is_ok());
    }
}
