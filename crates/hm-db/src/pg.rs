use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use hm_schemas::{CheckSet, DailySummary, MachineState, MergeOutcome, RawRecord, RollupUpdate};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{
    retention, DailyRollup, MachineFilter, MachineStates, RawLog, RawRetention, StoreError,
};

/// Postgres-backed stores. Same-key merges serialize through
/// `insert .. on conflict do update`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn score_from_db(v: i16) -> Result<u8, StoreError> {
    u8::try_from(v).map_err(|_| StoreError::Corrupt(format!("score out of range: {v}")))
}

fn raw_from_row(row: &PgRow) -> Result<RawRecord, StoreError> {
    Ok(RawRecord {
        record_id: row.try_get("record_id")?,
        seq: row.try_get("seq")?,
        machine_id: row.try_get("machine_id")?,
        day: row.try_get("day")?,
        received_at: row.try_get("received_at")?,
        report_ts: row.try_get("report_ts")?,
        payload: row.try_get::<Value, _>("payload")?,
        source_address: row.try_get("source_address")?,
        integrity_digest: row.try_get("integrity_digest")?,
    })
}

fn summary_from_row(row: &PgRow) -> Result<DailySummary, StoreError> {
    let Json(latest_checks): Json<CheckSet> = row.try_get("latest_checks")?;
    Ok(DailySummary {
        machine_id: row.try_get("machine_id")?,
        day: row.try_get("day")?,
        last_seen: row.try_get("last_seen")?,
        hostname: row.try_get("hostname")?,
        platform: row.try_get("platform")?,
        arch: row.try_get("arch")?,
        latest_checks,
        score: score_from_db(row.try_get("score")?)?,
        report_count: row.try_get("report_count")?,
    })
}

fn machine_from_row(row: &PgRow) -> Result<MachineState, StoreError> {
    let Json(checks): Json<CheckSet> = row.try_get("checks")?;
    Ok(MachineState {
        machine_id: row.try_get("machine_id")?,
        hostname: row.try_get("hostname")?,
        platform: row.try_get("platform")?,
        arch: row.try_get("arch")?,
        last_seen: row.try_get("last_seen")?,
        last_day: row.try_get("last_day")?,
        checks,
        score: score_from_db(row.try_get("score")?)?,
    })
}

#[async_trait::async_trait]
impl RawLog for PgStore {
    async fn append(&self, record: &RawRecord) -> Result<Uuid, StoreError> {
        sqlx::query(
            r#"
            insert into raw_reports (
              record_id, machine_id, day, received_at, report_ts, payload,
              source_address, integrity_digest
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8
            )
            "#,
        )
        .bind(record.record_id)
        .bind(&record.machine_id)
        .bind(record.day)
        .bind(record.received_at)
        .bind(record.report_ts)
        .bind(&record.payload)
        .bind(&record.source_address)
        .bind(&record.integrity_digest)
        .execute(&self.pool)
        .await?;
        Ok(record.record_id)
    }

    async fn records_for(
        &self,
        machine_id: &str,
        day: NaiveDate,
    ) -> Result<Vec<RawRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            select record_id, seq, machine_id, day, received_at, report_ts, payload,
                   source_address, integrity_digest
            from raw_reports
            where machine_id = $1 and day = $2
            order by seq asc
            "#,
        )
        .bind(machine_id)
        .bind(day)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(raw_from_row).collect()
    }
}

#[async_trait::async_trait]
impl RawRetention for PgStore {
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let res = sqlx::query("delete from raw_reports where received_at < $1")
            .bind(retention::retention_cutoff(now))
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }
}

#[async_trait::async_trait]
impl DailyRollup for PgStore {
    async fn merge(&self, update: &RollupUpdate) -> Result<MergeOutcome, StoreError> {
        // timestamptz holds microseconds.
        let last_seen = update.last_seen.trunc_subsecs(6);
        let row = sqlx::query(
            r#"
            insert into daily_summaries (
              machine_id, day, last_seen, hostname, platform, arch,
              latest_checks, score, report_count
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8, 1
            )
            on conflict (machine_id, day) do update set
              report_count = daily_summaries.report_count + 1,
              hostname = case when excluded.last_seen >= daily_summaries.last_seen
                         then coalesce(excluded.hostname, daily_summaries.hostname)
                         else daily_summaries.hostname end,
              platform = case when excluded.last_seen >= daily_summaries.last_seen
                         then coalesce(excluded.platform, daily_summaries.platform)
                         else daily_summaries.platform end,
              arch = case when excluded.last_seen >= daily_summaries.last_seen
                     then coalesce(excluded.arch, daily_summaries.arch)
                     else daily_summaries.arch end,
              latest_checks = case when excluded.last_seen >= daily_summaries.last_seen
                              then excluded.latest_checks
                              else daily_summaries.latest_checks end,
              score = case when excluded.last_seen >= daily_summaries.last_seen
                      then excluded.score
                      else daily_summaries.score end,
              last_seen = greatest(excluded.last_seen, daily_summaries.last_seen)
            returning report_count, score, last_seen
            "#,
        )
        .bind(&update.machine_id)
        .bind(update.day)
        .bind(last_seen)
        .bind(&update.hostname)
        .bind(&update.platform)
        .bind(&update.arch)
        .bind(Json(&update.checks))
        .bind(i16::from(update.score))
        .fetch_one(&self.pool)
        .await?;

        let stored_last_seen: DateTime<Utc> = row.try_get("last_seen")?;
        Ok(MergeOutcome {
            report_count: row.try_get("report_count")?,
            score: score_from_db(row.try_get("score")?)?,
            last_seen: stored_last_seen,
            // Ties go to the incoming report, so equal means it won.
            became_latest: stored_last_seen == last_seen,
        })
    }

    async fn summary(
        &self,
        machine_id: &str,
        day: NaiveDate,
    ) -> Result<Option<DailySummary>, StoreError> {
        let row = sqlx::query(
            r#"
            select machine_id, day, last_seen, hostname, platform, arch,
                   latest_checks, score, report_count
            from daily_summaries
            where machine_id = $1 and day = $2
            "#,
        )
        .bind(machine_id)
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(summary_from_row).transpose()
    }

    async fn summaries_for(&self, machine_id: &str) -> Result<Vec<DailySummary>, StoreError> {
        let rows = sqlx::query(
            r#"
            select machine_id, day, last_seen, hostname, platform, arch,
                   latest_checks, score, report_count
            from daily_summaries
            where machine_id = $1
            order by day desc
            "#,
        )
        .bind(machine_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(summary_from_row).collect()
    }

    async fn replace(&self, row: &DailySummary) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            insert into daily_summaries (
              machine_id, day, last_seen, hostname, platform, arch,
              latest_checks, score, report_count
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8, $9
            )
            on conflict (machine_id, day) do update set
              last_seen = excluded.last_seen,
              hostname = excluded.hostname,
              platform = excluded.platform,
              arch = excluded.arch,
              latest_checks = excluded.latest_checks,
              score = excluded.score,
              report_count = excluded.report_count
            "#,
        )
        .bind(&row.machine_id)
        .bind(row.day)
        .bind(row.last_seen)
        .bind(&row.hostname)
        .bind(&row.platform)
        .bind(&row.arch)
        .bind(Json(&row.latest_checks))
        .bind(i16::from(row.score))
        .bind(row.report_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl MachineStates for PgStore {
    async fn sync_machine(&self, update: &RollupUpdate) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"
            insert into machine_states (
              machine_id, hostname, platform, arch, last_seen, last_day, checks, score
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8
            )
            on conflict (machine_id) do update set
              hostname = coalesce(excluded.hostname, machine_states.hostname),
              platform = coalesce(excluded.platform, machine_states.platform),
              arch = coalesce(excluded.arch, machine_states.arch),
              last_seen = excluded.last_seen,
              last_day = excluded.last_day,
              checks = excluded.checks,
              score = excluded.score
            where excluded.last_seen >= machine_states.last_seen
            "#,
        )
        .bind(&update.machine_id)
        .bind(&update.hostname)
        .bind(&update.platform)
        .bind(&update.arch)
        .bind(update.last_seen.trunc_subsecs(6))
        .bind(update.day)
        .bind(Json(&update.checks))
        .bind(i16::from(update.score))
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn machine(&self, machine_id: &str) -> Result<Option<MachineState>, StoreError> {
        let row = sqlx::query(
            r#"
            select machine_id, hostname, platform, arch, last_seen, last_day, checks, score
            from machine_states
            where machine_id = $1
            "#,
        )
        .bind(machine_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(machine_from_row).transpose()
    }

    async fn machines(&self, filter: &MachineFilter) -> Result<Vec<MachineState>, StoreError> {
        // Platform family matching happens in Rust; stored strings stay raw.
        let rows = sqlx::query(
            r#"
            select machine_id, hostname, platform, arch, last_seen, last_day, checks, score
            from machine_states
            where ($1 = false or score < 100)
            order by last_seen desc, machine_id asc
            "#,
        )
        .bind(filter.issues_only)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let m = machine_from_row(row)?;
            if filter.matches(&m) {
                out.push(m);
            }
        }
        Ok(out)
    }
}
