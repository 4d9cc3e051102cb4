//! hm-db
//!
//! Storage for the ingest pipeline: the append-only raw log, the per-day
//! rollup, and the per-machine latest-state projection.
//!
//! Every store is reached through a trait so the ingest core never names a
//! backend. [`PgStore`] is the production backend; [`MemStore`] implements
//! the same contracts for development and tests.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use hm_schemas::{DailySummary, MachineState, MergeOutcome, RawRecord, RollupUpdate};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

mod mem;
mod pg;
pub mod retention;

pub use mem::MemStore;
pub use pg::PgStore;
pub use retention::{is_expired, retention_cutoff, spawn_retention_sweeper, RETENTION_DAYS};

pub const ENV_DB_URL: &str = "HM_DATABASE_URL";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("stored row could not be decoded: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Corrupt(e.to_string())
            }
            // 22P05: text the jsonb type cannot hold. Retrying will not help.
            sqlx::Error::Database(ref db) if db.code().as_deref() == Some("22P05") => {
                StoreError::Corrupt(e.to_string())
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Store contracts
// ---------------------------------------------------------------------------

/// Append-only log of accepted reports. There is no update or delete path
/// here; expiry lives on [`RawRetention`], which only the sweeper holds.
#[async_trait::async_trait]
pub trait RawLog: Send + Sync {
    /// Returns once the record is durable. The store assigns `seq`.
    async fn append(&self, record: &RawRecord) -> Result<Uuid, StoreError>;

    /// Arrival order (`seq` ascending).
    async fn records_for(
        &self,
        machine_id: &str,
        day: NaiveDate,
    ) -> Result<Vec<RawRecord>, StoreError>;
}

/// Store-owned expiry of the raw log.
#[async_trait::async_trait]
pub trait RawRetention: Send + Sync {
    /// Drop records past the retention window. Returns how many went.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// One row per `(machine_id, day)`.
#[async_trait::async_trait]
pub trait DailyRollup: Send + Sync {
    /// Atomic upsert. Concurrent merges on one key never lose an increment.
    async fn merge(&self, update: &RollupUpdate) -> Result<MergeOutcome, StoreError>;

    async fn summary(
        &self,
        machine_id: &str,
        day: NaiveDate,
    ) -> Result<Option<DailySummary>, StoreError>;

    /// Newest day first.
    async fn summaries_for(&self, machine_id: &str) -> Result<Vec<DailySummary>, StoreError>;

    /// Overwrite a row wholesale. Reconciliation only.
    async fn replace(&self, row: &DailySummary) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineFilter {
    /// Platform family (`windows`, `macos`, `linux`, ...). `win32` is accepted.
    pub os: Option<String>,
    /// Only machines whose latest score is below 100.
    pub issues_only: bool,
}

impl MachineFilter {
    pub fn matches(&self, m: &MachineState) -> bool {
        if self.issues_only && !m.has_issues() {
            return false;
        }
        match self.os.as_deref() {
            Some(os) if !os.trim().is_empty() => {
                hm_schemas::platform_matches(m.platform.as_deref(), os)
            }
            _ => true,
        }
    }
}

#[async_trait::async_trait]
pub trait MachineStates: Send + Sync {
    /// Apply `update` if it is at least as new as the stored state. Returns
    /// whether it was applied.
    async fn sync_machine(&self, update: &RollupUpdate) -> Result<bool, StoreError>;

    async fn machine(&self, machine_id: &str) -> Result<Option<MachineState>, StoreError>;

    /// Newest `last_seen` first.
    async fn machines(&self, filter: &MachineFilter) -> Result<Vec<MachineState>, StoreError>;
}

/// The three stores one ingest path writes to.
#[derive(Clone)]
pub struct Stores {
    pub raw: Arc<dyn RawLog>,
    pub rollup: Arc<dyn DailyRollup>,
    pub machines: Arc<dyn MachineStates>,
    pub backend: &'static str,
}

impl Stores {
    /// All three contracts served by one backend. Retention stays with the
    /// caller's handle on `store`.
    pub fn from_store<S>(store: Arc<S>, backend: &'static str) -> Self
    where
        S: RawLog + DailyRollup + MachineStates + 'static,
    {
        Self {
            raw: store.clone(),
            rollup: store.clone(),
            machines: store,
            backend,
        }
    }

    pub fn memory() -> Self {
        Self::from_store(Arc::new(MemStore::default()), "memory")
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self::from_store(Arc::new(PgStore::new(pool)), "postgres")
    }
}

// ---------------------------------------------------------------------------
// Postgres bootstrap
// ---------------------------------------------------------------------------

pub async fn connect(
    url: &str,
    max_connections: u32,
    acquire_timeout: std::time::Duration,
) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Connect using HM_DATABASE_URL with CLI-friendly defaults.
pub async fn connect_from_env() -> Result<PgPool> {
    let url =
        std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url, 5, std::time::Duration::from_secs(5)).await
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_raw_reports: bool,
    pub has_daily_summaries: bool,
}

/// Connectivity plus schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_raw_reports: table_exists(pool, "raw_reports").await?,
        has_daily_summaries: table_exists(pool, "daily_summaries").await?,
    })
}

async fn table_exists(pool: &PgPool, name: &str) -> Result<bool> {
    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'public' and table_name = $1
        )
        "#,
    )
    .bind(name)
    .fetch_one(pool)
    .await
    .with_context(|| format!("status table-exists query failed: {name}"))?;
    Ok(exists)
}
