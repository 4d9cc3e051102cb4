use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use hm_config::BatchPolicy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline stage a call was in when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    Stamp,
    LogAppend,
    RollupMerge,
    MachineSync,
    Acknowledge,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Stamp => "stamp",
            Stage::LogAppend => "log_append",
            Stage::RollupMerge => "rollup_merge",
            Stage::MachineSync => "machine_sync",
            Stage::Acknowledge => "acknowledge",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    /// Refused before any side effect. Not retryable.
    #[error("{reason}")]
    InvalidPayload {
        index: Option<usize>,
        reason: String,
    },
    /// Operator error. Refused before any side effect.
    #[error("config error: {0}")]
    Config(String),
    /// A store call failed or timed out. `accepted` reports of the batch were
    /// fully processed before this one.
    #[error("storage unavailable at {stage} (machine_id={machine_id}, day={day}): {reason}")]
    StorageUnavailable {
        stage: Stage,
        machine_id: String,
        day: NaiveDate,
        accepted: usize,
        reason: String,
    },
}

impl IngestError {
    pub fn stage(&self) -> Stage {
        match self {
            IngestError::InvalidPayload { .. } => Stage::Validate,
            IngestError::Config(_) => Stage::Stamp,
            IngestError::StorageUnavailable { stage, .. } => *stage,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub policy: BatchPolicy,
    pub max_batch: usize,
    /// Upper bound on every single store call.
    pub store_timeout: Duration,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            policy: BatchPolicy::Atomic,
            max_batch: 1_000,
            store_timeout: Duration::from_millis(5_000),
        }
    }
}

impl From<&hm_config::Settings> for IngestOptions {
    fn from(s: &hm_config::Settings) -> Self {
        Self {
            policy: s.ingest.batch_policy,
            max_batch: s.ingest.max_batch,
            store_timeout: s.storage_timeout(),
        }
    }
}

/// Per-request facts the transport knows and the payload does not.
#[derive(Debug, Clone)]
pub struct IngestContext {
    pub received_at: DateTime<Utc>,
    pub source_address: Option<String>,
}

impl IngestContext {
    pub fn now(source_address: Option<String>) -> Self {
        Self {
            received_at: Utc::now(),
            source_address,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AckItem {
    pub machine_id: String,
    pub day: NaiveDate,
    pub record_id: Uuid,
    /// Score of this report's own checks.
    pub score: u8,
    /// Score now held by the day's rollup.
    pub rollup_score: u8,
    pub report_count: i64,
    pub became_latest: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub index: usize,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestAck {
    pub count: usize,
    pub results: Vec<AckItem>,
    pub rejected: Vec<Rejection>,
}

/// Process-lifetime counters.
#[derive(Debug, Default)]
pub struct IngestStats {
    batches: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    storage_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStatsSnapshot {
    pub batches: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub storage_failures: u64,
}

impl IngestStats {
    pub(crate) fn batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rejected(&self, n: u64) {
        self.rejected.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn storage_failure(&self) {
        self.storage_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
        }
    }
}
