//! Shared runtime state for hm-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The ingest coordinator
//! carries the stores and the tamper key; this module only adds the event bus
//! and the request-gate key.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use hm_ingest::{IngestCoordinator, IngestStatsSnapshot};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};

use crate::auth::ApiKey;

// ---------------------------------------------------------------------------
// BusMsg — SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat {
        ts_millis: i64,
    },
    Status(StatusSnapshot),
    Ingested {
        machine_id: String,
        day: NaiveDate,
        score: u8,
        report_count: i64,
    },
    LogLine {
        level: String,
        msg: String,
    },
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// StatusSnapshot
// ---------------------------------------------------------------------------

/// Returned by GET /v1/status and carried inside SSE `status` events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub daemon_uptime_secs: u64,
    pub storage_backend: String,
    /// Hash of the effective layered config, when the daemon booted from one.
    pub config_hash: Option<String>,
    pub batch_policy: String,
    pub max_batch: usize,
    pub ingest: IngestStatsSnapshot,
    pub last_ingest_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub ingest: Arc<IngestCoordinator>,
    /// `None` means no key is configured and every gated route answers 401.
    pub api_key: Option<ApiKey>,
    pub config_hash: Option<String>,
    /// Whether `X-Forwarded-For` may name the report source.
    pub trust_forwarded_for: bool,
    pub last_ingest_at: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl AppState {
    pub fn new(
        ingest: Arc<IngestCoordinator>,
        api_key: Option<ApiKey>,
        config_hash: Option<String>,
    ) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self {
            bus,
            build: BuildInfo {
                service: "hm-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            ingest,
            api_key,
            config_hash,
            trust_forwarded_for: false,
            last_ingest_at: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        let opts = self.ingest.options();
        StatusSnapshot {
            daemon_uptime_secs: uptime_secs(),
            storage_backend: self.ingest.stores().backend.to_string(),
            config_hash: self.config_hash.clone(),
            batch_policy: policy_name(opts.policy).to_string(),
            max_batch: opts.max_batch,
            ingest: self.ingest.stats().snapshot(),
            last_ingest_at: *self.last_ingest_at.read().await,
        }
    }
}

fn policy_name(p: hm_config::BatchPolicy) -> &'static str {
    match p {
        hm_config::BatchPolicy::Atomic => "atomic",
        hm_config::BatchPolicy::PerItem => "per_item",
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Seconds since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Emit a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}
