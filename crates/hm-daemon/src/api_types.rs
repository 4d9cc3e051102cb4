//! Request and response types for the hm-daemon HTTP endpoints.
//!
//! `Serialize + Deserialize` so Axum can encode them and tests can decode
//! them. No business logic lives here.

use serde::{Deserialize, Serialize};

use hm_ingest::{AckItem, Rejection};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of every non-2xx answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Reports of the batch fully processed before a storage failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<usize>,
}

impl ErrorResponse {
    pub fn plain(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            stage: None,
            accepted: None,
        }
    }
}

// ---------------------------------------------------------------------------
// POST /api/report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ReportResponse {
    pub ok: bool,
    pub count: usize,
    pub results: Vec<AckItem>,
    pub rejected: Vec<Rejection>,
}

// ---------------------------------------------------------------------------
// GET /api/machines
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MachinesQuery {
    pub os: Option<String>,
    /// `issues=true` keeps only machines with a score below 100.
    pub issues: Option<String>,
}

impl MachinesQuery {
    pub fn issues_only(&self) -> bool {
        matches!(self.issues.as_deref(), Some("true") | Some("1"))
    }
}
