//! Axum router and all HTTP handlers for hm-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! the tracing and CORS layers. The API-key gate is part of the router itself
//! so tests exercise it too.

use std::{convert::Infallible, future::Future, net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use hm_db::{MachineFilter, StoreError};
use hm_ingest::{IngestContext, IngestError};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, warn};

use crate::{
    api_types::{ErrorResponse, HealthResponse, MachinesQuery, ReportResponse},
    auth,
    state::{AppState, BusMsg},
};

/// Largest accepted `/api/report` body.
pub const REPORT_BODY_LIMIT: usize = 1 << 20;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    let gated = Router::new()
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .route(
            "/api/report",
            post(report).layer(DefaultBodyLimit::max(REPORT_BODY_LIMIT)),
        )
        .route("/api/machines", get(machines))
        .route("/api/machines/:id", get(machine))
        .route("/api/machines/:id/daily", get(machine_daily))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_api_key,
        ));

    Router::new()
        .route("/v1/health", get(health))
        .merge(gated)
        .with_state(state)
}

fn error_response(code: StatusCode, body: ErrorResponse) -> Response {
    (code, Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let snap = st.snapshot().await;
    let _ = st.bus.send(BusMsg::Status(snap.clone()));
    (StatusCode::OK, Json(snap))
}

// ---------------------------------------------------------------------------
// POST /api/report
// ---------------------------------------------------------------------------

/// Ingest one report or a batch.
///
/// 400 for anything the validator refuses, 500 for config or storage
/// failures. A storage failure carries the stage and how many reports of the
/// batch were already fully processed.
pub(crate) async fn report(
    State(st): State<Arc<AppState>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "report body is not JSON");
            return error_response(
                StatusCode::BAD_REQUEST,
                ErrorResponse::plain(format!("bad payload: {e}")),
            );
        }
    };

    let ctx = IngestContext::now(source_address(
        &headers,
        connect.map(|c| c.0),
        st.trust_forwarded_for,
    ));
    match st.ingest.ingest(value, &ctx).await {
        Ok(ack) => {
            if !ack.results.is_empty() {
                *st.last_ingest_at.write().await = Some(ctx.received_at);
            }
            for item in &ack.results {
                let _ = st.bus.send(BusMsg::Ingested {
                    machine_id: item.machine_id.clone(),
                    day: item.day,
                    score: item.rollup_score,
                    report_count: item.report_count,
                });
            }
            (
                StatusCode::OK,
                Json(ReportResponse {
                    ok: true,
                    count: ack.count,
                    results: ack.results,
                    rejected: ack.rejected,
                }),
            )
                .into_response()
        }
        Err(e) => ingest_error_response(&st, e),
    }
}

fn ingest_error_response(st: &AppState, e: IngestError) -> Response {
    let accepted = match &e {
        IngestError::InvalidPayload { .. } => {
            return error_response(StatusCode::BAD_REQUEST, ErrorResponse::plain(e.to_string()));
        }
        IngestError::Config(_) => None,
        IngestError::StorageUnavailable { accepted, .. } => {
            let _ = st.bus.send(BusMsg::LogLine {
                level: "ERROR".to_string(),
                msg: e.to_string(),
            });
            Some(*accepted)
        }
    };
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorResponse {
            error: e.to_string(),
            stage: Some(e.stage().to_string()),
            accepted,
        },
    )
}

/// The socket peer. With `trust_forwarded` set, the first `X-Forwarded-For`
/// hop wins when present; otherwise the header is ignored, since any client
/// can send it.
fn source_address(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded: bool,
) -> Option<String> {
    let forwarded = trust_forwarded
        .then(|| headers.get("x-forwarded-for"))
        .flatten()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    forwarded.or_else(|| peer.map(|p| p.ip().to_string()))
}

// ---- read side ----

/// Store reads share the ingest timeout.
async fn read_bounded<T>(
    st: &AppState,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, Response> {
    let timeout = st.ingest.options().store_timeout;
    let reason = match tokio::time::timeout(timeout, call).await {
        Ok(Ok(v)) => return Ok(v),
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!("timed out after {}ms", timeout.as_millis()),
    };
    error!(%reason, "store read failed");
    Err(error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorResponse::plain(format!("storage unavailable: {reason}")),
    ))
}

fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, ErrorResponse::plain("not found"))
}

// ---------------------------------------------------------------------------
// GET /api/machines
// ---------------------------------------------------------------------------

pub(crate) async fn machines(
    State(st): State<Arc<AppState>>,
    Query(q): Query<MachinesQuery>,
) -> Response {
    let filter = MachineFilter {
        issues_only: q.issues_only(),
        os: q.os,
    };
    match read_bounded(&st, st.ingest.stores().machines.machines(&filter)).await {
        Ok(list) => (StatusCode::OK, Json(list)).into_response(),
        Err(resp) => resp,
    }
}

// ---------------------------------------------------------------------------
// GET /api/machines/:id
// ---------------------------------------------------------------------------

pub(crate) async fn machine(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match read_bounded(&st, st.ingest.stores().machines.machine(&id)).await {
        Ok(Some(m)) => (StatusCode::OK, Json(m)).into_response(),
        Ok(None) => not_found(),
        Err(resp) => resp,
    }
}

// ---------------------------------------------------------------------------
// GET /api/machines/:id/daily
// ---------------------------------------------------------------------------

/// Daily summaries of one machine, newest day first.
pub(crate) async fn machine_daily(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match read_bounded(&st, st.ingest.stores().rollup.summaries_for(&id)).await {
        Ok(rows) if rows.is_empty() => not_found(),
        Ok(rows) => (StatusCode::OK, Json(rows)).into_response(),
        Err(resp) => resp,
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Status(_) => "status",
                    BusMsg::Ingested { .. } => "ingested",
                    BusMsg::LogLine { .. } => "log",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
