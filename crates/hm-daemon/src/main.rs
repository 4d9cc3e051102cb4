//! hm-daemon entry point.
//!
//! Thin on purpose: load config and secrets, pick the store backend, wire
//! middleware, start the background tasks and the HTTP server. Handlers live
//! in `routes.rs`; shared state in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{bail, Context};
use axum::http::{HeaderValue, Method};
use hm_audit::TamperKey;
use hm_config::{StorageBackend, UnusedKeyPolicy};
use hm_daemon::{auth::ApiKey, routes, state};
use hm_db::{MemStore, PgStore, RawRetention, Stores};
use hm_ingest::{IngestCoordinator, IngestOptions};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

const DEFAULT_CONFIG: &str = "config/base.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let paths = config_paths();
    let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let loaded = hm_config::load_layered_yaml(&path_refs)?;
    hm_config::report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    let settings = loaded.settings()?;
    info!(config_hash = %loaded.config_hash, files = ?paths, "config loaded");

    // Fail closed: no key or no shared secret, no daemon.
    let secrets = hm_config::resolve_secrets(&settings)?;
    let api_key = ApiKey::new(&secrets.api_key).context("api key is blank")?;
    let tamper_key = TamperKey::new(&secrets.shared_secret).context("shared secret rejected")?;

    let (stores, retention) = match settings.storage.backend {
        StorageBackend::Postgres => {
            let Some(url) = secrets.database_url.as_deref() else {
                bail!(
                    "SECRETS_MISSING: {} is required for the postgres backend",
                    settings.storage.database_url_env
                );
            };
            let pool = hm_db::connect(
                url,
                settings.storage.max_connections,
                settings.storage_timeout(),
            )
            .await?;
            hm_db::migrate(&pool).await?;
            let pg = Arc::new(PgStore::new(pool));
            (Stores::from_store(Arc::clone(&pg), "postgres"), pg as Arc<dyn RawRetention>)
        }
        StorageBackend::Memory => {
            tracing::warn!("memory backend selected; reports do not survive a restart");
            let mem = Arc::new(MemStore::default());
            (Stores::from_store(Arc::clone(&mem), "memory"), mem as Arc<dyn RawRetention>)
        }
    };
    info!(backend = stores.backend, "stores ready");

    // Only the sweeper holds the delete path.
    let _sweeper = hm_db::spawn_retention_sweeper(
        retention,
        Duration::from_secs(settings.retention.sweep_interval_secs),
    );

    let coordinator = IngestCoordinator::new(
        stores,
        Some(tamper_key),
        IngestOptions::from(&settings),
    );
    let shared = Arc::new(
        state::AppState::new(
            Arc::new(coordinator),
            Some(api_key),
            Some(loaded.config_hash.clone()),
        )
        .with_forwarded_for(settings.server.trust_forwarded_for),
    );
    if settings.server.trust_forwarded_for {
        info!("source addresses taken from X-Forwarded-For");
    }

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = match bind_addr_from_env() {
        Some(a) => a,
        None => settings
            .server
            .bind_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid server.bind_addr: {}", settings.server.bind_addr))?,
    };
    info!("hm-daemon listening on http://{}", addr);

    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// `HM_CONFIG` is a comma-separated list of YAML files, later ones override.
fn config_paths() -> Vec<String> {
    match std::env::var("HM_CONFIG") {
        Ok(v) if !v.trim().is_empty() => v
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
        _ => vec![DEFAULT_CONFIG.to_string()],
    }
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("HM_DAEMON_ADDR").ok()?.parse().ok()
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
