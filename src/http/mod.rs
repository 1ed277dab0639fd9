//! HTTP API.
//!
//! Signed service routes:
//! - `POST /api/v1/moderation/bans` - ban a user and cascade
//! - `GET  /api/v1/moderation/bans` - list bans
//! - `POST /api/v1/verify` - record a user's fingerprints
//!
//! Open routes: `GET /health`, `GET /metrics`.

mod moderation;
mod verify;

use crate::config::Config;
use crate::db::{Database, DbError};
use crate::error::{ApiError, ApiFailure};
use crate::moderation::{CascadeEngine, RoleGranter, VerificationService};
use crate::security::fingerprint::{FingerprintHasher, HasherError};
use crate::security::rate_limit::{FallbackStore, MemoryStore, RateLimiter, RedisStore};
use crate::security::request_auth::{
    Authenticated, RequestAuthenticator, RequestEvidence, caller_ip,
};
use axum::extract::{ConnectInfo, DefaultBodyLimit};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};
use uuid::Uuid;

/// Largest request body accepted on any route.
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Hasher(#[from] HasherError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// Shared state for every handler.
pub struct AppState {
    pub db: Database,
    pub authenticator: RequestAuthenticator,
    pub cascade: CascadeEngine,
    pub verifier: VerificationService,
    pub trust_forwarded_for: bool,
}

impl AppState {
    /// Open the database and build every service from validated config.
    pub async fn build(config: &Config, roles: Arc<dyn RoleGranter>) -> Result<Self, StartupError> {
        let hasher = Arc::new(FingerprintHasher::from_config(config.security.salt.as_deref())?);
        let db = Database::new(&config.database.path).await?;
        let limiter = build_limiter(config).await;
        let step_timeout = config.database.store_timeout();

        Ok(Self {
            authenticator: RequestAuthenticator::from_config(
                &config.security,
                &config.rate_limit,
                limiter,
            ),
            cascade: CascadeEngine::new(db.clone(), step_timeout),
            verifier: VerificationService::new(db.clone(), hasher, roles, step_timeout),
            trust_forwarded_for: config.server.trust_forwarded_for,
            db,
        })
    }

    /// Run the authenticator over one request.
    pub(crate) async fn authenticate(
        &self,
        headers: &HeaderMap,
        peer: Option<ConnectInfo<SocketAddr>>,
        body: Bytes,
    ) -> Result<Authenticated, ApiFailure> {
        let ip = caller_ip(
            headers,
            peer.map(|ConnectInfo(addr)| addr.ip()),
            self.trust_forwarded_for,
        );
        let evidence = RequestEvidence::from_headers(headers, ip, body);
        self.authenticator
            .authenticate(&evidence)
            .await
            .map_err(|failure| ApiError::from(failure).with_request(Uuid::new_v4()))
    }
}

/// Shared Redis counters when configured and reachable, process memory
/// otherwise.
async fn build_limiter(config: &Config) -> RateLimiter {
    let capacity = config.rate_limit.memory_capacity;
    let Some(url) = config.rate_limit.redis_url.as_deref() else {
        info!(capacity, "Rate limiting in process memory");
        return RateLimiter::in_memory(capacity);
    };
    match RedisStore::connect(url).await {
        Ok(redis) => {
            info!("Rate limiting through Redis with in-memory fallback");
            RateLimiter::new(Arc::new(FallbackStore::new(redis, MemoryStore::new(capacity))))
        }
        Err(e) => {
            warn!(error = %e, "Redis unavailable at startup, rate limiting in memory");
            RateLimiter::in_memory(capacity)
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/v1/moderation/bans",
            post(moderation::create_ban).get(moderation::list_bans),
        )
        .route("/api/v1/verify", post(verify::verify))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn metrics() -> String {
    crate::metrics::gather_metrics()
}

/// Serve the API on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: F,
) -> Result<(), StartupError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP API listening");
    }
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(StartupError::Serve)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn bind_and_serve<F>(
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: F,
) -> Result<(), StartupError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;
    serve(listener, state, shutdown).await
}
