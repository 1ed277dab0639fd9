//! Moderation routes: ban with cascade, and ban listing.

use super::AppState;
use crate::db::{Ban, BanStatus};
use crate::error::{ApiError, ApiFailure};
use crate::moderation::{BanRequest, CascadeOutcome};
use crate::telemetry::spans;
use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

const DEFAULT_LIST_LIMIT: u32 = 100;
const MAX_LIST_LIMIT: u32 = 500;

#[derive(Debug, Deserialize)]
struct BanBody {
    #[serde(rename = "UserID", default)]
    user_id: Option<String>,
    #[serde(rename = "Reason", default)]
    reason: Option<String>,
    #[serde(rename = "BannedBy", default)]
    banned_by: Option<String>,
    #[serde(rename = "ExpiresAt", default)]
    expires_at: Option<DateTime<Utc>>,
    #[serde(rename = "Cascade", default = "default_cascade")]
    cascade: bool,
}

fn default_cascade() -> bool {
    true
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BanDetailsBody {
    main_ban_id: i64,
    alts_banned: usize,
    ip_banned: bool,
    device_banned: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct BanResponse {
    success: bool,
    request_id: Uuid,
    message: String,
    bans_created: usize,
    alt_count: usize,
    details: BanDetailsBody,
}

impl BanResponse {
    fn new(request_id: Uuid, user: &str, outcome: &CascadeOutcome) -> Self {
        Self {
            success: true,
            request_id,
            message: format!("User {} banned successfully", user),
            bans_created: outcome.bans_created(),
            alt_count: outcome.alt_count,
            details: BanDetailsBody {
                main_ban_id: outcome.main_ban_id,
                alts_banned: outcome.alt_count,
                ip_banned: outcome.ip_banned,
                device_banned: outcome.device_banned,
            },
        }
    }
}

/// `POST /api/v1/moderation/bans`
pub(super) async fn create_ban(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<BanResponse>, ApiFailure> {
    let auth = state.authenticate(&headers, peer, body.clone()).await?;
    let request_id = auth.request_id;

    let parsed: BanBody = serde_json::from_slice(&body).map_err(|e| {
        ApiError::Validation(format!("Invalid request body: {}", e)).with_request(request_id)
    })?;
    let user = parsed
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::Validation("UserID required".to_string()).with_request(request_id))?
        .to_string();

    let request = BanRequest {
        target: user.clone(),
        reason: parsed.reason,
        banned_by: parsed.banned_by,
        expires_at: parsed.expires_at.map(|at| at.timestamp()),
        cascade: parsed.cascade,
    };

    let outcome = state
        .cascade
        .ban(&request)
        .instrument(spans::moderation(request_id, &user))
        .await
        .map_err(|e| ApiError::from(e).with_request(request_id))?;

    Ok(Json(BanResponse::new(request_id, &user, &outcome)))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ListParams {
    status: Option<String>,
    limit: Option<String>,
}

impl ListParams {
    fn status(&self) -> Result<BanStatus, ApiError> {
        match self.status.as_deref().map(str::trim) {
            None | Some("") | Some("all") => Ok(BanStatus::All),
            Some("active") => Ok(BanStatus::Active),
            Some("expired") => Ok(BanStatus::Expired),
            Some(other) => Err(ApiError::Validation(format!(
                "Invalid status '{}': expected active, expired or all",
                other
            ))),
        }
    }

    fn limit(&self) -> Result<u32, ApiError> {
        let Some(raw) = self.limit.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(DEFAULT_LIST_LIMIT);
        };
        match raw.parse::<u32>() {
            Ok(0) | Err(_) => Err(ApiError::Validation(format!(
                "Invalid limit '{}': expected a positive integer",
                raw
            ))),
            Ok(n) => Ok(n.min(MAX_LIST_LIMIT)),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ListResponse {
    success: bool,
    request_id: Uuid,
    count: usize,
    bans: Vec<Ban>,
}

/// `GET /api/v1/moderation/bans?status=&limit=`
pub(super) async fn list_bans(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    params: Result<Query<ListParams>, QueryRejection>,
    body: Bytes,
) -> Result<Json<ListResponse>, ApiFailure> {
    let auth = state.authenticate(&headers, peer, body).await?;
    let request_id = auth.request_id;
    let fail = |e: ApiError| e.with_request(request_id);

    let Query(params) = params.map_err(|e| fail(ApiError::Validation(e.body_text())))?;
    let status = params.status().map_err(fail)?;
    let limit = params.limit().map_err(fail)?;

    let bans = state
        .db
        .bans()
        .list(status, limit)
        .await
        .map_err(|e| fail(e.into()))?;

    Ok(Json(ListResponse {
        success: true,
        request_id,
        count: bans.len(),
        bans,
    }))
}
