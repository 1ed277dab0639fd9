//! Unified error handling for trustguard.
//!
//! Layer errors (`DbError`, `CascadeError`, `VerifyError`, `AuthFailure`)
//! convert into [`ApiError`], which carries the HTTP status, a stable
//! `error_code` for logs and clients, and the JSON body shape. Every error
//! response carries the request id.

use crate::db::{BanTarget, DbError};
use crate::moderation::{CascadeError, VerifyError};
use crate::security::request_auth::AuthFailure;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{} banned", banned_label(.target))]
    Banned { target: BanTarget, reason: String },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("unauthorized")]
    Unauthorized(AuthFailure),

    /// Detail is logged, never returned.
    #[error("internal error: {0}")]
    Internal(String),
}

fn banned_label(target: &BanTarget) -> &'static str {
    match target {
        BanTarget::Ip => "IP",
        BanTarget::Device => "Device",
        BanTarget::User => "User",
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Banned { .. } => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a static error code string for clients and metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid_request",
            Self::Banned { .. } => "banned",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Unauthorized(failure) => failure.code(),
            Self::Internal(_) => "internal_error",
        }
    }

    /// Attach the request id the response will carry.
    pub fn with_request(self, request_id: Uuid) -> ApiFailure {
        ApiFailure {
            request_id,
            error: self,
        }
    }
}

/// An [`ApiError`] bound to its request id, ready to render.
#[derive(Debug)]
pub struct ApiFailure {
    pub request_id: Uuid,
    pub error: ApiError,
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = self.error.status();
        let request_id = self.request_id.to_string();
        let code = self.error.error_code();

        let body = match &self.error {
            ApiError::Unauthorized(_) => json!({
                "success": false,
                "error": "unauthorized",
                "code": code,
                "requestId": request_id,
            }),
            ApiError::Banned { reason, .. } => json!({
                "success": false,
                "error": self.error.to_string(),
                "reason": reason,
                "code": code,
                "requestId": request_id,
            }),
            ApiError::Internal(detail) => {
                tracing::error!(request_id = %request_id, error = %detail, "Request failed");
                json!({
                    "success": false,
                    "error": "Internal server error",
                    "code": code,
                    "requestId": request_id,
                })
            }
            other => json!({
                "success": false,
                "error": other.to_string(),
                "code": code,
                "requestId": request_id,
            }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<AuthFailure> for ApiError {
    fn from(failure: AuthFailure) -> Self {
        Self::Unauthorized(failure)
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<CascadeError> for ApiError {
    fn from(err: CascadeError) -> Self {
        match err {
            CascadeError::InvalidRequest(msg) => Self::Validation(msg),
            CascadeError::UserNotFound(_) => Self::NotFound("User not found".to_string()),
            CascadeError::AlreadyBanned(_) => Self::Conflict("User already banned".to_string()),
            CascadeError::Timeout(step) => Self::Internal(format!("cascade step timed out: {}", step)),
            CascadeError::Db(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<VerifyError> for ApiError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::InvalidRequest(msg) => Self::Validation(msg),
            VerifyError::Banned { target, reason } => Self::Banned { target, reason },
            VerifyError::UserNotFound(_) => Self::NotFound("User not found".to_string()),
            VerifyError::Timeout(step) => {
                Self::Internal(format!("verification step timed out: {}", step))
            }
            VerifyError::Db(e) => Self::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn render(error: ApiError) -> (StatusCode, serde_json::Value) {
        let id = Uuid::new_v4();
        let response = error.with_request(id).into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["requestId"], id.to_string());
        (status, body)
    }

    #[tokio::test]
    async fn test_unauthorized_shape_is_uniform() {
        let (status, body) = render(AuthFailure::StaleTimestamp.into()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "unauthorized");
        assert_eq!(body["code"], "stale_timestamp");
    }

    #[tokio::test]
    async fn test_internal_detail_is_not_leaked() {
        let (status, body) = render(ApiError::Internal("disk on fire".to_string())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.to_string().contains("disk on fire"));
    }

    #[tokio::test]
    async fn test_cascade_errors_map_to_statuses() {
        let (status, body) = render(CascadeError::AlreadyBanned("1".to_string()).into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "User already banned");

        let (status, _) = render(CascadeError::UserNotFound("1".to_string()).into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = render(CascadeError::Timeout("find alts").into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_banned_carries_reason() {
        let (status, body) = render(ApiError::Banned {
            target: BanTarget::Device,
            reason: "Cascade from user 1: spam".to_string(),
        })
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Device banned");
        assert_eq!(body["reason"], "Cascade from user 1: spam");
    }
}
