//! Verification route.

use super::AppState;
use crate::db::TrustLevel;
use crate::error::{ApiError, ApiFailure};
use crate::moderation::VerifyRequest;
use crate::security::fingerprint::RawSignal;
use crate::telemetry::spans;
use axum::Json;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct VerifyBody {
    #[serde(rename = "UserID", default)]
    user_id: Option<String>,
    #[serde(rename = "DeviceData", default)]
    device_data: Option<RawSignal>,
    #[serde(rename = "IpAddress", default)]
    ip_address: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct VerifyResponse {
    success: bool,
    request_id: Uuid,
    already_verified: bool,
    trust_level: TrustLevel,
    role_granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    role_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<&'static str>,
    message: &'static str,
}

/// `POST /api/v1/verify`
pub(super) async fn verify(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<VerifyResponse>, ApiFailure> {
    let auth = state.authenticate(&headers, peer, body.clone()).await?;
    let request_id = auth.request_id;
    let invalid = |msg: &str| ApiError::Validation(msg.to_string()).with_request(request_id);

    let parsed: VerifyBody = serde_json::from_slice(&body).map_err(|e| {
        ApiError::Validation(format!("Invalid request body: {}", e)).with_request(request_id)
    })?;
    let external_id = parsed
        .user_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| invalid("UserID required"))?;
    let ip = parsed
        .ip_address
        .filter(|ip| !ip.trim().is_empty())
        .ok_or_else(|| invalid("IpAddress required"))?;
    let device = parsed
        .device_data
        .filter(|d| !d.is_empty())
        .ok_or_else(|| invalid("Missing device data"))?;

    let request = VerifyRequest {
        external_id,
        ip,
        device,
    };
    let outcome = state
        .verifier
        .verify(&request)
        .instrument(spans::verification(request_id, request.external_id.trim()))
        .await
        .map_err(|e| ApiError::from(e).with_request(request_id))?;

    let (warning, message) = if outcome.already_verified {
        (None, "User already verified")
    } else if outcome.shared_device {
        (
            Some("Device is shared with another account"),
            "User verified with restrictions",
        )
    } else {
        (None, "User verified successfully")
    };

    Ok(Json(VerifyResponse {
        success: true,
        request_id,
        already_verified: outcome.already_verified,
        trust_level: outcome.trust_level,
        role_granted: outcome.role_granted,
        role_error: outcome.role_error,
        warning,
        message,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_data_accepts_any_shape() {
        let body: VerifyBody = serde_json::from_str(
            r#"{"UserID":"7","IpAddress":"203.0.113.1","DeviceData":{"ua":"x","tz":"UTC"}}"#,
        )
        .unwrap();
        assert!(matches!(body.device_data, Some(RawSignal::Object(_))));

        let body: VerifyBody =
            serde_json::from_str(r#"{"UserID":"7","DeviceData":["ua","tz"]}"#).unwrap();
        assert!(matches!(body.device_data, Some(RawSignal::List(_))));
        assert!(body.ip_address.is_none());
    }
}
