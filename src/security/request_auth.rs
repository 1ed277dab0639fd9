//! Signed request authentication for service-to-service routes.
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. caller IP against the optional allowlist
//! 2. per-IP rate limit
//! 3. timestamp freshness
//! 4. bearer credential
//! 5. body hash, then HMAC signature
//!
//! Every failure is reported to the caller as the same 401 shape; only the
//! reason code differs. The detailed reason is logged here.

use super::rate_limit::RateLimiter;
use super::signing::{
    BEARER_PREFIX, HEADER_AUTHORIZATION, HEADER_BODY_HASH, HEADER_SIGNATURE, HEADER_TIMESTAMP,
    body_hash, keyed_mac,
};
use crate::config::{RateLimitConfig, SecurityConfig};
use bytes::Bytes;
use hmac::Mac;
use http::HeaderMap;
use ipnet::IpNet;
use std::net::IpAddr;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Placeholder caller address when neither a forwarded header nor a socket
/// peer is available.
pub const UNKNOWN_CALLER: &str = "unknown";

/// Why a signed request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("caller IP is not on the allowlist")]
    IpNotAllowed,
    #[error("too many requests from caller")]
    RateLimited,
    #[error("request timestamp missing or outside the allowed window")]
    StaleTimestamp,
    #[error("missing or unknown API key")]
    InvalidApiKey,
    #[error("body does not match X-Body-Hash")]
    BodyHashMismatch,
    #[error("signature does not verify")]
    InvalidSignature,
}

impl AuthFailure {
    /// Stable reason code returned to callers and used as a metric label.
    pub fn code(&self) -> &'static str {
        match self {
            Self::IpNotAllowed => "ip_not_allowed",
            Self::RateLimited => "rate_limited",
            Self::StaleTimestamp => "stale_timestamp",
            Self::InvalidApiKey => "invalid_api_key",
            Self::BodyHashMismatch => "body_hash_mismatch",
            Self::InvalidSignature => "invalid_signature",
        }
    }
}

/// Everything the authenticator inspects for one request.
#[derive(Debug, Clone, Default)]
pub struct RequestEvidence {
    pub caller_ip: String,
    pub authorization: Option<String>,
    pub timestamp: Option<String>,
    pub body_hash: Option<String>,
    pub signature: Option<String>,
    pub body: Bytes,
}

impl RequestEvidence {
    /// Collect evidence from request headers. Header values that are not
    /// visible ASCII are treated as absent.
    pub fn from_headers(headers: &HeaderMap, caller_ip: impl Into<String>, body: Bytes) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
        };
        Self {
            caller_ip: caller_ip.into(),
            authorization: header(HEADER_AUTHORIZATION),
            timestamp: header(HEADER_TIMESTAMP),
            body_hash: header(HEADER_BODY_HASH),
            signature: header(HEADER_SIGNATURE),
            body,
        }
    }
}

/// Resolve the caller address: first `X-Forwarded-For` entry when trusted,
/// else the socket peer, else [`UNKNOWN_CALLER`].
pub fn caller_ip(headers: &HeaderMap, peer: Option<IpAddr>, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for
        && let Some(first) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    peer.map_or_else(|| UNKNOWN_CALLER.to_string(), |ip| ip.to_string())
}

/// A request that passed every check.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub request_id: Uuid,
    pub caller_ip: String,
}

/// Immutable authenticator settings, loaded once at startup.
pub struct AuthSettings {
    pub api_keys: Vec<Zeroizing<String>>,
    pub signing_secret: Zeroizing<Vec<u8>>,
    pub allowlist: Vec<IpNet>,
    pub timestamp_window_secs: u64,
    pub max_requests: u64,
    pub rate_window_secs: u64,
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("api_keys", &self.api_keys.len())
            .field("allowlist", &self.allowlist)
            .field("timestamp_window_secs", &self.timestamp_window_secs)
            .field("max_requests", &self.max_requests)
            .field("rate_window_secs", &self.rate_window_secs)
            .finish_non_exhaustive()
    }
}

impl AuthSettings {
    /// Build settings from validated configuration.
    ///
    /// Allowlist entries may be single addresses or CIDR ranges; entries
    /// that parse as neither are skipped (startup validation reports them).
    pub fn from_config(security: &SecurityConfig, rate_limit: &RateLimitConfig) -> Self {
        let allowlist = security
            .allowed_ips
            .iter()
            .filter_map(|entry| {
                entry
                    .parse::<IpNet>()
                    .ok()
                    .or_else(|| entry.parse::<IpAddr>().ok().map(IpNet::from))
            })
            .collect();

        Self {
            api_keys: security
                .api_keys
                .iter()
                .filter(|k| !k.is_empty())
                .map(|k| Zeroizing::new(k.clone()))
                .collect(),
            signing_secret: Zeroizing::new(
                security.signing_secret.clone().unwrap_or_default().into_bytes(),
            ),
            allowlist,
            timestamp_window_secs: security.timestamp_window_secs,
            max_requests: rate_limit.max_requests,
            rate_window_secs: rate_limit.window_secs,
        }
    }
}

/// Verifies signed inbound requests.
#[derive(Debug)]
pub struct RequestAuthenticator {
    settings: AuthSettings,
    limiter: RateLimiter,
}

impl RequestAuthenticator {
    pub fn new(settings: AuthSettings, limiter: RateLimiter) -> Self {
        Self { settings, limiter }
    }

    pub fn from_config(
        security: &SecurityConfig,
        rate_limit: &RateLimitConfig,
        limiter: RateLimiter,
    ) -> Self {
        Self::new(AuthSettings::from_config(security, rate_limit), limiter)
    }

    /// Authenticate against the current wall clock.
    pub async fn authenticate(
        &self,
        evidence: &RequestEvidence,
    ) -> Result<Authenticated, AuthFailure> {
        self.authenticate_at(evidence, chrono::Utc::now().timestamp())
            .await
    }

    /// Authenticate as if the current time were `now` (unix seconds).
    pub async fn authenticate_at(
        &self,
        evidence: &RequestEvidence,
        now: i64,
    ) -> Result<Authenticated, AuthFailure> {
        match self.check(evidence, now).await {
            Ok(()) => {
                let request_id = Uuid::new_v4();
                debug!(%request_id, caller = %evidence.caller_ip, "Signed request accepted");
                Ok(Authenticated {
                    request_id,
                    caller_ip: evidence.caller_ip.clone(),
                })
            }
            Err(failure) => {
                warn!(
                    caller = %evidence.caller_ip,
                    reason = failure.code(),
                    "Signed request rejected"
                );
                crate::metrics::record_auth_failure(failure.code());
                Err(failure)
            }
        }
    }

    async fn check(&self, evidence: &RequestEvidence, now: i64) -> Result<(), AuthFailure> {
        self.check_allowlist(&evidence.caller_ip)?;
        self.check_rate(&evidence.caller_ip).await?;
        self.check_timestamp(evidence.timestamp.as_deref(), now)?;
        self.check_api_key(evidence.authorization.as_deref())?;
        self.check_signature(evidence)
    }

    fn check_allowlist(&self, caller: &str) -> Result<(), AuthFailure> {
        if self.settings.allowlist.is_empty() {
            return Ok(());
        }
        let Ok(ip) = caller.parse::<IpAddr>() else {
            return Err(AuthFailure::IpNotAllowed);
        };
        let ip = canonical_ip(ip);
        if self.settings.allowlist.iter().any(|net| net.contains(&ip)) {
            Ok(())
        } else {
            Err(AuthFailure::IpNotAllowed)
        }
    }

    async fn check_rate(&self, caller: &str) -> Result<(), AuthFailure> {
        match self
            .limiter
            .allow(caller, self.settings.max_requests, self.settings.rate_window_secs)
            .await
        {
            Ok(decision) if decision.allowed => Ok(()),
            Ok(_) => {
                crate::metrics::record_rate_limit_denied();
                Err(AuthFailure::RateLimited)
            }
            // No store answered; refuse rather than run unmetered.
            Err(e) => {
                warn!(error = %e, "Rate limit store unavailable");
                Err(AuthFailure::RateLimited)
            }
        }
    }

    fn check_timestamp(&self, timestamp: Option<&str>, now: i64) -> Result<(), AuthFailure> {
        let ts = timestamp
            .and_then(|t| t.parse::<i64>().ok())
            .ok_or(AuthFailure::StaleTimestamp)?;
        if now.abs_diff(ts) > self.settings.timestamp_window_secs {
            return Err(AuthFailure::StaleTimestamp);
        }
        Ok(())
    }

    fn check_api_key(&self, authorization: Option<&str>) -> Result<(), AuthFailure> {
        let presented = authorization
            .and_then(|h| h.strip_prefix(BEARER_PREFIX))
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(AuthFailure::InvalidApiKey)?;

        // Compare against every key so timing does not reveal which matched.
        let mut matched = subtle::Choice::from(0u8);
        for key in &self.settings.api_keys {
            matched |= presented.as_bytes().ct_eq(key.as_bytes());
        }
        if bool::from(matched) {
            Ok(())
        } else {
            Err(AuthFailure::InvalidApiKey)
        }
    }

    fn check_signature(&self, evidence: &RequestEvidence) -> Result<(), AuthFailure> {
        let claimed_hash = evidence
            .body_hash
            .as_deref()
            .ok_or(AuthFailure::BodyHashMismatch)?;
        let actual_hash = body_hash(&evidence.body);
        if !bool::from(
            actual_hash
                .as_bytes()
                .ct_eq(claimed_hash.to_ascii_lowercase().as_bytes()),
        ) {
            return Err(AuthFailure::BodyHashMismatch);
        }

        let signature = evidence
            .signature
            .as_deref()
            .and_then(|s| hex::decode(s).ok())
            .ok_or(AuthFailure::InvalidSignature)?;
        let timestamp = evidence.timestamp.as_deref().unwrap_or_default();
        let mac = keyed_mac(&self.settings.signing_secret, timestamp, &actual_hash)
            .ok_or(AuthFailure::InvalidSignature)?;
        mac.verify_slice(&signature)
            .map_err(|_| AuthFailure::InvalidSignature)
    }
}

/// Unwrap IPv4-mapped IPv6 so `::ffff:10.0.0.1` matches `10.0.0.0/8`.
fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        v4 => v4,
    }
}
