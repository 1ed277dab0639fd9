//! Verification flow: records a user's IP and device fingerprints and
//! decides their starting trust level.

use super::roles::RoleGranter;
use crate::db::queries::{associations, bans, fingerprints, users};
use crate::db::{BanTarget, Database, DbError, FingerprintKind, NewAssociation, TrustLevel};
use crate::security::fingerprint::{FingerprintHasher, RawSignal};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const RISK_SHARED_DEVICE: &str = "SHARED_DEVICE";

const SCORE_VERIFIED: f64 = 0.8;
const SCORE_SHARED_DEVICE: f64 = 0.3;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{} banned: {reason}", .target.as_str())]
    Banned { target: BanTarget, reason: String },
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("store step timed out: {0}")]
    Timeout(&'static str),
    #[error(transparent)]
    Db(#[from] DbError),
}

impl VerifyError {
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid",
            Self::Banned { .. } => "banned",
            Self::UserNotFound(_) => "not_found",
            Self::Timeout(_) => "timeout",
            Self::Db(_) => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub external_id: String,
    /// Client IP as observed by the caller.
    pub ip: String,
    pub device: RawSignal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifyOutcome {
    pub already_verified: bool,
    /// Trust level after this call. Unchanged for already-verified users.
    pub trust_level: TrustLevel,
    pub shared_device: bool,
    pub role_granted: bool,
    pub role_error: Option<String>,
}

pub struct VerificationService {
    db: Database,
    hasher: Arc<FingerprintHasher>,
    roles: Arc<dyn RoleGranter>,
    step_timeout: Duration,
}

impl VerificationService {
    pub fn new(
        db: Database,
        hasher: Arc<FingerprintHasher>,
        roles: Arc<dyn RoleGranter>,
        step_timeout: Duration,
    ) -> Self {
        Self {
            db,
            hasher,
            roles,
            step_timeout,
        }
    }

    pub async fn verify(&self, request: &VerifyRequest) -> Result<VerifyOutcome, VerifyError> {
        let result = self.verify_inner(request).await;
        match &result {
            Ok(outcome) => {
                let label = if outcome.already_verified {
                    "already_verified"
                } else if outcome.shared_device {
                    "suspicious"
                } else {
                    "verified"
                };
                crate::metrics::record_verification(label);
            }
            Err(e) => crate::metrics::record_verification(e.outcome()),
        }
        result
    }

    async fn verify_inner(&self, request: &VerifyRequest) -> Result<VerifyOutcome, VerifyError> {
        let external_id = request.external_id.trim();
        if external_id.is_empty() {
            return Err(VerifyError::InvalidRequest("UserID required".to_string()));
        }
        if request.device.is_empty() {
            return Err(VerifyError::InvalidRequest("Missing device data".to_string()));
        }

        let ip_hash = self.hasher.hash_ip(request.ip.trim());
        let device_hash = self.hasher.hash_device(&request.device);
        let now = crate::db::now();

        let mut tx = self
            .step("begin", async { Ok(self.db.pool().begin().await?) })
            .await?;

        for (target, hash) in [(BanTarget::Ip, &ip_hash), (BanTarget::Device, &device_hash)] {
            if let Some(ban) = self
                .step("check fingerprint ban", bans::find_active(&mut *tx, target, hash, now))
                .await?
            {
                warn!(user = %external_id, kind = target.as_str(), "Verification blocked by ban");
                return Err(VerifyError::Banned {
                    target,
                    reason: ban.reason,
                });
            }
        }

        let user = self
            .step("load user", users::find_by_external_id(&mut *tx, external_id))
            .await?
            .ok_or_else(|| VerifyError::UserNotFound(external_id.to_string()))?;

        if let Some(ban) = self
            .step(
                "check user ban",
                bans::find_active(&mut *tx, BanTarget::User, external_id, now),
            )
            .await?
        {
            warn!(user = %external_id, "Verification blocked by user ban");
            return Err(VerifyError::Banned {
                target: BanTarget::User,
                reason: ban.reason,
            });
        }

        if let Some(existing) = self
            .step("load association", associations::latest_for_user(&mut *tx, user.id))
            .await?
        {
            self.step("touch user", users::touch(&mut *tx, user.id, now)).await?;
            self.step(
                "touch association",
                associations::touch(&mut *tx, existing.id, now),
            )
            .await?;
            self.step("commit", async { Ok(tx.commit().await?) }).await?;

            let (role_granted, role_error) = self.grant_role(external_id).await;
            return Ok(VerifyOutcome {
                already_verified: true,
                trust_level: user.trust_level,
                shared_device: false,
                role_granted,
                role_error,
            });
        }

        let ip = self
            .step("record ip", fingerprints::upsert(&mut tx, FingerprintKind::Ip, &ip_hash))
            .await?;
        let device = self
            .step(
                "record device",
                fingerprints::upsert(&mut tx, FingerprintKind::Device, &device_hash),
            )
            .await?;

        let shared_device = self
            .step(
                "check shared device",
                associations::shared_with_others(&mut *tx, FingerprintKind::Device, device.id, user.id),
            )
            .await?;

        let (trust_level, trust_score, risk_flags) = if shared_device {
            (
                TrustLevel::Suspicious,
                SCORE_SHARED_DEVICE,
                vec![RISK_SHARED_DEVICE.to_string()],
            )
        } else {
            (TrustLevel::Verified, SCORE_VERIFIED, Vec::new())
        };

        self.step(
            "create association",
            associations::create(
                &mut tx,
                &NewAssociation {
                    user_id: user.id,
                    ip_fingerprint_id: Some(ip.id),
                    device_fingerprint_id: Some(device.id),
                    trust_score,
                    risk_flags,
                },
            ),
        )
        .await?;
        self.step(
            "set trust level",
            users::set_trust_level(&mut *tx, user.id, trust_level),
        )
        .await?;
        self.step("touch user", users::touch(&mut *tx, user.id, now)).await?;
        self.step("commit", async { Ok(tx.commit().await?) }).await?;

        info!(user = %external_id, trust = %trust_level, shared_device, "User verified");

        let (role_granted, role_error) = self.grant_role(external_id).await;
        Ok(VerifyOutcome {
            already_verified: false,
            trust_level,
            shared_device,
            role_granted,
            role_error,
        })
    }

    async fn grant_role(&self, external_id: &str) -> (bool, Option<String>) {
        match self.roles.grant_verified_role(external_id).await {
            Ok(()) => (true, None),
            Err(e) => {
                warn!(user = %external_id, error = %e, "Role grant failed");
                (false, Some(e.to_string()))
            }
        }
    }

    async fn step<T, F>(&self, name: &'static str, fut: F) -> Result<T, VerifyError>
    where
        F: Future<Output = Result<T, DbError>>,
    {
        match tokio::time::timeout(self.step_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(VerifyError::Timeout(name)),
        }
    }
}
