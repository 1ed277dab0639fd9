//! Ban cascade engine.
//!
//! Bans a target user and, when cascading, the IP and device fingerprints on
//! the user's most recent association plus every other account whose latest
//! association carries one of them. Alts are found one hop out; an alt's own
//! fingerprints are not followed.
//!
//! The precondition check and every write run under the target's advisory
//! lock inside one transaction, so a failure anywhere leaves no partial
//! cascade behind. Each store step is bounded by the configured timeout.

use super::locks::TargetLocks;
use crate::db::queries::{associations, bans, users};
use crate::db::{
    Ban, BanDetails, BanTarget, Database, DbError, FingerprintKind, FingerprintRef, NewBan,
    TrustLevel, User,
};
use crate::telemetry::CascadeTimer;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_REASON: &str = "No reason provided";
pub const DEFAULT_MODERATOR: &str = "system";

#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("user already banned: {0}")]
    AlreadyBanned(String),
    #[error("store step timed out: {0}")]
    Timeout(&'static str),
    #[error(transparent)]
    Db(#[from] DbError),
}

impl CascadeError {
    /// Metric label for the cascade outcome.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid",
            Self::UserNotFound(_) => "not_found",
            Self::AlreadyBanned(_) => "conflict",
            Self::Timeout(_) => "timeout",
            Self::Db(_) => "error",
        }
    }
}

/// A moderation request against one user.
#[derive(Debug, Clone)]
pub struct BanRequest {
    pub target: String,
    pub reason: Option<String>,
    pub banned_by: Option<String>,
    /// Unix seconds; `None` bans permanently.
    pub expires_at: Option<i64>,
    pub cascade: bool,
}

impl BanRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            reason: None,
            banned_by: None,
            expires_at: None,
            cascade: true,
        }
    }
}

/// What a cascade wrote.
#[derive(Debug, Clone)]
pub struct CascadeOutcome {
    pub main_ban_id: i64,
    /// Every ban row created, origin first.
    pub bans: Vec<Ban>,
    /// Distinct alt accounts banned.
    pub alt_count: usize,
    /// The origin had an IP fingerprint and the cascade ran.
    pub ip_banned: bool,
    /// The origin had a device fingerprint and the cascade ran.
    pub device_banned: bool,
}

impl CascadeOutcome {
    pub fn bans_created(&self) -> usize {
        self.bans.len()
    }
}

pub struct CascadeEngine {
    db: Database,
    locks: TargetLocks,
    step_timeout: Duration,
}

impl CascadeEngine {
    pub fn new(db: Database, step_timeout: Duration) -> Self {
        Self {
            db,
            locks: TargetLocks::new(),
            step_timeout,
        }
    }

    /// Ban `request.target` and, when cascading, its fingerprints and alts.
    pub async fn ban(&self, request: &BanRequest) -> Result<CascadeOutcome, CascadeError> {
        let mut timer = CascadeTimer::start();
        let result = self.ban_locked(request).await;
        match &result {
            Ok(outcome) => {
                timer.set_outcome("success");
                for ban in &outcome.bans {
                    crate::metrics::record_ban_created(ban.target_type.as_str());
                }
                info!(
                    user = %request.target,
                    bans = outcome.bans_created(),
                    alts = outcome.alt_count,
                    ip_banned = outcome.ip_banned,
                    device_banned = outcome.device_banned,
                    "Ban cascade committed"
                );
            }
            Err(e) => {
                timer.set_outcome(e.outcome());
                info!(user = %request.target, error = %e, "Ban cascade rejected");
            }
        }
        result
    }

    async fn ban_locked(&self, request: &BanRequest) -> Result<CascadeOutcome, CascadeError> {
        let target = request.target.trim();
        if target.is_empty() {
            return Err(CascadeError::InvalidRequest("UserID required".to_string()));
        }
        let now = crate::db::now();
        if request.expires_at.is_some_and(|at| at <= now) {
            return Err(CascadeError::InvalidRequest(
                "ExpiresAt must be in the future".to_string(),
            ));
        }

        let _guard = tokio::time::timeout(self.step_timeout, self.locks.lock(target))
            .await
            .map_err(|_| CascadeError::Timeout("target lock"))?;

        let mut tx = self
            .step("begin", async { Ok(self.db.pool().begin().await?) })
            .await?;

        let user = self
            .step("load target", users::find_by_external_id(&mut *tx, target))
            .await?
            .ok_or_else(|| CascadeError::UserNotFound(target.to_string()))?;

        if self
            .step("check existing ban", bans::find_active(&mut *tx, BanTarget::User, target, now))
            .await?
            .is_some()
        {
            return Err(CascadeError::AlreadyBanned(target.to_string()));
        }

        let fingerprints = self
            .step("load fingerprints", associations::latest_fingerprints(&mut *tx, user.id))
            .await?;

        let reason = request
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REASON);
        let banned_by = request
            .banned_by
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_MODERATOR);

        let mut created = Vec::new();
        let main = self
            .step(
                "create origin ban",
                bans::create(
                    &mut *tx,
                    &NewBan {
                        target_type: BanTarget::User,
                        target_id: user.external_id.clone(),
                        user_id: Some(user.id),
                        reason: reason.to_string(),
                        banned_by: banned_by.to_string(),
                        expires_at: request.expires_at,
                        details: BanDetails::Origin {
                            source_user_id: user.external_id.clone(),
                            previous_trust_level: Some(user.trust_level),
                            ip_hash: fingerprints.ip.as_ref().map(|f| f.hash.clone()),
                            device_hash: fingerprints.device.as_ref().map(|f| f.hash.clone()),
                        },
                    },
                    now,
                ),
            )
            .await?;
        let main_ban_id = main.id;
        created.push(main);

        let mut visited: HashSet<i64> = HashSet::new();
        let mut ip_banned = false;
        let mut device_banned = false;

        if request.cascade {
            let ctx = CascadeContext {
                origin: &user,
                reason,
                banned_by,
                expires_at: request.expires_at,
                now,
            };
            for kind in [FingerprintKind::Ip, FingerprintKind::Device] {
                let Some(fp) = fingerprints.get(kind) else {
                    continue;
                };
                self.cascade_fingerprint(&mut tx, &ctx, kind, fp, &mut visited, &mut created)
                    .await?;
                match kind {
                    FingerprintKind::Ip => ip_banned = true,
                    FingerprintKind::Device => device_banned = true,
                }
            }
        }

        self.step(
            "flag origin",
            users::set_trust_level(&mut *tx, user.id, TrustLevel::Banned),
        )
        .await?;

        self.step("commit", async { Ok(tx.commit().await?) }).await?;

        Ok(CascadeOutcome {
            main_ban_id,
            bans: created,
            alt_count: visited.len(),
            ip_banned,
            device_banned,
        })
    }

    /// Ban one fingerprint and every alt whose latest association shares it.
    async fn cascade_fingerprint(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        ctx: &CascadeContext<'_>,
        kind: FingerprintKind,
        fp: &FingerprintRef,
        visited: &mut HashSet<i64>,
        created: &mut Vec<Ban>,
    ) -> Result<(), CascadeError> {
        let target_type = match kind {
            FingerprintKind::Ip => BanTarget::Ip,
            FingerprintKind::Device => BanTarget::Device,
        };

        // Another cascade may already have banned this fingerprint.
        let existing = self
            .step(
                "check fingerprint ban",
                bans::find_active(&mut **tx, target_type, &fp.hash, ctx.now),
            )
            .await?;
        if existing.is_none() {
            let ban = self
                .step(
                    "create fingerprint ban",
                    bans::create(
                        &mut **tx,
                        &NewBan {
                            target_type,
                            target_id: fp.hash.clone(),
                            user_id: None,
                            reason: format!(
                                "Cascade from user {}: {}",
                                ctx.origin.external_id, ctx.reason
                            ),
                            banned_by: ctx.banned_by.to_string(),
                            expires_at: ctx.expires_at,
                            details: BanDetails::Origin {
                                source_user_id: ctx.origin.external_id.clone(),
                                previous_trust_level: None,
                                ip_hash: None,
                                device_hash: None,
                            },
                        },
                        ctx.now,
                    ),
                )
                .await?;
            created.push(ban);
        } else {
            debug!(kind = kind.as_str(), "Fingerprint already banned, skipping record");
        }

        let alts = self
            .step(
                "find alts",
                associations::alt_candidates(&mut **tx, kind, fp.id, ctx.origin.id, ctx.now),
            )
            .await?;

        for alt in alts {
            if !visited.insert(alt.id) {
                continue;
            }
            let (label, details) = match kind {
                FingerprintKind::Ip => (
                    "IP",
                    BanDetails::IpMatch {
                        linked_to: ctx.origin.external_id.clone(),
                    },
                ),
                FingerprintKind::Device => (
                    "device",
                    BanDetails::DeviceMatch {
                        linked_to: ctx.origin.external_id.clone(),
                    },
                ),
            };
            let ban = self
                .step(
                    "create alt ban",
                    bans::create(
                        &mut **tx,
                        &NewBan {
                            target_type: BanTarget::User,
                            target_id: alt.external_id.clone(),
                            user_id: Some(alt.id),
                            reason: format!(
                                "Alt account (shared {} with {}): {}",
                                label, ctx.origin.external_id, ctx.reason
                            ),
                            banned_by: ctx.banned_by.to_string(),
                            expires_at: ctx.expires_at,
                            details,
                        },
                        ctx.now,
                    ),
                )
                .await?;
            created.push(ban);

            self.step(
                "flag alt",
                users::set_trust_level(&mut **tx, alt.id, TrustLevel::Banned),
            )
            .await?;
            debug!(alt = %alt.external_id, via = kind.as_str(), "Alt account banned");
        }

        Ok(())
    }

    async fn step<T, F>(&self, name: &'static str, fut: F) -> Result<T, CascadeError>
    where
        F: Future<Output = Result<T, DbError>>,
    {
        match tokio::time::timeout(self.step_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CascadeError::Timeout(name)),
        }
    }
}

/// Values shared by every ban in one cascade.
struct CascadeContext<'a> {
    origin: &'a User,
    reason: &'a str,
    banned_by: &'a str,
    expires_at: Option<i64>,
    now: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewAssociation;

    async fn user_on(db: &Database, id: &str, ip: Option<&str>, device: Option<&str>) -> User {
        let user = db.users().create(id, None).await.unwrap();
        let ip = match ip {
            Some(h) => Some(db.fingerprints().upsert(FingerprintKind::Ip, h).await.unwrap().id),
            None => None,
        };
        let device = match device {
            Some(h) => Some(db.fingerprints().upsert(FingerprintKind::Device, h).await.unwrap().id),
            None => None,
        };
        db.associations()
            .create(&NewAssociation {
                user_id: user.id,
                ip_fingerprint_id: ip,
                device_fingerprint_id: device,
                trust_score: 0.8,
                risk_flags: Vec::new(),
            })
            .await
            .unwrap();
        user
    }

    async fn engine() -> (CascadeEngine, Database) {
        let db = Database::new(":memory:").await.unwrap();
        (CascadeEngine::new(db.clone(), Duration::from_secs(5)), db)
    }

    #[tokio::test]
    async fn test_cascade_bans_ip_and_device_alts_once() {
        let (engine, db) = engine().await;
        user_on(&db, "A", Some("ip1"), Some("dev1")).await;
        user_on(&db, "B", Some("ip1"), Some("dev9")).await;
        user_on(&db, "C", Some("ip7"), Some("dev1")).await;
        // Shares both; banned once, via IP.
        user_on(&db, "D", Some("ip1"), Some("dev1")).await;
        user_on(&db, "E", Some("ip8"), Some("dev8")).await;

        let mut request = BanRequest::new("A");
        request.reason = Some("spam".to_string());
        let outcome = engine.ban(&request).await.unwrap();

        assert_eq!(outcome.bans_created(), 6);
        assert_eq!(outcome.alt_count, 3);
        assert!(outcome.ip_banned && outcome.device_banned);
        assert_eq!(outcome.bans[0].id, outcome.main_ban_id);
        assert_eq!(outcome.bans[0].reason, "spam");
        assert_eq!(outcome.bans[0].banned_by, DEFAULT_MODERATOR);

        let d_ban = outcome.bans.iter().find(|b| b.target_id == "D").unwrap();
        assert_eq!(d_ban.reason, "Alt account (shared IP with A): spam");
        assert_eq!(d_ban.details, BanDetails::IpMatch { linked_to: "A".to_string() });
        let c_ban = outcome.bans.iter().find(|b| b.target_id == "C").unwrap();
        assert_eq!(c_ban.reason, "Alt account (shared device with A): spam");
        let ip_ban = outcome.bans.iter().find(|b| b.target_type == BanTarget::Ip).unwrap();
        assert_eq!(ip_ban.target_id, "ip1");
        assert_eq!(ip_ban.reason, "Cascade from user A: spam");

        for id in ["A", "B", "C", "D"] {
            let u = db.users().find_by_external_id(id).await.unwrap().unwrap();
            assert_eq!(u.trust_level, TrustLevel::Banned, "{} not banned", id);
        }
        let e = db.users().find_by_external_id("E").await.unwrap().unwrap();
        assert_eq!(e.trust_level, TrustLevel::New);
    }

    #[tokio::test]
    async fn test_second_ban_is_conflict_without_writes() {
        let (engine, db) = engine().await;
        user_on(&db, "A", Some("ip1"), None).await;
        user_on(&db, "B", Some("ip1"), None).await;

        engine.ban(&BanRequest::new("A")).await.unwrap();
        let before = db.bans().count().await.unwrap();

        let err = engine.ban(&BanRequest::new("A")).await.unwrap_err();
        assert!(matches!(err, CascadeError::AlreadyBanned(_)));
        assert_eq!(db.bans().count().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_banned_alts_and_fingerprints_are_not_duplicated() {
        let (engine, db) = engine().await;
        user_on(&db, "A", Some("ip1"), None).await;
        user_on(&db, "B", Some("ip1"), None).await;
        let first = engine.ban(&BanRequest::new("B")).await.unwrap();
        assert_eq!(first.alt_count, 1);

        // C shows up on the same IP later. Its cascade reuses the IP ban and
        // skips A and B, who are already banned.
        user_on(&db, "C", Some("ip1"), None).await;
        let outcome = engine.ban(&BanRequest::new("C")).await.unwrap();
        assert_eq!(outcome.bans_created(), 1);
        assert_eq!(outcome.alt_count, 0);
        assert!(outcome.ip_banned);
    }

    #[tokio::test]
    async fn test_user_without_fingerprints_gets_single_ban() {
        let (engine, db) = engine().await;
        db.users().create("lonely", None).await.unwrap();

        let outcome = engine.ban(&BanRequest::new("lonely")).await.unwrap();
        assert_eq!(outcome.bans_created(), 1);
        assert_eq!(outcome.alt_count, 0);
        assert!(!outcome.ip_banned && !outcome.device_banned);
        assert_eq!(
            outcome.bans[0].details,
            BanDetails::Origin {
                source_user_id: "lonely".to_string(),
                previous_trust_level: Some(TrustLevel::New),
                ip_hash: None,
                device_hash: None,
            }
        );
    }

    #[tokio::test]
    async fn test_cascade_disabled_bans_only_target() {
        let (engine, db) = engine().await;
        user_on(&db, "A", Some("ip1"), Some("dev1")).await;
        user_on(&db, "B", Some("ip1"), Some("dev1")).await;

        let mut request = BanRequest::new("A");
        request.cascade = false;
        let outcome = engine.ban(&request).await.unwrap();
        assert_eq!(outcome.bans_created(), 1);
        assert!(!outcome.ip_banned && !outcome.device_banned);

        let b = db.users().find_by_external_id("B").await.unwrap().unwrap();
        assert_eq!(b.trust_level, TrustLevel::New);
    }

    #[tokio::test]
    async fn test_validation_and_missing_user() {
        let (engine, _db) = engine().await;
        assert!(matches!(
            engine.ban(&BanRequest::new("  ")).await.unwrap_err(),
            CascadeError::InvalidRequest(_)
        ));
        assert!(matches!(
            engine.ban(&BanRequest::new("ghost")).await.unwrap_err(),
            CascadeError::UserNotFound(_)
        ));

        let mut past = BanRequest::new("ghost");
        past.expires_at = Some(1);
        assert!(matches!(
            engine.ban(&past).await.unwrap_err(),
            CascadeError::InvalidRequest(_)
        ));
    }

    #[tokio::test]
    async fn test_only_latest_association_seeds_the_cascade() {
        let (engine, db) = engine().await;
        let a = user_on(&db, "A", Some("old-ip"), None).await;
        user_on(&db, "B", Some("old-ip"), None).await;

        let new_ip = db.fingerprints().upsert(FingerprintKind::Ip, "new-ip").await.unwrap();
        db.associations()
            .create(&NewAssociation {
                user_id: a.id,
                ip_fingerprint_id: Some(new_ip.id),
                device_fingerprint_id: None,
                trust_score: 0.8,
                risk_flags: Vec::new(),
            })
            .await
            .unwrap();

        let outcome = engine.ban(&BanRequest::new("A")).await.unwrap();
        assert_eq!(outcome.alt_count, 0);
        assert_eq!(outcome.bans_created(), 2);
    }

    #[tokio::test]
    async fn test_failure_mid_cascade_rolls_back() {
        let (engine, db) = engine().await;
        user_on(&db, "A", Some("ip1"), Some("dev1")).await;
        user_on(&db, "B", Some("ip1"), None).await;
        sqlx::query(
            "CREATE TRIGGER refuse_alt_flag BEFORE UPDATE ON users \
             WHEN OLD.external_id = 'B' \
             BEGIN SELECT RAISE(ABORT, 'alt flag refused'); END",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let err = engine.ban(&BanRequest::new("A")).await.unwrap_err();
        assert!(matches!(err, CascadeError::Db(_)), "unexpected {:?}", err);

        assert_eq!(db.bans().count().await.unwrap(), 0);
        for id in ["A", "B"] {
            let user = db.users().find_by_external_id(id).await.unwrap().unwrap();
            assert_eq!(user.trust_level, TrustLevel::New);
        }
        assert!(engine.locks.is_empty());
    }

    #[tokio::test]
    async fn test_held_target_lock_times_out() {
        let db = Database::new(":memory:").await.unwrap();
        let engine = CascadeEngine::new(db.clone(), Duration::from_millis(50));
        db.users().create("A", None).await.unwrap();

        let held = engine.locks.lock("A").await;
        let err = engine.ban(&BanRequest::new("A")).await.unwrap_err();
        assert!(matches!(err, CascadeError::Timeout("target lock")));
        drop(held);

        assert_eq!(db.bans().count().await.unwrap(), 0);
        engine.ban(&BanRequest::new("A")).await.unwrap();
    }

    #[tokio::test]
    async fn test_busy_store_times_out() {
        let db = Database::new(":memory:").await.unwrap();
        let engine = CascadeEngine::new(db.clone(), Duration::from_millis(50));
        db.users().create("A", None).await.unwrap();

        // The in-memory pool has a single connection.
        let conn = db.pool().acquire().await.unwrap();
        let err = engine.ban(&BanRequest::new("A")).await.unwrap_err();
        assert!(matches!(err, CascadeError::Timeout("begin")));
        drop(conn);

        assert_eq!(db.bans().count().await.unwrap(), 0);
    }
}
