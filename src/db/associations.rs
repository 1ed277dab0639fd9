//! Associations between users and fingerprints, and the alt-account search
//! built on them.

use super::{Association, DbError, FingerprintKind, FingerprintRef, User};
use sqlx::SqlitePool;

/// Fingerprints on a user's most recent association.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserFingerprints {
    pub association_id: Option<i64>,
    pub ip: Option<FingerprintRef>,
    pub device: Option<FingerprintRef>,
}

impl UserFingerprints {
    pub fn get(&self, kind: FingerprintKind) -> Option<&FingerprintRef> {
        match kind {
            FingerprintKind::Ip => self.ip.as_ref(),
            FingerprintKind::Device => self.device.as_ref(),
        }
    }
}

/// Values for a new association row.
#[derive(Debug, Clone)]
pub struct NewAssociation {
    pub user_id: i64,
    pub ip_fingerprint_id: Option<i64>,
    pub device_fingerprint_id: Option<i64>,
    pub trust_score: f64,
    pub risk_flags: Vec<String>,
}

/// Latest association per user, picked by last-seen time with the row id
/// breaking ties.
const LATEST_ASSOCIATION: &str = r#"
    SELECT a2.id FROM associations a2
    WHERE a2.user_id = u.id
    ORDER BY a2.last_seen_at DESC, a2.id DESC
    LIMIT 1
"#;

type AssociationRow = (i64, i64, Option<i64>, Option<i64>, f64, String, bool, i64, i64);

fn from_row(row: AssociationRow) -> Result<Association, DbError> {
    let (
        id,
        user_id,
        ip_fingerprint_id,
        device_fingerprint_id,
        trust_score,
        risk_flags,
        is_blocked,
        created_at,
        last_seen_at,
    ) = row;
    let risk_flags = serde_json::from_str(&risk_flags)
        .map_err(|e| DbError::Corrupt(format!("association {} risk_flags: {}", id, e)))?;
    Ok(Association {
        id,
        user_id,
        ip_fingerprint_id,
        device_fingerprint_id,
        trust_score,
        risk_flags,
        is_blocked,
        created_at,
        last_seen_at,
    })
}

pub mod queries {
    use super::*;
    use crate::db::TrustLevel;
    use sqlx::{SqliteConnection, SqliteExecutor};

    /// The user's most recently seen association, if any.
    pub async fn latest_for_user<'e, E: SqliteExecutor<'e>>(
        exec: E,
        user_id: i64,
    ) -> Result<Option<Association>, DbError> {
        let row = sqlx::query_as::<_, AssociationRow>(
            r#"
            SELECT id, user_id, ip_fingerprint_id, device_fingerprint_id,
                   trust_score, risk_flags, is_blocked, created_at, last_seen_at
            FROM associations
            WHERE user_id = ?
            ORDER BY last_seen_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(exec)
        .await?;

        row.map(from_row).transpose()
    }

    /// Fingerprint hashes on the user's most recent association.
    ///
    /// Either side may be absent; both are absent when the user has never
    /// been verified.
    pub async fn latest_fingerprints<'e, E: SqliteExecutor<'e>>(
        exec: E,
        user_id: i64,
    ) -> Result<UserFingerprints, DbError> {
        let row = sqlx::query_as::<_, (i64, Option<i64>, Option<String>, Option<i64>, Option<String>)>(
            r#"
            SELECT a.id, ip.id, ip.hash, dev.id, dev.hash
            FROM associations a
            LEFT JOIN fingerprints ip ON ip.id = a.ip_fingerprint_id
            LEFT JOIN fingerprints dev ON dev.id = a.device_fingerprint_id
            WHERE a.user_id = ?
            ORDER BY a.last_seen_at DESC, a.id DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(exec)
        .await?;

        let Some((association_id, ip_id, ip_hash, dev_id, dev_hash)) = row else {
            return Ok(UserFingerprints::default());
        };
        let pair = |id: Option<i64>, hash: Option<String>| {
            id.zip(hash).map(|(id, hash)| FingerprintRef { id, hash })
        };
        Ok(UserFingerprints {
            association_id: Some(association_id),
            ip: pair(ip_id, ip_hash),
            device: pair(dev_id, dev_hash),
        })
    }

    pub async fn create(
        conn: &mut SqliteConnection,
        new: &NewAssociation,
    ) -> Result<Association, DbError> {
        let now = crate::db::now();
        let flags = serde_json::to_string(&new.risk_flags)
            .map_err(|e| DbError::Corrupt(e.to_string()))?;
        let result = sqlx::query(
            r#"
            INSERT INTO associations
                (user_id, ip_fingerprint_id, device_fingerprint_id, trust_score,
                 risk_flags, is_blocked, created_at, last_seen_at)
            VALUES (?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(new.user_id)
        .bind(new.ip_fingerprint_id)
        .bind(new.device_fingerprint_id)
        .bind(new.trust_score)
        .bind(&flags)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(Association {
            id: result.last_insert_rowid(),
            user_id: new.user_id,
            ip_fingerprint_id: new.ip_fingerprint_id,
            device_fingerprint_id: new.device_fingerprint_id,
            trust_score: new.trust_score,
            risk_flags: new.risk_flags.clone(),
            is_blocked: false,
            created_at: now,
            last_seen_at: now,
        })
    }

    pub async fn touch<'e, E: SqliteExecutor<'e>>(
        exec: E,
        association_id: i64,
        at: i64,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE associations SET last_seen_at = ? WHERE id = ?")
            .bind(at)
            .bind(association_id)
            .execute(exec)
            .await?;
        Ok(())
    }

    /// Whether any user other than `user_id` has ever been seen on this
    /// fingerprint.
    pub async fn shared_with_others<'e, E: SqliteExecutor<'e>>(
        exec: E,
        kind: FingerprintKind,
        fingerprint_id: i64,
        user_id: i64,
    ) -> Result<bool, DbError> {
        let query = format!(
            "SELECT EXISTS (SELECT 1 FROM associations WHERE {} = ? AND user_id != ?)",
            kind.association_column()
        );
        let shared: bool = sqlx::query_scalar(&query)
            .bind(fingerprint_id)
            .bind(user_id)
            .fetch_one(exec)
            .await?;
        Ok(shared)
    }

    /// Users whose latest association carries `fingerprint_id`, excluding
    /// `origin_user_id`, users whose latest association is blocked, and
    /// users already holding an active USER ban at `now`.
    ///
    /// Ordered by user id so cascades are reproducible.
    pub async fn alt_candidates<'e, E: SqliteExecutor<'e>>(
        exec: E,
        kind: FingerprintKind,
        fingerprint_id: i64,
        origin_user_id: i64,
        now: i64,
    ) -> Result<Vec<User>, DbError> {
        let query = format!(
            r#"
            SELECT u.id, u.external_id, u.username, u.trust_level, u.created_at, u.last_seen_at
            FROM users u
            JOIN associations a ON a.id = ({latest})
            WHERE a.{column} = ?
              AND u.id != ?
              AND a.is_blocked = 0
              AND NOT EXISTS (
                  SELECT 1 FROM bans b
                  WHERE b.target_type = 'USER'
                    AND b.target_id = u.external_id
                    AND b.revoked_at IS NULL
                    AND (b.expires_at IS NULL OR b.expires_at > ?)
              )
            ORDER BY u.id
            "#,
            latest = LATEST_ASSOCIATION,
            column = kind.association_column(),
        );

        let rows = sqlx::query_as::<_, (i64, String, Option<String>, String, i64, i64)>(&query)
            .bind(fingerprint_id)
            .bind(origin_user_id)
            .bind(now)
            .fetch_all(exec)
            .await?;

        rows.into_iter()
            .map(|(id, external_id, username, trust_level, created_at, last_seen_at)| {
                Ok(User {
                    id,
                    external_id,
                    username,
                    trust_level: TrustLevel::parse(&trust_level)?,
                    created_at,
                    last_seen_at,
                })
            })
            .collect()
    }
}

/// Repository for association reads outside a transaction.
pub struct AssociationRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AssociationRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn latest_for_user(&self, user_id: i64) -> Result<Option<Association>, DbError> {
        queries::latest_for_user(self.pool, user_id).await
    }

    pub async fn latest_fingerprints(&self, user_id: i64) -> Result<UserFingerprints, DbError> {
        queries::latest_fingerprints(self.pool, user_id).await
    }

    pub async fn create(&self, new: &NewAssociation) -> Result<Association, DbError> {
        let mut conn = self.pool.acquire().await?;
        queries::create(&mut conn, new).await
    }
}
