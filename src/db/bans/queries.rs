//! Ban query operations.

use super::models::{Ban, BanDetails, BanStatus, BanTarget, NewBan};
use crate::db::DbError;
use sqlx::{SqliteExecutor, SqlitePool};

const BAN_COLUMNS: &str = "id, target_type, target_id, user_id, reason, banned_by, \
                           created_at, expires_at, revoked_at, details";

/// Active means not revoked and not expired; bind `now` once.
const ACTIVE: &str = "revoked_at IS NULL AND (expires_at IS NULL OR expires_at > ?)";

/// Inverse of [`ACTIVE`]; bind `now` once.
const INACTIVE: &str = "(revoked_at IS NOT NULL OR expires_at <= ?)";

type BanRow = (
    i64,
    String,
    String,
    Option<i64>,
    String,
    String,
    i64,
    Option<i64>,
    Option<i64>,
    String,
);

fn from_row(row: BanRow) -> Result<Ban, DbError> {
    let (id, target_type, target_id, user_id, reason, banned_by, created_at, expires_at, revoked_at, details) =
        row;
    let details: BanDetails = serde_json::from_str(&details)
        .map_err(|e| DbError::Corrupt(format!("ban {} details: {}", id, e)))?;
    Ok(Ban {
        id,
        target_type: BanTarget::parse(&target_type)?,
        target_id,
        user_id,
        reason,
        banned_by,
        created_at,
        expires_at,
        revoked_at,
        details,
    })
}

/// The active ban on `(target, target_id)` at `now`, if any.
pub async fn find_active<'e, E: SqliteExecutor<'e>>(
    exec: E,
    target: BanTarget,
    target_id: &str,
    now: i64,
) -> Result<Option<Ban>, DbError> {
    let query = format!(
        "SELECT {} FROM bans WHERE target_type = ? AND target_id = ? AND {} ORDER BY id DESC LIMIT 1",
        BAN_COLUMNS, ACTIVE
    );
    let row = sqlx::query_as::<_, BanRow>(&query)
        .bind(target.as_str())
        .bind(target_id)
        .bind(now)
        .fetch_optional(exec)
        .await?;

    row.map(from_row).transpose()
}

/// Insert a ban stamped with `created_at`.
pub async fn create<'e, E: SqliteExecutor<'e>>(
    exec: E,
    ban: &NewBan,
    created_at: i64,
) -> Result<Ban, DbError> {
    let details = serde_json::to_string(&ban.details).map_err(|e| DbError::Corrupt(e.to_string()))?;
    let result = sqlx::query(
        r#"
        INSERT INTO bans (target_type, target_id, user_id, reason, banned_by, created_at, expires_at, details)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(ban.target_type.as_str())
    .bind(&ban.target_id)
    .bind(ban.user_id)
    .bind(&ban.reason)
    .bind(&ban.banned_by)
    .bind(created_at)
    .bind(ban.expires_at)
    .bind(&details)
    .execute(exec)
    .await?;

    Ok(Ban {
        id: result.last_insert_rowid(),
        target_type: ban.target_type,
        target_id: ban.target_id.clone(),
        user_id: ban.user_id,
        reason: ban.reason.clone(),
        banned_by: ban.banned_by.clone(),
        created_at,
        expires_at: ban.expires_at,
        revoked_at: None,
        details: ban.details.clone(),
    })
}

/// Bans newest first, filtered by status at `now`.
pub async fn list<'e, E: SqliteExecutor<'e>>(
    exec: E,
    status: BanStatus,
    limit: u32,
    now: i64,
) -> Result<Vec<Ban>, DbError> {
    let filter = match status {
        BanStatus::Active => Some(ACTIVE),
        BanStatus::Expired => Some(INACTIVE),
        BanStatus::All => None,
    };
    let query = match filter {
        Some(f) => format!(
            "SELECT {} FROM bans WHERE {} ORDER BY created_at DESC, id DESC LIMIT ?",
            BAN_COLUMNS, f
        ),
        None => format!(
            "SELECT {} FROM bans ORDER BY created_at DESC, id DESC LIMIT ?",
            BAN_COLUMNS
        ),
    };

    let mut q = sqlx::query_as::<_, BanRow>(&query);
    if filter.is_some() {
        q = q.bind(now);
    }
    let rows = q.bind(i64::from(limit)).fetch_all(exec).await?;

    rows.into_iter().map(from_row).collect()
}

/// Repository for ban reads outside a transaction.
pub struct BanRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BanRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_active(&self, target: BanTarget, target_id: &str) -> Result<Option<Ban>, DbError> {
        find_active(self.pool, target, target_id, crate::db::now()).await
    }

    pub async fn list(&self, status: BanStatus, limit: u32) -> Result<Vec<Ban>, DbError> {
        list(self.pool, status, limit, crate::db::now()).await
    }

    /// Total ban rows, active or not.
    pub async fn count(&self) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bans")
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn ban(target_id: &str, expires_at: Option<i64>) -> NewBan {
        NewBan {
            target_type: BanTarget::Ip,
            target_id: target_id.to_string(),
            user_id: None,
            reason: "Cascade from user 1: spam".to_string(),
            banned_by: "system".to_string(),
            expires_at,
            details: BanDetails::Origin {
                source_user_id: "1".to_string(),
                previous_trust_level: None,
                ip_hash: None,
                device_hash: None,
            },
        }
    }

    #[tokio::test]
    async fn test_find_active_ignores_expired_and_revoked() {
        let db = Database::new(":memory:").await.unwrap();
        let now = 1_000;

        create(db.pool(), &ban("expired", Some(now)), 10).await.unwrap();
        let revoked = create(db.pool(), &ban("revoked", None), 10).await.unwrap();
        sqlx::query("UPDATE bans SET revoked_at = ? WHERE id = ?")
            .bind(20i64)
            .bind(revoked.id)
            .execute(db.pool())
            .await
            .unwrap();
        let live = create(db.pool(), &ban("live", Some(now + 1)), 10).await.unwrap();

        assert!(find_active(db.pool(), BanTarget::Ip, "expired", now).await.unwrap().is_none());
        assert!(find_active(db.pool(), BanTarget::Ip, "revoked", now).await.unwrap().is_none());
        assert_eq!(
            find_active(db.pool(), BanTarget::Ip, "live", now).await.unwrap().unwrap(),
            live
        );
        assert!(find_active(db.pool(), BanTarget::Device, "live", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters_and_orders_newest_first() {
        let db = Database::new(":memory:").await.unwrap();
        let now = 1_000;
        create(db.pool(), &ban("a", None), 1).await.unwrap();
        create(db.pool(), &ban("b", Some(500)), 2).await.unwrap();
        create(db.pool(), &ban("c", None), 3).await.unwrap();

        let all = list(db.pool(), BanStatus::All, 100, now).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|b| b.target_id.as_str()).collect();
        assert_eq!(ids, ["c", "b", "a"]);

        let active = list(db.pool(), BanStatus::Active, 100, now).await.unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|b| b.is_active(now)));

        let expired = list(db.pool(), BanStatus::Expired, 100, now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].target_id, "b");

        assert_eq!(list(db.pool(), BanStatus::All, 1, now).await.unwrap().len(), 1);
    }
}
