//! Repository for users and trust levels.

use super::{DbError, TrustLevel, User};
use sqlx::SqlitePool;

type UserRow = (i64, String, Option<String>, String, i64, i64);

fn from_row(row: UserRow) -> Result<User, DbError> {
    let (id, external_id, username, trust_level, created_at, last_seen_at) = row;
    Ok(User {
        id,
        external_id,
        username,
        trust_level: TrustLevel::parse(&trust_level)?,
        created_at,
        last_seen_at,
    })
}

pub mod queries {
    use super::*;
    use sqlx::SqliteExecutor;

    pub async fn find_by_external_id<'e, E: SqliteExecutor<'e>>(
        exec: E,
        external_id: &str,
    ) -> Result<Option<User>, DbError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, external_id, username, trust_level, created_at, last_seen_at
            FROM users
            WHERE external_id = ?
            "#,
        )
        .bind(external_id)
        .fetch_optional(exec)
        .await?;

        row.map(from_row).transpose()
    }

    /// Insert a user at trust level NEW.
    pub async fn create<'e, E: SqliteExecutor<'e>>(
        exec: E,
        external_id: &str,
        username: Option<&str>,
    ) -> Result<User, DbError> {
        let now = crate::db::now();
        let result = sqlx::query(
            r#"
            INSERT INTO users (external_id, username, trust_level, created_at, last_seen_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(external_id)
        .bind(username)
        .bind(TrustLevel::New.as_str())
        .bind(now)
        .bind(now)
        .execute(exec)
        .await?;

        Ok(User {
            id: result.last_insert_rowid(),
            external_id: external_id.to_string(),
            username: username.map(String::from),
            trust_level: TrustLevel::New,
            created_at: now,
            last_seen_at: now,
        })
    }

    pub async fn set_trust_level<'e, E: SqliteExecutor<'e>>(
        exec: E,
        user_id: i64,
        level: TrustLevel,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET trust_level = ? WHERE id = ?")
            .bind(level.as_str())
            .bind(user_id)
            .execute(exec)
            .await?;
        Ok(())
    }

    pub async fn touch<'e, E: SqliteExecutor<'e>>(
        exec: E,
        user_id: i64,
        at: i64,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET last_seen_at = ? WHERE id = ?")
            .bind(at)
            .bind(user_id)
            .execute(exec)
            .await?;
        Ok(())
    }
}

/// Repository for user operations.
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_external_id(&self, external_id: &str) -> Result<Option<User>, DbError> {
        queries::find_by_external_id(self.pool, external_id).await
    }

    /// Register a user. Users normally arrive through the sign-in flow.
    pub async fn create(&self, external_id: &str, username: Option<&str>) -> Result<User, DbError> {
        queries::create(self.pool, external_id, username).await
    }

    pub async fn set_trust_level(&self, user_id: i64, level: TrustLevel) -> Result<(), DbError> {
        queries::set_trust_level(self.pool, user_id, level).await
    }
}
