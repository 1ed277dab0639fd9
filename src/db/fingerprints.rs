//! Content-addressed fingerprint storage.
//!
//! The same (kind, hash) pair always resolves to the same row.

use super::{DbError, Fingerprint, FingerprintKind};
use sqlx::SqlitePool;

pub mod queries {
    use super::*;
    use sqlx::SqliteConnection;

    /// Return the row for `(kind, hash)`, inserting it on first sight.
    pub async fn upsert(
        conn: &mut SqliteConnection,
        kind: FingerprintKind,
        hash: &str,
    ) -> Result<Fingerprint, DbError> {
        sqlx::query(
            r#"
            INSERT INTO fingerprints (kind, hash, first_seen_at)
            VALUES (?, ?, ?)
            ON CONFLICT (kind, hash) DO NOTHING
            "#,
        )
        .bind(kind.as_str())
        .bind(hash)
        .bind(crate::db::now())
        .execute(&mut *conn)
        .await?;

        let (id, first_seen_at) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT id, first_seen_at FROM fingerprints WHERE kind = ? AND hash = ?",
        )
        .bind(kind.as_str())
        .bind(hash)
        .fetch_one(&mut *conn)
        .await?;

        Ok(Fingerprint {
            id,
            kind,
            hash: hash.to_string(),
            first_seen_at,
        })
    }
}

/// Repository for fingerprint rows.
pub struct FingerprintRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> FingerprintRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, kind: FingerprintKind, hash: &str) -> Result<Fingerprint, DbError> {
        let mut conn = self.pool.acquire().await?;
        queries::upsert(&mut conn, kind, hash).await
    }
}
