//! Cached responses for client idempotency keys.
//!
//! Rows are keyed by `(user_id, key_digest)` where the digest is computed by the caller.
//! Expired rows are invisible to lookups and purged opportunistically.

use crate::domain::UserId;

use super::Repository;

impl Repository {
    /// Cached response body for a key, if one exists and has not expired at `now_ms`.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn find_idempotency_record(
        &self,
        user_id: UserId,
        key_digest: &str,
        now_ms: i64,
    ) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT response FROM idempotency_records
            WHERE user_id = ? AND key_digest = ? AND expires_at > ?
            "#,
        )
        .bind(user_id.as_i64())
        .bind(key_digest)
        .bind(now_ms)
        .fetch_optional(&self.pool)
        .await
    }

    /// Store a response body, replacing an expired record under the same key.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn upsert_idempotency_record(
        &self,
        user_id: UserId,
        key_digest: &str,
        response: &str,
        expires_at_ms: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_records (user_id, key_digest, response, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, key_digest) DO UPDATE SET
                response = excluded.response,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(user_id.as_i64())
        .bind(key_digest)
        .bind(response)
        .bind(expires_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete records expired at `now_ms`. Returns the number removed.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn purge_expired_idempotency(&self, now_ms: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM idempotency_records WHERE expires_at <= ?")
            .bind(now_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use tempfile::TempDir;

    async fn setup_test_db() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Repository::new(pool), temp_dir)
    }

    #[tokio::test]
    async fn test_record_visible_until_expiry() {
        let (repo, _temp) = setup_test_db().await;
        let user = UserId::new(1);

        repo.upsert_idempotency_record(user, "abc", "{\"id\":1}", 2_000)
            .await
            .unwrap();

        assert_eq!(
            repo.find_idempotency_record(user, "abc", 1_999).await.unwrap(),
            Some("{\"id\":1}".to_string())
        );
        assert_eq!(
            repo.find_idempotency_record(user, "abc", 2_000).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_records_scoped_per_user() {
        let (repo, _temp) = setup_test_db().await;

        repo.upsert_idempotency_record(UserId::new(1), "abc", "one", 10_000)
            .await
            .unwrap();
        assert!(repo
            .find_idempotency_record(UserId::new(2), "abc", 0)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_purge_and_replace_expired() {
        let (repo, _temp) = setup_test_db().await;
        let user = UserId::new(1);

        repo.upsert_idempotency_record(user, "old", "stale", 100)
            .await
            .unwrap();
        repo.upsert_idempotency_record(user, "new", "fresh", 10_000)
            .await
            .unwrap();

        assert_eq!(repo.purge_expired_idempotency(500).await.unwrap(), 1);

        repo.upsert_idempotency_record(user, "new", "replaced", 20_000)
            .await
            .unwrap();
        assert_eq!(
            repo.find_idempotency_record(user, "new", 500).await.unwrap(),
            Some("replaced".to_string())
        );
    }
}
