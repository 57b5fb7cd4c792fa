use rand::{distributions::Alphanumeric, thread_rng, Rng};
use serde::Serialize;
use sqlx::{FromRow, PgExecutor, PgPool};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// 64 alphanumeric characters from the thread rng.
pub fn generate_reset_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PasswordResetToken {
    pub id: i64,
    pub token: String,
    pub user_id: i64,
    pub expires_at: OffsetDateTime,
    pub used_at: Option<OffsetDateTime>,
}

impl PasswordResetToken {
    /// Unexpired and never used.
    pub fn is_redeemable(&self, now: OffsetDateTime) -> bool {
        self.used_at.is_none() && self.expires_at > now
    }

    pub async fn issue(db: &PgPool, user_id: i64, ttl: Duration) -> sqlx::Result<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO password_reset_tokens (token, user_id, expires_at)
            VALUES ($1, $2, $3)
            RETURNING id, token, user_id, expires_at, used_at
            "#,
        )
        .bind(generate_reset_token())
        .bind(user_id)
        .bind(OffsetDateTime::now_utc() + ttl)
        .fetch_one(db)
        .await
    }

    /// Row-locks the token for the rest of the transaction.
    pub async fn find_for_update<'e>(
        db: impl PgExecutor<'e>,
        token: &str,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT id, token, user_id, expires_at, used_at
              FROM password_reset_tokens
             WHERE token = $1
               FOR UPDATE
            "#,
        )
        .bind(token)
        .fetch_optional(db)
        .await
    }

    pub async fn mark_used<'e>(db: impl PgExecutor<'e>, id: i64) -> sqlx::Result<()> {
        sqlx::query("UPDATE password_reset_tokens SET used_at = now() WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Deletes tokens that are expired or already used.
    pub async fn purge_stale(db: &PgPool) -> sqlx::Result<u64> {
        let res = sqlx::query(
            "DELETE FROM password_reset_tokens WHERE expires_at < now() OR used_at IS NOT NULL",
        )
        .execute(db)
        .await?;
        Ok(res.rows_affected())
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct EmailVerificationToken {
    pub id: i64,
    pub token: String,
    pub user_id: i64,
    pub expires_at: OffsetDateTime,
}

impl EmailVerificationToken {
    pub async fn issue(db: &PgPool, user_id: i64, ttl: Duration) -> sqlx::Result<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO email_verification_tokens (token, user_id, expires_at)
            VALUES ($1, $2, $3)
            RETURNING id, token, user_id, expires_at
            "#,
        )
        .bind(Uuid::new_v4().simple().to_string())
        .bind(user_id)
        .bind(OffsetDateTime::now_utc() + ttl)
        .fetch_one(db)
        .await
    }

    pub async fn find<'e>(db: impl PgExecutor<'e>, token: &str) -> sqlx::Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT id, token, user_id, expires_at FROM email_verification_tokens WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(db)
        .await
    }

    pub async fn delete_for_user<'e>(db: impl PgExecutor<'e>, user_id: i64) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM email_verification_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn purge_expired(db: &PgPool) -> sqlx::Result<u64> {
        let res = sqlx::query("DELETE FROM email_verification_tokens WHERE expires_at < now()")
            .execute(db)
            .await?;
        Ok(res.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_tokens_are_long_and_distinct() {
        let a = generate_reset_token();
        let b = generate_reset_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn redeemable_only_when_fresh_and_unused() {
        let now = OffsetDateTime::now_utc();
        let mut t = PasswordResetToken {
            id: 1,
            token: "t".into(),
            user_id: 1,
            expires_at: now + Duration::minutes(5),
            used_at: None,
        };
        assert!(t.is_redeemable(now));
        t.used_at = Some(now);
        assert!(!t.is_redeemable(now));
        t.used_at = None;
        t.expires_at = now - Duration::seconds(1);
        assert!(!t.is_redeemable(now));
    }
}
