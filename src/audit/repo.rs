use sqlx::PgPool;

use super::repo_types::{AuditEntry, AuditLog};

pub async fn insert(db: &PgPool, entry: &AuditEntry) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_logs (action, user_id, ip, user_agent, metadata)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(entry.action.as_str())
    .bind(entry.user_id)
    .bind(entry.ip.as_deref())
    .bind(entry.user_agent.as_deref())
    .bind(&entry.metadata)
    .execute(db)
    .await?;
    Ok(())
}

/// Newest first; `None` filters match everything.
pub async fn list(
    db: &PgPool,
    action: Option<&str>,
    user_id: Option<i64>,
    limit: i64,
    offset: i64,
) -> sqlx::Result<Vec<AuditLog>> {
    sqlx::query_as::<_, AuditLog>(
        r#"
        SELECT id, action, user_id, ip, user_agent, metadata, created_at
          FROM audit_logs
         WHERE ($1::text IS NULL OR action = $1)
           AND ($2::bigint IS NULL OR user_id = $2)
         ORDER BY created_at DESC, id DESC
         LIMIT $3 OFFSET $4
        "#,
    )
    .bind(action)
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await
}
