use sqlx::{PgExecutor, PgPool};
use time::OffsetDateTime;

use super::repo_types::{Event, LocationType};

const EVENT_COLUMNS: &str = "id, title, focus, description, guest_name, guest_description, \
                             date, location, location_type, poster, created_at, updated_at";

pub struct InsertEvent<'a> {
    pub title: &'a str,
    pub focus: &'a str,
    pub description: &'a str,
    pub guest_name: Option<&'a str>,
    pub guest_description: Option<&'a str>,
    pub date: OffsetDateTime,
    pub location: &'a str,
    pub location_type: LocationType,
    pub poster: Option<&'a str>,
}

/// `None` keeps the column, except `poster` which is always written.
pub struct PatchEvent<'a> {
    pub title: Option<&'a str>,
    pub focus: Option<&'a str>,
    pub description: Option<&'a str>,
    pub guest_name: Option<&'a str>,
    pub guest_description: Option<&'a str>,
    pub date: Option<OffsetDateTime>,
    pub location: Option<&'a str>,
    pub location_type: Option<LocationType>,
    pub poster: Option<&'a str>,
}

impl Event {
    pub async fn find_by_id<'e>(db: impl PgExecutor<'e>, id: i64) -> sqlx::Result<Option<Event>> {
        sqlx::query_as::<_, Event>(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"))
            .bind(id)
            .fetch_optional(db)
            .await
    }

    /// Soonest first.
    pub async fn list(db: &PgPool, limit: i64, offset: i64) -> sqlx::Result<Vec<Event>> {
        sqlx::query_as::<_, Event>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events ORDER BY date ASC, id ASC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await
    }

    pub async fn insert(db: &PgPool, new: InsertEvent<'_>) -> sqlx::Result<Event> {
        sqlx::query_as::<_, Event>(&format!(
            r#"
            INSERT INTO events
                (title, focus, description, guest_name, guest_description,
                 date, location, location_type, poster)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(new.title)
        .bind(new.focus)
        .bind(new.description)
        .bind(new.guest_name)
        .bind(new.guest_description)
        .bind(new.date)
        .bind(new.location)
        .bind(new.location_type)
        .bind(new.poster)
        .fetch_one(db)
        .await
    }

    pub async fn update(db: &PgPool, id: i64, patch: PatchEvent<'_>) -> sqlx::Result<Option<Event>> {
        sqlx::query_as::<_, Event>(&format!(
            r#"
            UPDATE events
               SET title             = COALESCE($2, title),
                   focus             = COALESCE($3, focus),
                   description       = COALESCE($4, description),
                   guest_name        = COALESCE($5, guest_name),
                   guest_description = COALESCE($6, guest_description),
                   date              = COALESCE($7, date),
                   location          = COALESCE($8, location),
                   location_type     = COALESCE($9, location_type),
                   poster            = $10,
                   updated_at        = now()
             WHERE id = $1
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(patch.title)
        .bind(patch.focus)
        .bind(patch.description)
        .bind(patch.guest_name)
        .bind(patch.guest_description)
        .bind(patch.date)
        .bind(patch.location)
        .bind(patch.location_type)
        .bind(patch.poster)
        .fetch_optional(db)
        .await
    }

    /// Registrations go with the row through `ON DELETE CASCADE`.
    pub async fn delete(db: &PgPool, id: i64) -> sqlx::Result<bool> {
        let res = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn participant_count(db: &PgPool, id: i64) -> sqlx::Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM registrations WHERE event_id = $1")
                .bind(id)
                .fetch_one(db)
                .await?;
        Ok(count)
    }
}
