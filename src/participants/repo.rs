use sqlx::{PgExecutor, PgPool};

use super::repo_types::{Participant, Registration, Sex};

const PARTICIPANT_COLUMNS: &str = "id, name, email, phone, sex, created_at";

pub struct UpsertParticipant<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub phone: &'a str,
    pub sex: Sex,
}

impl Participant {
    /// Inserts by email or refreshes the stored details.
    pub async fn upsert<'e>(
        db: impl PgExecutor<'e>,
        p: UpsertParticipant<'_>,
    ) -> sqlx::Result<Participant> {
        sqlx::query_as::<_, Participant>(&format!(
            r#"
            INSERT INTO participants (name, email, phone, sex)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO UPDATE
               SET name = EXCLUDED.name, phone = EXCLUDED.phone, sex = EXCLUDED.sex
            RETURNING {PARTICIPANT_COLUMNS}
            "#
        ))
        .bind(p.name)
        .bind(p.email)
        .bind(p.phone)
        .bind(p.sex)
        .fetch_one(db)
        .await
    }

    pub async fn list(db: &PgPool, limit: i64, offset: i64) -> sqlx::Result<Vec<Participant>> {
        sqlx::query_as::<_, Participant>(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants ORDER BY id LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await
    }

    /// Participants registered for an event, in registration order.
    pub async fn list_for_event(db: &PgPool, event_id: i64) -> sqlx::Result<Vec<Participant>> {
        sqlx::query_as::<_, Participant>(
            r#"
            SELECT p.id, p.name, p.email, p.phone, p.sex, p.created_at
              FROM participants p
              JOIN registrations r ON r.participant_id = p.id
             WHERE r.event_id = $1
             ORDER BY r.created_at, r.id
            "#,
        )
        .bind(event_id)
        .fetch_all(db)
        .await
    }
}

impl Registration {
    /// `None` when the participant is already registered for the event.
    pub async fn insert<'e>(
        db: impl PgExecutor<'e>,
        event_id: i64,
        participant_id: i64,
    ) -> sqlx::Result<Option<Registration>> {
        sqlx::query_as::<_, Registration>(
            r#"
            INSERT INTO registrations (event_id, participant_id)
            VALUES ($1, $2)
            ON CONFLICT (event_id, participant_id) DO NOTHING
            RETURNING id, event_id, participant_id, created_at
            "#,
        )
        .bind(event_id)
        .bind(participant_id)
        .fetch_optional(db)
        .await
    }
}
