use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;

/// Student profile row; at most one per user.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub registration_number: String,
    pub course: String,
    pub faculty: String,
    pub enrollment_year: i32,
    pub graduated: bool,
    pub photo: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Unique per `(student_id, name)`.
#[derive(Debug, Clone, Serialize, FromRow, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StudentSkill {
    pub id: i64,
    pub student_id: i64,
    pub name: String,
    pub years_of_experience: i32,
}
