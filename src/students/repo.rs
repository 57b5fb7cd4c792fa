use sqlx::{PgExecutor, PgPool};

use super::{
    reconcile::{NewSkill, SkillUpdate},
    repo_types::{Student, StudentSkill},
};
use crate::auth::repo_types::UserSummary;

const STUDENT_COLUMNS: &str = "id, user_id, name, registration_number, course, faculty, \
                               enrollment_year, graduated, photo, created_at, updated_at";

pub struct InsertStudent<'a> {
    pub user_id: i64,
    pub name: &'a str,
    pub registration_number: &'a str,
    pub course: &'a str,
    pub faculty: &'a str,
    pub enrollment_year: i32,
    pub graduated: bool,
    pub photo: Option<&'a str>,
}

/// Scalar changes; `None` keeps the column. `photo` is always written.
pub struct PatchStudent<'a> {
    pub name: Option<&'a str>,
    pub registration_number: Option<&'a str>,
    pub course: Option<&'a str>,
    pub faculty: Option<&'a str>,
    pub enrollment_year: Option<i32>,
    pub graduated: Option<bool>,
    pub photo: Option<&'a str>,
}

impl Student {
    pub async fn find_by_id<'e>(db: impl PgExecutor<'e>, id: i64) -> sqlx::Result<Option<Student>> {
        sqlx::query_as::<_, Student>(&format!(
            "SELECT {STUDENT_COLUMNS} FROM students WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await
    }

    pub async fn find_by_user_id<'e>(
        db: impl PgExecutor<'e>,
        user_id: i64,
    ) -> sqlx::Result<Option<Student>> {
        sqlx::query_as::<_, Student>(&format!(
            "SELECT {STUDENT_COLUMNS} FROM students WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(db)
        .await
    }

    pub async fn list(db: &PgPool, limit: i64, offset: i64) -> sqlx::Result<Vec<Student>> {
        sqlx::query_as::<_, Student>(&format!(
            "SELECT {STUDENT_COLUMNS} FROM students ORDER BY id LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await
    }

    pub async fn insert<'e>(db: impl PgExecutor<'e>, new: InsertStudent<'_>) -> sqlx::Result<Student> {
        sqlx::query_as::<_, Student>(&format!(
            r#"
            INSERT INTO students
                (user_id, name, registration_number, course, faculty, enrollment_year, graduated, photo)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {STUDENT_COLUMNS}
            "#
        ))
        .bind(new.user_id)
        .bind(new.name)
        .bind(new.registration_number)
        .bind(new.course)
        .bind(new.faculty)
        .bind(new.enrollment_year)
        .bind(new.graduated)
        .bind(new.photo)
        .fetch_one(db)
        .await
    }

    pub async fn update<'e>(
        db: impl PgExecutor<'e>,
        id: i64,
        patch: PatchStudent<'_>,
    ) -> sqlx::Result<Student> {
        sqlx::query_as::<_, Student>(&format!(
            r#"
            UPDATE students
               SET name                = COALESCE($2, name),
                   registration_number = COALESCE($3, registration_number),
                   course              = COALESCE($4, course),
                   faculty             = COALESCE($5, faculty),
                   enrollment_year     = COALESCE($6, enrollment_year),
                   graduated           = COALESCE($7, graduated),
                   photo               = $8,
                   updated_at          = now()
             WHERE id = $1
            RETURNING {STUDENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(patch.name)
        .bind(patch.registration_number)
        .bind(patch.course)
        .bind(patch.faculty)
        .bind(patch.enrollment_year)
        .bind(patch.graduated)
        .bind(patch.photo)
        .fetch_one(db)
        .await
    }

    /// Skills go with the row through `ON DELETE CASCADE`.
    pub async fn delete(db: &PgPool, id: i64) -> sqlx::Result<bool> {
        let res = sqlx::query("DELETE FROM students WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

impl StudentSkill {
    pub async fn list_for_student<'e>(
        db: impl PgExecutor<'e>,
        student_id: i64,
    ) -> sqlx::Result<Vec<StudentSkill>> {
        sqlx::query_as::<_, StudentSkill>(
            r#"
            SELECT id, student_id, name, years_of_experience
              FROM student_skills
             WHERE student_id = $1
             ORDER BY id
            "#,
        )
        .bind(student_id)
        .fetch_all(db)
        .await
    }

    pub async fn list_for_students(
        db: &PgPool,
        student_ids: &[i64],
    ) -> sqlx::Result<Vec<StudentSkill>> {
        sqlx::query_as::<_, StudentSkill>(
            r#"
            SELECT id, student_id, name, years_of_experience
              FROM student_skills
             WHERE student_id = ANY($1)
             ORDER BY student_id, id
            "#,
        )
        .bind(student_ids)
        .fetch_all(db)
        .await
    }

    pub async fn find<'e>(
        db: impl PgExecutor<'e>,
        student_id: i64,
        id: i64,
    ) -> sqlx::Result<Option<StudentSkill>> {
        sqlx::query_as::<_, StudentSkill>(
            r#"
            SELECT id, student_id, name, years_of_experience
              FROM student_skills
             WHERE student_id = $1 AND id = $2
            "#,
        )
        .bind(student_id)
        .bind(id)
        .fetch_optional(db)
        .await
    }

    pub async fn insert_many<'e>(
        db: impl PgExecutor<'e>,
        student_id: i64,
        skills: &[NewSkill],
    ) -> sqlx::Result<()> {
        if skills.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = skills.iter().map(|s| s.name.as_str()).collect();
        let years: Vec<i32> = skills.iter().map(|s| s.years_of_experience).collect();
        sqlx::query(
            r#"
            INSERT INTO student_skills (student_id, name, years_of_experience)
            SELECT $1, t.name, t.years
              FROM UNNEST($2::text[], $3::int4[]) AS t(name, years)
            "#,
        )
        .bind(student_id)
        .bind(&names)
        .bind(&years)
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn insert_one<'e>(
        db: impl PgExecutor<'e>,
        student_id: i64,
        skill: &NewSkill,
    ) -> sqlx::Result<StudentSkill> {
        sqlx::query_as::<_, StudentSkill>(
            r#"
            INSERT INTO student_skills (student_id, name, years_of_experience)
            VALUES ($1, $2, $3)
            RETURNING id, student_id, name, years_of_experience
            "#,
        )
        .bind(student_id)
        .bind(&skill.name)
        .bind(skill.years_of_experience)
        .fetch_one(db)
        .await
    }

    pub async fn update<'e>(
        db: impl PgExecutor<'e>,
        student_id: i64,
        change: &SkillUpdate,
    ) -> sqlx::Result<Option<StudentSkill>> {
        sqlx::query_as::<_, StudentSkill>(
            r#"
            UPDATE student_skills
               SET name = $3, years_of_experience = $4
             WHERE student_id = $1 AND id = $2
            RETURNING id, student_id, name, years_of_experience
            "#,
        )
        .bind(student_id)
        .bind(change.id)
        .bind(&change.name)
        .bind(change.years_of_experience)
        .fetch_optional(db)
        .await
    }

    pub async fn delete_many<'e>(
        db: impl PgExecutor<'e>,
        student_id: i64,
        ids: &[i64],
    ) -> sqlx::Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let res = sqlx::query("DELETE FROM student_skills WHERE student_id = $1 AND id = ANY($2)")
            .bind(student_id)
            .bind(ids)
            .execute(db)
            .await?;
        Ok(res.rows_affected())
    }
}

/// Restricted user projection for the given ids.
pub async fn user_summaries(db: &PgPool, ids: &[i64]) -> sqlx::Result<Vec<UserSummary>> {
    sqlx::query_as::<_, UserSummary>("SELECT id, email, username FROM users WHERE id = ANY($1)")
        .bind(ids)
        .fetch_all(db)
        .await
}
