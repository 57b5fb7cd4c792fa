use std::collections::HashMap;

use sqlx::PgPool;
use tracing::{info, instrument, warn};

use super::{
    dto::{NewStudent, SkillInput, SkillRequest, SkillView, StudentForm, StudentView},
    reconcile::{plan_skill_sync, validate_new_skills, NewSkill, SkillPlan},
    repo::{self, InsertStudent, PatchStudent},
    repo_types::{Student, StudentSkill},
};
use crate::{
    audit::{self, AuditAction, AuditEntry},
    auth::{
        extractors::{AuthUser, ClientMeta},
        repo_types::{User, UserSummary},
    },
    error::{AppError, AppResult},
    form::Upload,
    state::AppState,
    storage,
};

fn student_not_found(id: i64) -> AppError {
    AppError::not_found(format!("Student with id {} not found", id))
}

pub(crate) async fn load(db: &PgPool, id: i64) -> AppResult<Student> {
    Student::find_by_id(db, id)
        .await?
        .ok_or_else(|| student_not_found(id))
}

async fn summary(db: &PgPool, user_id: i64) -> AppResult<Option<UserSummary>> {
    Ok(User::find_by_id(db, user_id).await?.as_ref().map(UserSummary::from))
}

async fn view(db: &PgPool, student: Student, skills: Vec<StudentSkill>) -> AppResult<StudentView> {
    let user = summary(db, student.user_id).await?;
    Ok(StudentView::assemble(student, skills, user))
}

async fn insert_with_skills(
    db: &PgPool,
    new: &NewStudent,
    photo: Option<&str>,
    skills: &[NewSkill],
) -> AppResult<(Student, Vec<StudentSkill>)> {
    let mut tx = db.begin().await?;
    let student = Student::insert(
        &mut *tx,
        InsertStudent {
            user_id: new.user_id,
            name: &new.name,
            registration_number: &new.registration_number,
            course: &new.course,
            faculty: &new.faculty,
            enrollment_year: new.enrollment_year,
            graduated: new.graduated,
            photo,
        },
    )
    .await?;
    StudentSkill::insert_many(&mut *tx, student.id, skills).await?;
    let skills = StudentSkill::list_for_student(&mut *tx, student.id).await?;
    tx.commit().await?;
    Ok((student, skills))
}

#[instrument(skip(state, form, photo, client), fields(actor = auth.id))]
pub async fn create(
    state: &AppState,
    auth: &AuthUser,
    form: StudentForm,
    photo: Option<Upload>,
    client: &ClientMeta,
) -> AppResult<StudentView> {
    let new = form.into_new()?;
    let skills = validate_new_skills(&new.skills)?;
    auth.ensure_can_act_for(new.user_id)?;

    let owner = User::find_by_id(&state.db, new.user_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("User with id {} not found", new.user_id)))?;
    if Student::find_by_user_id(&state.db, owner.id).await?.is_some() {
        return Err(AppError::conflict(format!(
            "User with id {} already has a student profile",
            owner.id
        )));
    }

    // a concurrent create for the same user still trips the unique user_id
    let (db, new, skills) = (&state.db, &new, &skills);
    let (student, skills) = storage::write_with_attachment(
        state.storage.as_ref(),
        "photo",
        None,
        photo,
        &new.photo,
        |reference| async move {
            insert_with_skills(db, new, reference.as_deref(), skills).await
        },
    )
    .await?;

    audit::record(
        &state.db,
        AuditEntry::new(AuditAction::StudentCreated)
            .user(auth.id)
            .client(client)
            .meta(serde_json::json!({ "studentId": student.id, "userId": owner.id })),
    )
    .await;
    info!(student_id = student.id, user_id = owner.id, "student profile created");
    Ok(StudentView::assemble(
        student,
        skills,
        Some(UserSummary::from(&owner)),
    ))
}

async fn apply_skill_plan(
    tx: &mut sqlx::PgConnection,
    student_id: i64,
    plan: &SkillPlan,
) -> AppResult<()> {
    StudentSkill::delete_many(&mut *tx, student_id, &plan.deletes).await?;
    for change in &plan.updates {
        StudentSkill::update(&mut *tx, student_id, change)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Skill with id {} not found", change.id)))?;
    }
    StudentSkill::insert_many(&mut *tx, student_id, &plan.inserts).await?;
    Ok(())
}

async fn update_with_skills(
    db: &PgPool,
    id: i64,
    form: &StudentForm,
    photo: Option<&str>,
) -> AppResult<(Student, Vec<StudentSkill>)> {
    let mut tx = db.begin().await?;
    let student = Student::update(
        &mut *tx,
        id,
        PatchStudent {
            name: form.name.as_deref(),
            registration_number: form.registration_number.as_deref(),
            course: form.course.as_deref(),
            faculty: form.faculty.as_deref(),
            enrollment_year: form.enrollment_year,
            graduated: form.graduated,
            photo,
        },
    )
    .await?;

    if let Some(incoming) = &form.skills {
        let current = StudentSkill::list_for_student(&mut *tx, id).await?;
        let plan = plan_skill_sync(&current, incoming)?;
        if !plan.is_empty() {
            apply_skill_plan(&mut tx, id, &plan).await?;
        }
        info!(
            student_id = id,
            updated = plan.updates.len(),
            inserted = plan.inserts.len(),
            deleted = plan.deletes.len(),
            "skills reconciled"
        );
    }
    let skills = StudentSkill::list_for_student(&mut *tx, id).await?;
    tx.commit().await?;
    Ok((student, skills))
}

#[instrument(skip(state, form, photo, client), fields(actor = auth.id))]
pub async fn update(
    state: &AppState,
    auth: &AuthUser,
    id: i64,
    form: StudentForm,
    photo: Option<Upload>,
    client: &ClientMeta,
) -> AppResult<StudentView> {
    let existing = load(&state.db, id).await?;
    auth.ensure_can_act_for(existing.user_id)?;
    if form.user_id.is_some_and(|u| u != existing.user_id) {
        return Err(AppError::bad_request("userId of a student profile cannot change"));
    }

    let (db, form) = (&state.db, &form);
    let (student, skills) = storage::write_with_attachment(
        state.storage.as_ref(),
        "photo",
        existing.photo.as_deref(),
        photo,
        &form.photo,
        |reference| async move { update_with_skills(db, id, form, reference.as_deref()).await },
    )
    .await?;

    audit::record(
        &state.db,
        AuditEntry::new(AuditAction::StudentUpdated)
            .user(auth.id)
            .client(client)
            .meta(serde_json::json!({ "studentId": id })),
    )
    .await;
    info!(student_id = id, "student profile updated");
    view(&state.db, student, skills).await
}

#[instrument(skip(state, client), fields(actor = auth.id))]
pub async fn remove(
    state: &AppState,
    auth: &AuthUser,
    id: i64,
    client: &ClientMeta,
) -> AppResult<()> {
    let student = load(&state.db, id).await?;
    auth.ensure_can_act_for(student.user_id)?;

    if !Student::delete(&state.db, id).await? {
        return Err(student_not_found(id));
    }
    if let Some(photo) = &student.photo {
        storage::discard(state.storage.as_ref(), photo).await;
    }

    audit::record(
        &state.db,
        AuditEntry::new(AuditAction::StudentDeleted)
            .user(auth.id)
            .client(client)
            .meta(serde_json::json!({ "studentId": id, "userId": student.user_id })),
    )
    .await;
    info!(student_id = id, "student profile deleted");
    Ok(())
}

pub async fn get(state: &AppState, id: i64) -> AppResult<StudentView> {
    let student = load(&state.db, id).await?;
    let skills = StudentSkill::list_for_student(&state.db, id).await?;
    view(&state.db, student, skills).await
}

pub async fn get_by_user(state: &AppState, user_id: i64) -> AppResult<StudentView> {
    let student = Student::find_by_user_id(&state.db, user_id)
        .await?
        .ok_or_else(|| {
            AppError::not_found(format!("User with id {} has no student profile", user_id))
        })?;
    let skills = StudentSkill::list_for_student(&state.db, student.id).await?;
    view(&state.db, student, skills).await
}

/// One query each for students, their skills and their users.
pub async fn list(state: &AppState, limit: i64, offset: i64) -> AppResult<Vec<StudentView>> {
    let students = Student::list(&state.db, limit, offset).await?;
    let student_ids: Vec<i64> = students.iter().map(|s| s.id).collect();
    let user_ids: Vec<i64> = students.iter().map(|s| s.user_id).collect();

    let mut skills: HashMap<i64, Vec<StudentSkill>> = HashMap::new();
    for skill in StudentSkill::list_for_students(&state.db, &student_ids).await? {
        skills.entry(skill.student_id).or_default().push(skill);
    }
    let users: HashMap<i64, UserSummary> = repo::user_summaries(&state.db, &user_ids)
        .await?
        .into_iter()
        .map(|u| (u.id, u))
        .collect();

    Ok(students
        .into_iter()
        .map(|s| {
            let own = skills.remove(&s.id).unwrap_or_default();
            let user = users.get(&s.user_id).cloned();
            StudentView::assemble(s, own, user)
        })
        .collect())
}

async fn owned(state: &AppState, auth: &AuthUser, student_id: i64) -> AppResult<Student> {
    let student = load(&state.db, student_id).await?;
    auth.ensure_can_act_for(student.user_id)?;
    Ok(student)
}

fn skill_not_found(id: i64) -> AppError {
    AppError::not_found(format!("Skill with id {} not found", id))
}

#[instrument(skip(state, req), fields(actor = auth.id))]
pub async fn add_skill(
    state: &AppState,
    auth: &AuthUser,
    student_id: i64,
    req: SkillRequest,
) -> AppResult<SkillView> {
    owned(state, auth, student_id).await?;
    let mut valid = validate_new_skills(&[SkillInput {
        id: None,
        name: req.name,
        years_of_experience: req.years_of_experience,
    }])?;
    let skill = valid.remove(0);

    let current = StudentSkill::list_for_student(&state.db, student_id).await?;
    if current.iter().any(|s| s.name == skill.name) {
        return Err(AppError::conflict(format!(
            "Skill {} already exists for this student",
            skill.name
        )));
    }
    let created = StudentSkill::insert_one(&state.db, student_id, &skill).await?;
    info!(student_id, skill_id = created.id, "skill added");
    Ok(created.into())
}

#[instrument(skip(state, req), fields(actor = auth.id))]
pub async fn update_skill(
    state: &AppState,
    auth: &AuthUser,
    student_id: i64,
    skill_id: i64,
    req: SkillRequest,
) -> AppResult<SkillView> {
    owned(state, auth, student_id).await?;
    let current = StudentSkill::list_for_student(&state.db, student_id).await?;
    if !current.iter().any(|s| s.id == skill_id) {
        return Err(skill_not_found(skill_id));
    }

    // every other skill is kept as is
    let incoming: Vec<SkillInput> = current
        .iter()
        .map(|s| {
            if s.id == skill_id {
                SkillInput {
                    id: Some(s.id),
                    name: req.name.clone(),
                    years_of_experience: req.years_of_experience,
                }
            } else {
                SkillInput {
                    id: Some(s.id),
                    ..Default::default()
                }
            }
        })
        .collect();
    let plan = plan_skill_sync(&current, &incoming)?;

    let updated = match plan.updates.first() {
        Some(change) => StudentSkill::update(&state.db, student_id, change)
            .await?
            .ok_or_else(|| skill_not_found(skill_id))?,
        None => StudentSkill::find(&state.db, student_id, skill_id)
            .await?
            .ok_or_else(|| skill_not_found(skill_id))?,
    };
    Ok(updated.into())
}

#[instrument(skip(state), fields(actor = auth.id))]
pub async fn delete_skill(
    state: &AppState,
    auth: &AuthUser,
    student_id: i64,
    skill_id: i64,
) -> AppResult<()> {
    owned(state, auth, student_id).await?;
    if StudentSkill::delete_many(&state.db, student_id, &[skill_id]).await? == 0 {
        warn!(student_id, skill_id, "skill to delete not found");
        return Err(skill_not_found(skill_id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo_types::Role;

    fn actor(id: i64, role: Role) -> AuthUser {
        AuthUser {
            id,
            email: "x@example.com".into(),
            role,
        }
    }

    fn jane_form(user_id: &str) -> StudentForm {
        let mut f = crate::form::FormData::default();
        for (k, v) in [
            ("userId", user_id),
            ("name", "Jane Doe"),
            ("registrationNumber", "STU1"),
            ("course", "CS"),
            ("faculty", "Eng"),
            ("enrollmentYear", "2020"),
            (
                "skills",
                r#"[{"name":"React","yearsOfExperience":3},{"name":"React","yearsOfExperience":1}]"#,
            ),
        ] {
            f.push_text(k, v);
        }
        StudentForm::from_form(&f).unwrap()
    }

    fn png() -> Upload {
        Upload {
            field: "photo".into(),
            file_name: Some("me.png".into()),
            content_type: "image/png".into(),
            body: bytes::Bytes::from_static(b"png"),
        }
    }

    #[tokio::test]
    async fn duplicate_skills_fail_before_any_io() {
        let state = AppState::fake();
        let err = create(
            &state,
            &actor(1, Role::Ordinary),
            jane_form("1"),
            Some(png()),
            &ClientMeta::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn cannot_create_profile_for_someone_else() {
        let state = AppState::fake();
        let mut form = jane_form("2");
        form.skills = None;
        let err = create(
            &state,
            &actor(1, Role::Ordinary),
            form,
            None,
            &ClientMeta::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }
}
