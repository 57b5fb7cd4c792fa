use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::repo_types::{Student, StudentSkill};
use crate::{
    auth::repo_types::UserSummary,
    error::{AppError, AppResult},
    form::{FileRefInput, FormData},
    storage,
};

/// One entry of the `skills` JSON array.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SkillInput {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub years_of_experience: Option<i32>,
}

/// Student fields as submitted; every field optional at this stage.
#[derive(Debug, Clone)]
pub struct StudentForm {
    pub user_id: Option<i64>,
    pub name: Option<String>,
    pub registration_number: Option<String>,
    pub course: Option<String>,
    pub faculty: Option<String>,
    pub enrollment_year: Option<i32>,
    pub graduated: Option<bool>,
    pub skills: Option<Vec<SkillInput>>,
    pub photo: FileRefInput,
}

impl StudentForm {
    pub fn from_form(form: &FormData) -> AppResult<Self> {
        Ok(Self {
            user_id: form.parse("userId")?,
            name: form.string("name"),
            registration_number: form.string("registrationNumber"),
            course: form.string("course"),
            faculty: form.string("faculty"),
            enrollment_year: form.parse("enrollmentYear")?,
            graduated: form.flag("graduated")?,
            skills: form.json("skills")?,
            photo: FileRefInput::from_form(form, "photo"),
        })
    }

    /// Checks the fields a new profile needs.
    pub fn into_new(self) -> AppResult<NewStudent> {
        fn required<T>(v: Option<T>, field: &str) -> AppResult<T> {
            v.ok_or_else(|| AppError::bad_request(format!("{} is required", field)))
        }
        Ok(NewStudent {
            user_id: required(self.user_id, "userId")?,
            name: required(self.name, "name")?,
            registration_number: required(self.registration_number, "registrationNumber")?,
            course: required(self.course, "course")?,
            faculty: required(self.faculty, "faculty")?,
            enrollment_year: required(self.enrollment_year, "enrollmentYear")?,
            graduated: self.graduated.unwrap_or(false),
            skills: self.skills.unwrap_or_default(),
            photo: self.photo,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub user_id: i64,
    pub name: String,
    pub registration_number: String,
    pub course: String,
    pub faculty: String,
    pub enrollment_year: i32,
    pub graduated: bool,
    pub skills: Vec<SkillInput>,
    pub photo: FileRefInput,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillRequest {
    pub name: Option<String>,
    pub years_of_experience: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillView {
    pub id: i64,
    pub name: String,
    pub years_of_experience: i32,
}

impl From<StudentSkill> for SkillView {
    fn from(s: StudentSkill) -> Self {
        Self {
            id: s.id,
            name: s.name,
            years_of_experience: s.years_of_experience,
        }
    }
}

/// Student joined with skills and the restricted user projection.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentView {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub registration_number: String,
    pub course: String,
    pub faculty: String,
    pub enrollment_year: i32,
    pub graduated: bool,
    pub photo: Option<String>,
    pub photo_url: Option<String>,
    pub skills: Vec<SkillView>,
    pub user: Option<UserSummary>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl StudentView {
    pub fn assemble(s: Student, skills: Vec<StudentSkill>, user: Option<UserSummary>) -> Self {
        Self {
            id: s.id,
            user_id: s.user_id,
            name: s.name,
            registration_number: s.registration_number,
            course: s.course,
            faculty: s.faculty,
            enrollment_year: s.enrollment_year,
            graduated: s.graduated,
            photo_url: s.photo.as_deref().map(storage::public_url),
            photo: s.photo,
            skills: skills.into_iter().map(SkillView::from).collect(),
            user,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jane() -> FormData {
        let mut f = FormData::default();
        for (k, v) in [
            ("userId", "1"),
            ("name", "Jane Doe"),
            ("registrationNumber", "STU1"),
            ("course", "CS"),
            ("faculty", "Eng"),
            ("enrollmentYear", "2020"),
            ("skills", r#"[{"name":"React","yearsOfExperience":3}]"#),
        ] {
            f.push_text(k, v);
        }
        f
    }

    #[test]
    fn parses_full_create_form() {
        let new = StudentForm::from_form(&jane()).unwrap().into_new().unwrap();
        assert_eq!(new.user_id, 1);
        assert_eq!(new.registration_number, "STU1");
        assert_eq!(new.enrollment_year, 2020);
        assert!(!new.graduated);
        assert_eq!(
            new.skills,
            vec![SkillInput {
                id: None,
                name: Some("React".into()),
                years_of_experience: Some(3)
            }]
        );
        assert_eq!(new.photo, FileRefInput::Unchanged);
    }

    #[test]
    fn missing_required_field_is_bad_request() {
        let mut f = jane();
        f.push_text("course", "  ");
        match StudentForm::from_form(&f).unwrap().into_new() {
            Err(AppError::BadRequest(msg)) => assert_eq!(msg, "course is required"),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn malformed_skills_json_is_rejected_at_boundary() {
        let mut f = jane();
        f.push_text("skills", r#"[{"name":"React","yearsOfExperience":"three"}]"#);
        assert!(matches!(
            StudentForm::from_form(&f),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn update_form_may_be_partial() {
        let mut f = FormData::default();
        f.push_text("skills", r#"[{"id":5,"name":"React","yearsOfExperience":4}]"#);
        f.push_text("photo", "null");
        let form = StudentForm::from_form(&f).unwrap();
        assert!(form.name.is_none());
        assert_eq!(form.skills.unwrap()[0].id, Some(5));
        assert_eq!(form.photo, FileRefInput::Remove);
    }
}
