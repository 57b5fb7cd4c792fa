use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{SkillRequest, SkillView, StudentForm, StudentView},
    services,
};
use crate::{
    auth::extractors::{AuthUser, ClientMeta},
    db::Pagination,
    error::{AppJson, AppResult},
    form::FormData,
    state::AppState,
};

pub fn student_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/students", post(create_student).get(list_students))
        .route(
            "/students/:id",
            get(get_student)
                .patch(update_student)
                .delete(delete_student),
        )
        .route("/students/by-user/:user_id", get(get_student_by_user))
        .route("/students/:id/skills", post(add_skill))
        .route(
            "/students/:id/skills/:skill_id",
            patch(update_skill).delete(delete_skill),
        )
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

async fn read_form(mp: Multipart) -> AppResult<(StudentForm, Option<crate::form::Upload>)> {
    let mut form = FormData::read(mp).await?;
    let photo = form.take_file("photo");
    Ok((StudentForm::from_form(&form)?, photo))
}

#[instrument(skip(state, client, mp), fields(actor = auth.id))]
pub async fn create_student(
    State(state): State<AppState>,
    auth: AuthUser,
    client: ClientMeta,
    mp: Multipart,
) -> AppResult<(StatusCode, Json<StudentView>)> {
    let (form, photo) = read_form(mp).await?;
    let view = services::create(&state, &auth, form, photo, &client).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[instrument(skip(state, client, mp), fields(actor = auth.id))]
pub async fn update_student(
    State(state): State<AppState>,
    auth: AuthUser,
    client: ClientMeta,
    Path(id): Path<i64>,
    mp: Multipart,
) -> AppResult<Json<StudentView>> {
    let (form, photo) = read_form(mp).await?;
    Ok(Json(
        services::update(&state, &auth, id, form, photo, &client).await?,
    ))
}

#[instrument(skip(state, client), fields(actor = auth.id))]
pub async fn delete_student(
    State(state): State<AppState>,
    auth: AuthUser,
    client: ClientMeta,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    services::remove(&state, &auth, id, &client).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, _auth))]
pub async fn list_students(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(page): Query<Pagination>,
) -> AppResult<Json<Vec<StudentView>>> {
    let (limit, offset) = page.clamped();
    Ok(Json(services::list(&state, limit, offset).await?))
}

#[instrument(skip(state, _auth))]
pub async fn get_student(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<i64>,
) -> AppResult<Json<StudentView>> {
    Ok(Json(services::get(&state, id).await?))
}

#[instrument(skip(state, _auth))]
pub async fn get_student_by_user(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(user_id): Path<i64>,
) -> AppResult<Json<StudentView>> {
    Ok(Json(services::get_by_user(&state, user_id).await?))
}

#[instrument(skip(state, payload), fields(actor = auth.id))]
pub async fn add_skill(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    AppJson(payload): AppJson<SkillRequest>,
) -> AppResult<(StatusCode, Json<SkillView>)> {
    let skill = services::add_skill(&state, &auth, id, payload).await?;
    Ok((StatusCode::CREATED, Json(skill)))
}

#[instrument(skip(state, payload), fields(actor = auth.id))]
pub async fn update_skill(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((id, skill_id)): Path<(i64, i64)>,
    AppJson(payload): AppJson<SkillRequest>,
) -> AppResult<Json<SkillView>> {
    Ok(Json(
        services::update_skill(&state, &auth, id, skill_id, payload).await?,
    ))
}

#[instrument(skip(state), fields(actor = auth.id))]
pub async fn delete_skill(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((id, skill_id)): Path<(i64, i64)>,
) -> AppResult<StatusCode> {
    services::delete_skill(&state, &auth, id, skill_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
