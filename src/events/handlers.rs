use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{EventForm, EventView},
    services,
};
use crate::{
    auth::extractors::{AdminUser, ClientMeta},
    db::Pagination,
    error::AppResult,
    form::{FormData, Upload},
    participants::repo_types::Participant,
    state::AppState,
};

pub fn event_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/event", get(list_events).post(create_event))
        .route(
            "/event/:id",
            get(get_event).patch(update_event).delete(delete_event),
        )
        .route("/event/:id/participants", get(list_event_participants))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

async fn read_form(mp: Multipart) -> AppResult<(EventForm, Option<Upload>)> {
    let mut form = FormData::read(mp).await?;
    let poster = form.take_file("poster");
    Ok((EventForm::from_form(&form)?, poster))
}

#[instrument(skip(state, client, mp))]
pub async fn create_event(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    client: ClientMeta,
    mp: Multipart,
) -> AppResult<(StatusCode, Json<EventView>)> {
    let (form, poster) = read_form(mp).await?;
    let view = services::create(&state, &admin, form, poster, &client).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[instrument(skip(state))]
pub async fn list_events(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> AppResult<Json<Vec<EventView>>> {
    let (limit, offset) = page.clamped();
    Ok(Json(services::list(&state, limit, offset).await?))
}

#[instrument(skip(state))]
pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<EventView>> {
    Ok(Json(services::get(&state, id).await?))
}

#[instrument(skip(state, client, mp))]
pub async fn update_event(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    client: ClientMeta,
    Path(id): Path<i64>,
    mp: Multipart,
) -> AppResult<Json<EventView>> {
    let (form, poster) = read_form(mp).await?;
    Ok(Json(
        services::update(&state, &admin, id, form, poster, &client).await?,
    ))
}

#[instrument(skip(state, client))]
pub async fn delete_event(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    client: ClientMeta,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    services::remove(&state, &admin, id, &client).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn list_event_participants(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<Participant>>> {
    services::load(&state, id).await?;
    Ok(Json(Participant::list_for_event(&state.db, id).await?))
}
