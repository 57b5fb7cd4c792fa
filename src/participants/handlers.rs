use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{RegisterParticipantRequest, RegistrationResponse},
    repo_types::Participant,
    services,
};
use crate::{
    auth::extractors::{AdminUser, ClientMeta},
    db::Pagination,
    error::{AppJson, AppResult},
    state::AppState,
};

pub fn participant_routes() -> Router<AppState> {
    Router::new()
        .route("/participant", get(list_participants))
        .route("/participant/register-participant", post(register_participant))
}

#[instrument(skip(state, payload, client))]
pub async fn register_participant(
    State(state): State<AppState>,
    client: ClientMeta,
    AppJson(payload): AppJson<RegisterParticipantRequest>,
) -> AppResult<(StatusCode, Json<RegistrationResponse>)> {
    let res = services::register(&state, payload, &client).await?;
    Ok((StatusCode::CREATED, Json(res)))
}

#[instrument(skip(state))]
pub async fn list_participants(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(page): Query<Pagination>,
) -> AppResult<Json<Vec<Participant>>> {
    let (limit, offset) = page.clamped();
    Ok(Json(Participant::list(&state.db, limit, offset).await?))
}
