use axum::{
    extract::{Path, Query, State},
    routing::{get, patch},
    Json, Router,
};
use tracing::{info, instrument};

use super::dto::{UpdateRoleRequest, UpdateUserRequest};
use crate::{
    audit::{self, AuditAction, AuditEntry},
    auth::{
        extractors::{AdminUser, AuthUser, ClientMeta},
        repo_types::User,
        services::is_valid_username,
    },
    db::Pagination,
    error::{AppError, AppJson, AppResult},
    state::AppState,
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/:id", get(get_user).patch(update_user))
        .route("/users/:id/role", patch(update_role))
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(page): Query<Pagination>,
) -> AppResult<Json<Vec<User>>> {
    let (limit, offset) = page.clamped();
    Ok(Json(User::list(&state.db, limit, offset).await?))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> AppResult<Json<User>> {
    auth.ensure_can_act_for(id)?;
    let user = User::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("User with id {} not found", id)))?;
    Ok(Json(user))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    AppJson(payload): AppJson<UpdateUserRequest>,
) -> AppResult<Json<User>> {
    auth.ensure_can_act_for(id)?;

    let username = payload.username.map(|u| u.trim().to_string());
    if let Some(u) = &username {
        if !is_valid_username(u) {
            return Err(AppError::bad_request("Invalid username"));
        }
        if let Some(other) = User::find_by_username(&state.db, u).await? {
            if other.id != id {
                return Err(AppError::conflict("Username already taken"));
            }
        }
    }

    let user = User::update_profile(
        &state.db,
        id,
        username.as_deref(),
        payload.first_name.as_deref(),
        payload.last_name.as_deref(),
    )
    .await?
    .ok_or_else(|| AppError::not_found(format!("User with id {} not found", id)))?;
    Ok(Json(user))
}

#[instrument(skip(state, client))]
pub async fn update_role(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    client: ClientMeta,
    Path(id): Path<i64>,
    AppJson(payload): AppJson<UpdateRoleRequest>,
) -> AppResult<Json<User>> {
    let user = User::update_role(&state.db, id, payload.role)
        .await?
        .ok_or_else(|| AppError::not_found(format!("User with id {} not found", id)))?;

    audit::record(
        &state.db,
        AuditEntry::new(AuditAction::RoleChanged)
            .user(admin.id)
            .client(&client)
            .meta(serde_json::json!({ "targetUserId": id, "role": payload.role })),
    )
    .await;
    info!(target_user = id, role = ?payload.role, "role changed");
    Ok(Json(user))
}
