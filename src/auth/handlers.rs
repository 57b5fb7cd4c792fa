use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            AccessTokenResponse, AuthResponse, ChangePasswordRequest, ForgotPasswordRequest,
            LoginRequest, MessageResponse, RefreshRequest, RegisterRequest, ResetPasswordRequest,
            TokenRequest,
        },
        extractors::{AuthUser, ClientMeta},
        repo_types::User,
        services,
    },
    error::{AppError, AppJson, AppResult},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/me", get(get_me))
        .route("/auth/verify-email", post(verify_email))
        .route("/auth/resend-verification", post(resend_verification))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/change-password", post(change_password))
}

#[instrument(skip(state, payload, client))]
pub async fn register(
    State(state): State<AppState>,
    client: ClientMeta,
    AppJson(payload): AppJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let res = services::register(&state, payload, &client).await?;
    Ok((StatusCode::CREATED, Json(res)))
}

#[instrument(skip(state, payload, client))]
pub async fn login(
    State(state): State<AppState>,
    client: ClientMeta,
    AppJson(payload): AppJson<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let res = services::login(&state, &payload.email, &payload.password, &client).await?;
    Ok(Json(res))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RefreshRequest>,
) -> AppResult<Json<AccessTokenResponse>> {
    Ok(Json(services::refresh(&state, &payload.refresh_token).await?))
}

pub(crate) async fn load_current(state: &AppState, auth: &AuthUser) -> AppResult<User> {
    User::find_by_id(&state.db, auth.id)
        .await?
        .ok_or(AppError::UserNotFound)
}

#[instrument(skip(state))]
pub async fn get_me(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<User>> {
    Ok(Json(load_current(&state, &auth).await?))
}

#[instrument(skip(state, payload))]
pub async fn verify_email(
    State(state): State<AppState>,
    AppJson(payload): AppJson<TokenRequest>,
) -> AppResult<Json<MessageResponse>> {
    services::verify_email(&state, &payload.token).await?;
    Ok(Json(MessageResponse::new("Email verified")))
}

#[instrument(skip(state))]
pub async fn resend_verification(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<MessageResponse>> {
    let user = load_current(&state, &auth).await?;
    services::resend_verification(&state, &user).await?;
    Ok(Json(MessageResponse::new("Verification email sent")))
}

#[instrument(skip(state, payload, client))]
pub async fn forgot_password(
    State(state): State<AppState>,
    client: ClientMeta,
    AppJson(payload): AppJson<ForgotPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    services::forgot_password(&state, &payload.email, &client).await?;
    Ok(Json(MessageResponse::new(
        "If that email is registered, a reset link has been sent",
    )))
}

#[instrument(skip(state, payload, client))]
pub async fn reset_password(
    State(state): State<AppState>,
    client: ClientMeta,
    AppJson(payload): AppJson<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    services::reset_password(&state, &payload.token, &payload.new_password, &client).await?;
    Ok(Json(MessageResponse::new("Password has been reset")))
}

#[instrument(skip(state, payload, client))]
pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthUser,
    client: ClientMeta,
    AppJson(payload): AppJson<ChangePasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    services::change_password(
        &state,
        auth.id,
        &payload.current_password,
        &payload.new_password,
        &client,
    )
    .await?;
    Ok(Json(MessageResponse::new("Password changed")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_response_serialization() {
        let response = AuthResponse {
            user: crate::auth::jwt::tests::user(1, crate::auth::repo_types::Role::Ordinary),
            access_token: "a".into(),
            refresh_token: "r".into(),
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["accessToken"], "a");
        assert_eq!(json["refreshToken"], "r");
        assert_eq!(json["user"]["email"], "user1@example.com");
        assert_eq!(json["user"]["role"], "ORDINARY");
        assert!(json["user"].get("passwordHash").is_none());
        assert!(json["user"].get("password_hash").is_none());
    }
}
