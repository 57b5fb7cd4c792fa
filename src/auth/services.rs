use std::collections::HashMap;
use std::sync::Mutex;

use lazy_static::lazy_static;
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tracing::{error, info, instrument, warn};

use crate::{
    audit::{self, AuditAction, AuditEntry},
    auth::{
        claims::TokenKind,
        dto::{AccessTokenResponse, AuthResponse, RegisterRequest},
        extractors::ClientMeta,
        jwt::JwtKeys,
        password::{hash_password, verify_password},
        repo::NewUser,
        repo_types::User,
        tokens::{EmailVerificationToken, PasswordResetToken},
    },
    error::{AppError, AppResult},
    mailer,
    state::AppState,
};

pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn is_valid_username(username: &str) -> bool {
    lazy_static! {
        static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.-]{3,32}$").unwrap();
    }
    USERNAME_RE.is_match(username)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_password_strength(password: &str) -> AppResult<()> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

fn hash(state: &AppState, plain: &str) -> AppResult<String> {
    hash_password(plain, state.config.password_hash_cost).map_err(AppError::Internal)
}

/// Hash verified against when the email is unknown, built with the same
/// cost as real hashes so both paths take the same time.
fn dummy_hash(cost: u32) -> String {
    lazy_static! {
        static ref DUMMY_HASHES: Mutex<HashMap<u32, String>> = Mutex::new(HashMap::new());
    }
    let mut hashes = DUMMY_HASHES.lock().unwrap_or_else(|p| p.into_inner());
    hashes
        .entry(cost)
        .or_insert_with(|| hash_password("dummy-password", cost).unwrap_or_default())
        .clone()
}

/// Decides a login attempt against whatever the store returned for the
/// email. Missing users and wrong passwords produce the same error.
pub(crate) fn check_credentials(user: Option<User>, password: &str, cost: u32) -> AppResult<User> {
    let Some(user) = user else {
        let _ = verify_password(password, &dummy_hash(cost));
        return Err(AppError::InvalidCredentials);
    };
    match verify_password(password, &user.password_hash) {
        Ok(true) => Ok(user),
        Ok(false) => Err(AppError::InvalidCredentials),
        Err(e) => {
            error!(error = %e, user_id = user.id, "stored hash unreadable");
            Err(AppError::InvalidCredentials)
        }
    }
}

#[instrument(skip(state, password, client))]
pub async fn login(
    state: &AppState,
    email: &str,
    password: &str,
    client: &ClientMeta,
) -> AppResult<AuthResponse> {
    let email = normalize_email(email);
    let found = User::find_by_email(&state.db, &email).await?;
    let user = match check_credentials(found, password, state.config.password_hash_cost) {
        Ok(u) => u,
        Err(e) => {
            warn!(email = %email, "login rejected");
            audit::record(
                &state.db,
                AuditEntry::new(AuditAction::LoginFailed)
                    .client(client)
                    .meta(serde_json::json!({ "email": email })),
            )
            .await;
            return Err(e);
        }
    };

    let keys = JwtKeys::from(&state.config.jwt);
    let access_token = keys.sign_access(&user)?;
    let refresh_token = keys.sign_refresh(&user)?;

    audit::record(
        &state.db,
        AuditEntry::new(AuditAction::LoginSuccess).user(user.id).client(client),
    )
    .await;
    info!(user_id = user.id, "user logged in");
    Ok(AuthResponse {
        user,
        access_token,
        refresh_token,
    })
}

/// Signs a new access token for the user as currently stored. The
/// refresh token's own role claim is deliberately ignored.
pub(crate) fn reissue_access(keys: &JwtKeys, current: Option<User>) -> AppResult<String> {
    let user = current.ok_or(AppError::UserNotFound)?;
    keys.sign_access(&user)
}

#[instrument(skip(state, refresh_token))]
pub async fn refresh(state: &AppState, refresh_token: &str) -> AppResult<AccessTokenResponse> {
    let keys = JwtKeys::from(&state.config.jwt);
    let claims = keys.verify_kind(refresh_token, TokenKind::Refresh)?;
    let current = User::find_by_email(&state.db, &claims.email).await?;
    if let Some(u) = &current {
        if u.role != claims.role {
            info!(user_id = u.id, "role changed since refresh token was issued");
        }
    }
    let user_id = current.as_ref().map(|u| u.id);
    let access_token = reissue_access(&keys, current)?;
    info!(user_id, "access token reissued");
    Ok(AccessTokenResponse { access_token })
}

#[instrument(skip(state, req, client), fields(email = %req.email))]
pub async fn register(
    state: &AppState,
    mut req: RegisterRequest,
    client: &ClientMeta,
) -> AppResult<AuthResponse> {
    req.email = normalize_email(&req.email);
    req.username = req.username.trim().to_string();

    if !is_valid_email(&req.email) {
        return Err(AppError::bad_request("Invalid email"));
    }
    if !is_valid_username(&req.username) {
        return Err(AppError::bad_request(
            "Username must be 3-32 characters of letters, digits, '_', '.' or '-'",
        ));
    }
    check_password_strength(&req.password)?;

    if User::find_by_email(&state.db, &req.email).await?.is_some() {
        return Err(AppError::conflict("Email already registered"));
    }
    if User::find_by_username(&state.db, &req.username).await?.is_some() {
        return Err(AppError::conflict("Username already taken"));
    }

    let password_hash = hash(state, &req.password)?;
    // the unique constraints still catch a concurrent registration
    let user = User::create(
        &state.db,
        NewUser {
            email: &req.email,
            username: &req.username,
            password_hash: &password_hash,
            first_name: req.first_name.as_deref(),
            last_name: req.last_name.as_deref(),
        },
    )
    .await?;

    send_verification(state, &user).await;

    let keys = JwtKeys::from(&state.config.jwt);
    let access_token = keys.sign_access(&user)?;
    let refresh_token = keys.sign_refresh(&user)?;

    audit::record(
        &state.db,
        AuditEntry::new(AuditAction::Register).user(user.id).client(client),
    )
    .await;
    info!(user_id = user.id, "user registered");
    Ok(AuthResponse {
        user,
        access_token,
        refresh_token,
    })
}

/// Issues a verification token and mails it. Mail failures are logged.
pub async fn send_verification(state: &AppState, user: &User) {
    let ttl = Duration::hours(state.config.verify_token_ttl_hours);
    let token = match EmailVerificationToken::issue(&state.db, user.id, ttl).await {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, user_id = user.id, "could not issue verification token");
            return;
        }
    };
    let (subject, body) = mailer::verification_email(&state.config.client_url, &token.token);
    if let Err(e) = state.mailer.send(&user.email, &subject, &body).await {
        warn!(error = %e, user_id = user.id, "verification mail not sent");
    }
}

#[instrument(skip(state, user))]
pub async fn resend_verification(state: &AppState, user: &User) -> AppResult<()> {
    if user.is_verified {
        return Err(AppError::bad_request("Email already verified"));
    }
    EmailVerificationToken::delete_for_user(&state.db, user.id).await?;
    send_verification(state, user).await;
    Ok(())
}

#[instrument(skip(state, token))]
pub async fn verify_email(state: &AppState, token: &str) -> AppResult<()> {
    let mut tx = state.db.begin().await?;
    let record = EmailVerificationToken::find(&mut *tx, token)
        .await?
        .filter(|t| t.expires_at > OffsetDateTime::now_utc())
        .ok_or_else(|| AppError::bad_request("Invalid or expired verification token"))?;
    User::mark_verified(&mut *tx, record.user_id).await?;
    EmailVerificationToken::delete_for_user(&mut *tx, record.user_id).await?;
    tx.commit().await?;

    audit::record(
        &state.db,
        AuditEntry::new(AuditAction::EmailVerified).user(record.user_id),
    )
    .await;
    Ok(())
}

/// Never reveals whether the address is registered.
#[instrument(skip(state, client))]
pub async fn forgot_password(state: &AppState, email: &str, client: &ClientMeta) -> AppResult<()> {
    let email = normalize_email(email);
    let Some(user) = User::find_by_email(&state.db, &email).await? else {
        info!(email = %email, "password reset for unknown email ignored");
        return Ok(());
    };

    let ttl = Duration::minutes(state.config.reset_token_ttl_minutes);
    let token = PasswordResetToken::issue(&state.db, user.id, ttl).await?;
    let (subject, body) = mailer::reset_email(
        &state.config.client_url,
        &token.token,
        state.config.reset_token_ttl_minutes,
    );
    if let Err(e) = state.mailer.send(&user.email, &subject, &body).await {
        warn!(error = %e, user_id = user.id, "reset mail not sent");
    }

    audit::record(
        &state.db,
        AuditEntry::new(AuditAction::PasswordResetRequested)
            .user(user.id)
            .client(client),
    )
    .await;
    Ok(())
}

#[instrument(skip(state, token, new_password, client))]
pub async fn reset_password(
    state: &AppState,
    token: &str,
    new_password: &str,
    client: &ClientMeta,
) -> AppResult<()> {
    check_password_strength(new_password)?;
    let password_hash = hash(state, new_password)?;

    let mut tx = state.db.begin().await?;
    let record = PasswordResetToken::find_for_update(&mut *tx, token)
        .await?
        .filter(|t| t.is_redeemable(OffsetDateTime::now_utc()))
        .ok_or_else(|| AppError::bad_request("Invalid or expired reset token"))?;
    User::update_password(&mut *tx, record.user_id, &password_hash).await?;
    PasswordResetToken::mark_used(&mut *tx, record.id).await?;
    tx.commit().await?;

    audit::record(
        &state.db,
        AuditEntry::new(AuditAction::PasswordReset)
            .user(record.user_id)
            .client(client),
    )
    .await;
    info!(user_id = record.user_id, "password reset");
    Ok(())
}

#[instrument(skip(state, current_password, new_password, client))]
pub async fn change_password(
    state: &AppState,
    user_id: i64,
    current_password: &str,
    new_password: &str,
    client: &ClientMeta,
) -> AppResult<()> {
    let current = User::find_by_id(&state.db, user_id).await?;
    let user = check_credentials(current, current_password, state.config.password_hash_cost)?;
    check_password_strength(new_password)?;
    let password_hash = hash(state, new_password)?;
    User::update_password(&state.db, user.id, &password_hash).await?;

    audit::record(
        &state.db,
        AuditEntry::new(AuditAction::PasswordChanged)
            .user(user.id)
            .client(client),
    )
    .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        jwt::tests::{make_keys, user},
        repo_types::Role,
    };

    fn user_with_password(id: i64, password: &str) -> User {
        User {
            password_hash: hash_password(password, 1).unwrap(),
            ..user(id, Role::Ordinary)
        }
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("jane@example.com"));
        assert!(!is_valid_email("jane@"));
        assert!(!is_valid_email("jane example@x.io"));
        assert_eq!(normalize_email("  Jane@Example.COM "), "jane@example.com");
    }

    #[test]
    fn username_validation() {
        assert!(is_valid_username("jane_doe.99"));
        assert!(!is_valid_username("jd"));
        assert!(!is_valid_username("has space"));
        assert!(!is_valid_username(&"x".repeat(33)));
    }

    #[test]
    fn password_strength() {
        assert!(check_password_strength("12345678").is_ok());
        assert!(matches!(
            check_password_strength("short"),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn valid_credentials_yield_user() {
        let u = user_with_password(9, "correct horse");
        let got = check_credentials(Some(u), "correct horse", 1).unwrap();
        assert_eq!(got.id, 9);
    }

    #[test]
    fn unknown_email_and_wrong_password_are_indistinguishable() {
        let missing = check_credentials(None, "whatever", 1).unwrap_err();
        let wrong = check_credentials(Some(user_with_password(1, "right")), "wrong", 1).unwrap_err();
        assert!(matches!(missing, AppError::InvalidCredentials));
        assert!(matches!(wrong, AppError::InvalidCredentials));
        assert_eq!(missing.to_string(), wrong.to_string());
        assert_eq!(missing.status(), wrong.status());
    }

    #[test]
    fn unknown_email_hash_uses_configured_cost() {
        let cheap = dummy_hash(1);
        let costly = dummy_hash(3);
        assert!(cheap.contains("t=1"));
        assert!(costly.contains("t=3"));
        assert_eq!(dummy_hash(3), costly);
    }

    #[test]
    fn refresh_is_not_an_audited_action() {
        assert!(serde_json::from_str::<AuditAction>("\"TOKEN_REFRESH\"").is_err());
    }

    #[test]
    fn corrupt_stored_hash_is_invalid_credentials() {
        let u = User {
            password_hash: "garbage".into(),
            ..user(1, Role::Ordinary)
        };
        assert!(matches!(
            check_credentials(Some(u), "pw", 1),
            Err(AppError::InvalidCredentials)
        ));
    }

    #[test]
    fn login_tokens_carry_subject_and_type() {
        let keys = make_keys("s", "i", "a");
        let u = user(42, Role::Ordinary);
        let access = keys.verify(&keys.sign_access(&u).unwrap()).unwrap();
        let refresh = keys.verify(&keys.sign_refresh(&u).unwrap()).unwrap();
        assert_eq!(access.kind, TokenKind::Access);
        assert_eq!(refresh.kind, TokenKind::Refresh);
        assert_eq!(access.sub, 42);
        assert_eq!(refresh.sub, 42);
    }

    #[test]
    fn reissue_uses_current_role() {
        let keys = make_keys("s", "i", "a");
        let stale = user(5, Role::Ordinary);
        let refresh = keys.sign_refresh(&stale).unwrap();
        let claims = keys.verify_kind(&refresh, TokenKind::Refresh).unwrap();
        assert_eq!(claims.role, Role::Ordinary);

        // promoted after the refresh token was issued
        let promoted = user(5, Role::Admin);
        let access = reissue_access(&keys, Some(promoted)).unwrap();
        let access_claims = keys.verify_kind(&access, TokenKind::Access).unwrap();
        assert_eq!(access_claims.role, Role::Admin);
        assert_eq!(access_claims.sub, 5);
    }

    #[test]
    fn reissue_for_deleted_user_fails() {
        let keys = make_keys("s", "i", "a");
        assert!(matches!(
            reissue_access(&keys, None),
            Err(AppError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn refresh_rejects_access_token_before_touching_store() {
        let state = AppState::fake();
        let keys = JwtKeys::from(&state.config.jwt);
        let access = keys.sign_access(&user(1, Role::Ordinary)).unwrap();
        assert!(matches!(
            refresh(&state, &access).await,
            Err(AppError::InvalidTokenType)
        ));
        assert!(matches!(
            refresh(&state, "garbage").await,
            Err(AppError::InvalidToken)
        ));
    }
}
