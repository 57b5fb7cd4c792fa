use std::net::SocketAddr;

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRef, FromRequestParts},
    http::{header, request::Parts},
};

use super::{claims::TokenKind, jwt::JwtKeys, repo_types::Role};
use crate::error::AppError;

/// Caller identity from a verified access token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub email: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owners act on their own resources; admins on anyone's.
    pub fn ensure_can_act_for(&self, owner_id: i64) -> Result<(), AppError> {
        if self.is_admin() || self.id == owner_id {
            Ok(())
        } else {
            Err(AppError::forbidden("You may only manage your own resources"))
        }
    }
}

fn bearer(parts: &Parts) -> Result<&str, AppError> {
    let auth = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".into()))?;
    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Invalid Authorization header".into()))
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer(parts)?;
        let claims = JwtKeys::from_ref(state).verify_kind(token, TokenKind::Access)?;
        Ok(AuthUser {
            id: claims.sub,
            email: claims.email,
            role: claims.role,
        })
    }
}

/// [`AuthUser`] whose token carries the ADMIN role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(AppError::forbidden("Admin role required"));
        }
        Ok(AdminUser(user))
    }
}

/// Client address and user agent, recorded in audit rows.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientMeta {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string());
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .or(forwarded);
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(ClientMeta { ip, user_agent })
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;
    use crate::auth::jwt::tests::{make_keys, user};

    #[derive(Clone)]
    struct KeysOnly(JwtKeys);

    impl FromRef<KeysOnly> for JwtKeys {
        fn from_ref(s: &KeysOnly) -> Self {
            s.0.clone()
        }
    }

    fn parts_with(auth: Option<&str>) -> Parts {
        let mut b = Request::builder().uri("/x");
        if let Some(a) = auth {
            b = b.header(header::AUTHORIZATION, a);
        }
        b.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn accepts_access_token() {
        let keys = make_keys("s", "i", "a");
        let token = keys.sign_access(&user(3, Role::Ordinary)).unwrap();
        let mut parts = parts_with(Some(&format!("Bearer {}", token)));
        let u = AuthUser::from_request_parts(&mut parts, &KeysOnly(keys)).await.unwrap();
        assert_eq!(u.id, 3);
        assert!(!u.is_admin());
    }

    #[tokio::test]
    async fn rejects_missing_header_and_refresh_tokens() {
        let keys = make_keys("s", "i", "a");
        let state = KeysOnly(keys.clone());

        let mut parts = parts_with(None);
        assert!(matches!(
            AuthUser::from_request_parts(&mut parts, &state).await,
            Err(AppError::Unauthorized(_))
        ));

        let mut parts = parts_with(Some("Basic abc"));
        assert!(matches!(
            AuthUser::from_request_parts(&mut parts, &state).await,
            Err(AppError::Unauthorized(_))
        ));

        let refresh = keys.sign_refresh(&user(3, Role::Admin)).unwrap();
        let mut parts = parts_with(Some(&format!("Bearer {}", refresh)));
        assert!(matches!(
            AuthUser::from_request_parts(&mut parts, &state).await,
            Err(AppError::InvalidTokenType)
        ));
    }

    #[tokio::test]
    async fn admin_extractor_requires_admin_role() {
        let keys = make_keys("s", "i", "a");
        let state = KeysOnly(keys.clone());
        let ordinary = keys.sign_access(&user(1, Role::Ordinary)).unwrap();
        let mut parts = parts_with(Some(&format!("Bearer {}", ordinary)));
        assert!(matches!(
            AdminUser::from_request_parts(&mut parts, &state).await,
            Err(AppError::Forbidden(_))
        ));

        let admin = keys.sign_access(&user(2, Role::Admin)).unwrap();
        let mut parts = parts_with(Some(&format!("Bearer {}", admin)));
        let AdminUser(u) = AdminUser::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(u.id, 2);
    }

    #[test]
    fn ownership_check() {
        let owner = AuthUser { id: 5, email: "a@b.c".into(), role: Role::Ordinary };
        assert!(owner.ensure_can_act_for(5).is_ok());
        assert!(owner.ensure_can_act_for(6).is_err());
        let admin = AuthUser { role: Role::Admin, ..owner };
        assert!(admin.ensure_can_act_for(6).is_ok());
    }

    #[tokio::test]
    async fn client_meta_reads_forwarded_for_and_agent() {
        let mut parts = Request::builder()
            .header("x-forwarded-for", "10.0.0.1, 10.0.0.2")
            .header(header::USER_AGENT, "curl/8")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        let meta = ClientMeta::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(meta.ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(meta.user_agent.as_deref(), Some("curl/8"));
    }
}
