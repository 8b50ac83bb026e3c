use std::env;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::services::ForumContext;

/// JWT claims issued by the auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub session_id: Option<String>,
    #[serde(default)]
    pub member_id: Option<i64>,
    #[serde(default)]
    pub role: Option<String>,
    /// Forum-wide permissions granted by the token.
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
}

impl AuthClaims {
    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some("admin")
    }

    /// Fills the acting member and session into a request context.
    pub fn apply_to(&self, ctx: &mut ForumContext) {
        ctx.user_info.id = self.member_id.unwrap_or(0);
        ctx.user_info.is_guest = self.member_id.is_none();
        ctx.user_info.is_admin = self.is_admin();
        ctx.user_info.name = self.sub.clone();
        if let Some(permissions) = &self.permissions {
            ctx.user_info.permissions.extend(permissions.iter().cloned());
        }
        if let Some(session_id) = &self.session_id {
            ctx.session.set("session_id", session_id);
        }
    }
}

/// Rejection type returned when auth fails.
#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    MissingSecret,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        use axum::http::StatusCode;
        let (status, msg) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "missing bearer token"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid token"),
            AuthError::MissingSecret => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server jwt secret not configured",
            ),
        };
        (status, msg).into_response()
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthClaims
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(AuthError::MissingToken)?;
        let secret = env::var("JWT_SECRET").map_err(|_| AuthError::MissingSecret)?;

        let token_data = decode::<AuthClaims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| AuthError::InvalidToken)?;

        Ok(token_data.claims)
    }
}
