use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;
use crate::services::auth::{AuthService, Session};
use crate::AppState;

/// Extractor for the authenticated caller.
///
/// Expects `Authorization: Bearer <token>` with a token issued by the hosted
/// auth provider.
pub struct AuthUser(pub Session);

fn bearer_token(parts: &Parts) -> Result<&str, AppError> {
    let auth_header = parts
        .headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!("Missing or invalid Authorization header");
            AppError::Unauthorized
        })?;

    if auth_header.len() < 7 || !auth_header[..7].eq_ignore_ascii_case("bearer ") {
        tracing::debug!("Authorization header doesn't start with 'Bearer '");
        return Err(AppError::Unauthorized);
    }

    let token = auth_header[7..].trim();
    if token.is_empty() {
        tracing::debug!("Empty bearer token in Authorization header");
        return Err(AppError::Unauthorized);
    }
    Ok(token)
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;

        let session = AuthService::session_from_token(&state.config.jwt, token).map_err(|e| {
            tracing::debug!("Rejected bearer token: {:?}", e);
            e
        })?;

        tracing::debug!("Authenticated user: {}", session.user_id);
        Ok(AuthUser(session))
    }
}

/// Like [`AuthUser`] but yields `None` instead of rejecting when no
/// Authorization header is present.
pub struct MaybeAuthUser(pub Option<Session>);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if !parts.headers.contains_key(http::header::AUTHORIZATION) {
            return Ok(MaybeAuthUser(None));
        }
        let AuthUser(session) = AuthUser::from_request_parts(parts, state).await?;
        Ok(MaybeAuthUser(Some(session)))
    }
}
