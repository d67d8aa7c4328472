//! Refresh/rotation protocol and logout.
//!
//! The refresh endpoint reads the refresh token from its cookie only; a
//! token in the request body is ignored by construction since no body is
//! parsed. Response bodies never echo token values.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use super::{
    audit::{self, AuditAction, RequestMeta},
    cookies::{self, REFRESH_COOKIE},
    error::AuthError,
    principal::Principal,
    state::AuthState,
    storage,
    tokens::TokenKind,
    types::MessageResponse,
    utils::generate_csrf_token,
};

/// Result of consuming a refresh token. `refresh_token` is `None` when
/// rotation is disabled and the presented cookie stays valid.
pub(super) struct RotatedTokens {
    pub(super) access_token: String,
    pub(super) refresh_token: Option<String>,
    pub(super) csrf_token: String,
    pub(super) principal: Principal,
}

/// Exchange a refresh token for a new access (and rotated refresh) token.
///
/// The denylist check-and-insert runs before any token is issued, so two
/// concurrent rotations of the same token produce exactly one winner.
pub(super) async fn rotate_refresh_token(
    pool: &PgPool,
    state: &AuthState,
    raw_token: &str,
) -> Result<RotatedTokens, AuthError> {
    let claims = state
        .issuer()
        .verify(raw_token, TokenKind::Refresh)
        .map_err(|_| AuthError::TokenInvalid)?;

    let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::TokenInvalid)?;
    let jti = Uuid::parse_str(&claims.jti).map_err(|_| AuthError::TokenInvalid)?;
    let expires_at = chrono::DateTime::from_timestamp(claims.exp, 0).ok_or(AuthError::TokenInvalid)?;

    if state.config().rotation_enabled() {
        let consumed = storage::deny_refresh_token(pool, jti, user_id, expires_at)
            .await
            .map_err(AuthError::Internal)?;
        if !consumed {
            // Already rotated or revoked; a replayed token never mints again.
            return Err(AuthError::TokenInvalid);
        }
    } else if storage::is_refresh_denied(pool, jti)
        .await
        .map_err(AuthError::Internal)?
    {
        return Err(AuthError::TokenInvalid);
    }

    let Some(user) = storage::lookup_user(pool, user_id)
        .await
        .map_err(AuthError::Internal)?
    else {
        // Deleted or deactivated subject; indistinguishable from a bad token.
        return Err(AuthError::TokenInvalid);
    };

    let csrf_token = generate_csrf_token().map_err(AuthError::Internal)?;
    let principal = Principal::from_user(&user);

    if state.config().rotation_enabled() {
        let pair = state
            .issuer()
            .issue_pair(user_id)
            .map_err(|err| AuthError::Internal(err.into()))?;
        Ok(RotatedTokens {
            access_token: pair.access_token,
            refresh_token: Some(pair.refresh_token),
            csrf_token,
            principal,
        })
    } else {
        let access_token = state
            .issuer()
            .issue_access(user_id)
            .map_err(|err| AuthError::Internal(err.into()))?;
        Ok(RotatedTokens {
            access_token,
            refresh_token: None,
            csrf_token,
            principal,
        })
    }
}

#[utoipa::path(
    post,
    path = "/auth/token/refresh",
    responses(
        (status = 200, description = "New token pair attached via cookies", body = MessageResponse),
        (status = 401, description = "Missing, invalid, or revoked refresh token", body = String)
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
) -> Response {
    let Some(raw_token) = cookies::extract_cookie(&headers, REFRESH_COOKIE) else {
        return AuthError::TokenMissing.with_cleared_cookies(state.config());
    };

    match rotate_refresh_token(&pool, &state, &raw_token).await {
        Ok(rotated) => {
            let meta = RequestMeta::from_headers(&headers);
            audit::record(
                &pool,
                Some(rotated.principal.user_id),
                AuditAction::TokenRefresh,
                "User",
                Some(&rotated.principal.user_id.to_string()),
                &rotated.principal.username,
                None,
                &meta,
            )
            .await;

            let mut response_headers = HeaderMap::new();
            cookies::append_auth_cookies(
                &mut response_headers,
                state.config(),
                &rotated.access_token,
                rotated.refresh_token.as_deref(),
                &rotated.csrf_token,
            );
            (
                StatusCode::OK,
                response_headers,
                Json(MessageResponse::new("Token refreshed")),
            )
                .into_response()
        }
        // Clear cookies on every failure so clients shed stale tokens.
        Err(err) => err.with_cleared_cookies(state.config()),
    }
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 204, description = "Refresh token revoked and cookies cleared")
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
) -> Response {
    // Best-effort actor resolution for the audit entry; logout succeeds
    // regardless of token state.
    let actor = cookies::extract_cookie(&headers, cookies::ACCESS_COOKIE)
        .and_then(|token| state.issuer().verify(&token, TokenKind::Access).ok())
        .and_then(|claims| Uuid::parse_str(&claims.sub).ok());

    if let Some(raw_token) = cookies::extract_cookie(&headers, REFRESH_COOKIE) {
        if let Ok(claims) = state.issuer().verify(&raw_token, TokenKind::Refresh) {
            if let (Ok(jti), Ok(user_id), Some(expires_at)) = (
                Uuid::parse_str(&claims.jti),
                Uuid::parse_str(&claims.sub),
                chrono::DateTime::from_timestamp(claims.exp, 0),
            ) {
                if let Err(err) = storage::deny_refresh_token(&pool, jti, user_id, expires_at).await
                {
                    error!("Failed to revoke refresh token on logout: {err}");
                }
            }
        }
    }

    let meta = RequestMeta::from_headers(&headers);
    audit::record(
        &pool,
        actor,
        AuditAction::Logout,
        "User",
        actor.map(|id| id.to_string()).as_deref(),
        "",
        None,
        &meta,
    )
    .await;

    // Always clear the cookies, even when no valid token was presented.
    let mut response_headers = HeaderMap::new();
    cookies::append_cleared_cookies(&mut response_headers, state.config());
    (StatusCode::NO_CONTENT, response_headers).into_response()
}
