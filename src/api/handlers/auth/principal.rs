//! Authenticated principal resolution.
//!
//! Per-request state machine: a verifying access cookie resolves directly;
//! an absent or failed access cookie falls through to the refresh cookie,
//! which (when valid) rotates and stages a replacement pair for the
//! response. Anything else rejects, and protected handlers answer 401 with
//! cleared cookies. Public endpoints never call into this module.

use axum::http::HeaderMap;
use sqlx::PgPool;
use uuid::Uuid;

use super::cookies::{self, ACCESS_COOKIE, CSRF_COOKIE, REFRESH_COOKIE};
use super::error::AuthError;
use super::session::{self, RotatedTokens};
use super::state::AuthState;
use super::storage::{self, UserRecord};
use super::tokens::TokenKind;

/// Identity context handed to downstream handlers.
#[derive(Clone, Debug)]
pub(super) struct Principal {
    pub(super) user_id: Uuid,
    pub(super) username: String,
    pub(super) is_staff: bool,
    pub(super) is_superuser: bool,
}

impl Principal {
    pub(super) fn from_user(user: &UserRecord) -> Self {
        Self {
            user_id: user.user_id,
            username: user.username.clone(),
            is_staff: user.is_staff,
            is_superuser: user.is_superuser,
        }
    }
}

/// A resolved identity plus any tokens staged during transparent refresh.
pub(super) struct Authenticated {
    pub(super) principal: Principal,
    refreshed: Option<RotatedTokens>,
}

impl Authenticated {
    /// Attach staged cookies to the response when the resolver rotated.
    pub(super) fn stage_cookies(&self, headers: &mut HeaderMap, state: &AuthState) {
        if let Some(rotated) = &self.refreshed {
            cookies::append_auth_cookies(
                headers,
                state.config(),
                &rotated.access_token,
                rotated.refresh_token.as_deref(),
                &rotated.csrf_token,
            );
        }
    }
}

/// Resolve the request cookies to an identity or reject.
pub(super) async fn require_auth(
    headers: &HeaderMap,
    pool: &PgPool,
    state: &AuthState,
) -> Result<Authenticated, AuthError> {
    let access = cookies::extract_cookie(headers, ACCESS_COOKIE);
    let refresh = cookies::extract_cookie(headers, REFRESH_COOKIE);

    if access.is_none() && refresh.is_none() {
        return Err(AuthError::TokenMissing);
    }

    if let Some(token) = access {
        if let Ok(claims) = state.issuer().verify(&token, TokenKind::Access) {
            let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::TokenInvalid)?;
            let Some(user) = storage::lookup_user(pool, user_id)
                .await
                .map_err(AuthError::Internal)?
            else {
                // Deleted or deactivated user; downstream sees anonymous.
                return Err(AuthError::Unauthorized);
            };
            return Ok(Authenticated {
                principal: Principal::from_user(&user),
                refreshed: None,
            });
        }
    }

    let Some(token) = refresh else {
        return Err(AuthError::TokenInvalid);
    };
    let rotated = session::rotate_refresh_token(pool, state, &token).await?;
    Ok(Authenticated {
        principal: rotated.principal.clone(),
        refreshed: Some(rotated),
    })
}

/// Double-submit CSRF check for state-changing authenticated requests: the
/// `X-CSRF-Token` header must match the non-HttpOnly CSRF cookie.
pub(super) fn require_csrf(headers: &HeaderMap) -> Result<(), AuthError> {
    let cookie = cookies::extract_cookie(headers, CSRF_COOKIE);
    let header = headers
        .get("x-csrf-token")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    match (cookie, header) {
        (Some(cookie), Some(header)) if cookie == header => Ok(()),
        _ => Err(AuthError::Unauthorized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(cookie: Option<&str>, header: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = cookie {
            headers.insert(
                axum::http::header::COOKIE,
                HeaderValue::from_str(&format!("csrf_token={cookie}")).expect("ascii"),
            );
        }
        if let Some(header) = header {
            headers.insert("x-csrf-token", HeaderValue::from_str(header).expect("ascii"));
        }
        headers
    }

    #[test]
    fn csrf_requires_matching_pair() {
        assert!(require_csrf(&headers_with(Some("tok"), Some("tok"))).is_ok());
        assert!(require_csrf(&headers_with(Some("tok"), Some("other"))).is_err());
        assert!(require_csrf(&headers_with(Some("tok"), None)).is_err());
        assert!(require_csrf(&headers_with(None, Some("tok"))).is_err());
        assert!(require_csrf(&headers_with(None, None)).is_err());
    }

    #[test]
    fn csrf_ignores_blank_header() {
        assert!(require_csrf(&headers_with(Some("tok"), Some("  "))).is_err());
    }
}
