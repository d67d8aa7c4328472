//! Login endpoint.
//!
//! Two independent guards run before the password check: the per-IP rate
//! limiter and the per-identity lockout. The response never reveals whether
//! the username or the password was wrong, and unknown usernames burn a
//! dummy hash verification so timing stays flat.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;

use super::{
    audit::{self, AuditAction, RequestMeta},
    cookies,
    error::{AuthError, FieldError},
    password,
    rate_limit::{RateLimitAction, RateLimitDecision},
    state::AuthState,
    storage,
    types::{LoginRequest, ProfileResponse},
    utils::{extract_client_ip, generate_csrf_token, normalize_email},
};

fn lockout_retry_after(locked_until: chrono::DateTime<Utc>) -> u64 {
    u64::try_from((locked_until - Utc::now()).num_seconds().max(0)).unwrap_or(0)
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Credentials accepted; token pair attached via cookies", body = ProfileResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 401, description = "Invalid credentials", body = String),
        (status = 403, description = "Account locked", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<Response, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation(vec![FieldError::new(
            "body",
            "Missing or malformed JSON payload.",
        )]));
    };
    if request.username.trim().is_empty() || request.password.is_empty() {
        return Err(AuthError::Validation(vec![FieldError::new(
            "body",
            "Username and password are required.",
        )]));
    }

    let client_ip = extract_client_ip(&headers);
    if let RateLimitDecision::Limited {
        retry_after_seconds,
    } = state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Login)
        .await
    {
        return Err(AuthError::RateLimited {
            retry_after_seconds,
        });
    }

    // Email identifiers are normalized the same way registration stored them.
    let identifier = if request.username.contains('@') {
        normalize_email(&request.username)
    } else {
        request.username.trim().to_string()
    };

    let Some(record) = storage::lookup_credentials(&pool, &identifier)
        .await
        .map_err(AuthError::Internal)?
    else {
        password::equalize_timing();
        return Err(AuthError::InvalidCredentials);
    };

    // Disabled accounts are indistinguishable from wrong credentials.
    if !record.is_active {
        password::equalize_timing();
        return Err(AuthError::InvalidCredentials);
    }

    // Lockout wins over password correctness until it elapses.
    if let Some(locked_until) = record.locked_until {
        if locked_until > Utc::now() {
            return Err(AuthError::AccountLocked {
                retry_after_seconds: lockout_retry_after(locked_until),
            });
        }
    }

    if !password::verify_password(&request.password, &record.password_hash) {
        // The attempt that crosses the threshold still answers with invalid
        // credentials; the lockout shows from the next attempt on.
        storage::record_login_failure(
            &pool,
            record.user_id,
            state.config().lockout_max_failures(),
            state.config().lockout_seconds(),
        )
        .await
        .map_err(AuthError::Internal)?;
        return Err(AuthError::InvalidCredentials);
    }

    storage::record_login_success(&pool, record.user_id, client_ip.as_deref())
        .await
        .map_err(AuthError::Internal)?;

    let meta = RequestMeta::from_headers(&headers);
    audit::record(
        &pool,
        Some(record.user_id),
        AuditAction::Login,
        "User",
        Some(&record.user_id.to_string()),
        &identifier,
        None,
        &meta,
    )
    .await;

    let pair = state
        .issuer()
        .issue_pair(record.user_id)
        .map_err(|err| AuthError::Internal(err.into()))?;
    let csrf_token = generate_csrf_token().map_err(AuthError::Internal)?;

    let profile = storage::fetch_profile(&pool, record.user_id)
        .await
        .map_err(AuthError::Internal)?
        .ok_or(AuthError::NotFound)?;

    let mut response_headers = HeaderMap::new();
    cookies::append_auth_cookies(
        &mut response_headers,
        state.config(),
        &pair.access_token,
        Some(&pair.refresh_token),
        &csrf_token,
    );

    Ok((
        StatusCode::OK,
        response_headers,
        Json(ProfileResponse::from(profile)),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockout_retry_after_counts_down() {
        let locked_until = Utc::now() + chrono::Duration::seconds(90);
        let retry = lockout_retry_after(locked_until);
        assert!((85..=90).contains(&retry));
    }

    #[test]
    fn elapsed_lockout_yields_zero() {
        let locked_until = Utc::now() - chrono::Duration::seconds(5);
        assert_eq!(lockout_retry_after(locked_until), 0);
    }
}
