//! Registration endpoint.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::{
    audit::{self, AuditAction, RequestMeta},
    cookies,
    error::{AuthError, FieldError},
    password,
    rate_limit::{RateLimitAction, RateLimitDecision},
    state::AuthState,
    storage::{self, NewUser, RegisterOutcome},
    types::{ProfileResponse, RegisterRequest},
    utils::{extract_client_ip, generate_csrf_token, normalize_email, valid_email, valid_username},
};

fn validate(request: &RegisterRequest, email: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if !valid_username(&request.username) {
        errors.push(FieldError::new(
            "username",
            "Username must be 3-150 characters of letters, digits, '.', '_' or '-'.",
        ));
    }
    if !valid_email(email) {
        errors.push(FieldError::new("email", "Enter a valid email address."));
    }
    for message in password::validate_strength(&request.password) {
        errors.push(FieldError::new("password", message));
    }
    if request.password != request.password_confirm {
        errors.push(FieldError::new("password_confirm", "Passwords do not match."));
    }
    if !request.gdpr_consent {
        errors.push(FieldError::new("gdpr_consent", "GDPR consent is required."));
    }
    errors
}

#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Identity created; token pair attached via cookies", body = ProfileResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn register(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<RegisterRequest>>,
) -> Result<Response, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation(vec![FieldError::new(
            "body",
            "Missing or malformed JSON payload.",
        )]));
    };

    // Rate-limit before any validation work; abuse stays cheap to reject.
    let client_ip = extract_client_ip(&headers);
    if let RateLimitDecision::Limited {
        retry_after_seconds,
    } = state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Register)
        .await
    {
        return Err(AuthError::RateLimited {
            retry_after_seconds,
        });
    }

    let email = normalize_email(&request.email);
    let errors = validate(&request, &email);
    if !errors.is_empty() {
        return Err(AuthError::Validation(errors));
    }

    let password_hash = password::hash_password(&request.password).map_err(AuthError::Internal)?;

    let meta = RequestMeta::from_headers(&headers);
    let new_user = NewUser {
        username: request.username.trim(),
        email: &email,
        password_hash: &password_hash,
        first_name: request.first_name.trim(),
        last_name: request.last_name.trim(),
        phone: request.phone.trim(),
        company: request.company.trim(),
        position: request.position.trim(),
        marketing_consent: request.marketing_consent,
        ip_address: meta.ip_address.as_deref(),
        user_agent: &meta.user_agent,
    };

    let user_id = match storage::insert_user_with_profile(&pool, &new_user)
        .await
        .map_err(AuthError::Internal)?
    {
        RegisterOutcome::Created(user_id) => user_id,
        RegisterOutcome::UsernameTaken => {
            return Err(AuthError::Validation(vec![FieldError::new(
                "username",
                "Username already exists.",
            )]));
        }
        RegisterOutcome::EmailTaken => {
            return Err(AuthError::Validation(vec![FieldError::new(
                "email",
                "User with this email already exists.",
            )]));
        }
    };

    audit::record(
        &pool,
        Some(user_id),
        AuditAction::Register,
        "User",
        Some(&user_id.to_string()),
        new_user.username,
        None,
        &meta,
    )
    .await;

    let pair = state
        .issuer()
        .issue_pair(user_id)
        .map_err(|err| AuthError::Internal(err.into()))?;
    let csrf_token = generate_csrf_token().map_err(AuthError::Internal)?;

    let profile = storage::fetch_profile(&pool, user_id)
        .await
        .map_err(AuthError::Internal)?
        .ok_or_else(|| {
            error!("Profile missing immediately after registration");
            AuthError::Internal(anyhow::anyhow!("registration left no profile row"))
        })?;

    let mut response_headers = HeaderMap::new();
    cookies::append_auth_cookies(
        &mut response_headers,
        state.config(),
        &pair.access_token,
        Some(&pair.refresh_token),
        &csrf_token,
    );

    Ok((
        StatusCode::CREATED,
        response_headers,
        Json(ProfileResponse::from(profile)),
    )
        .into_response())
}
