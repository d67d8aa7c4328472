//! Profile, password-change, and permissions endpoints.
//!
//! Mutating handlers check CSRF before resolving the identity so a doomed
//! request never consumes a refresh rotation. Once the resolver has rotated,
//! the staged cookies ride on every response, error or not, so the client
//! never loses the session it just refreshed.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

use super::{
    audit::{self, AuditAction, RequestMeta},
    cookies,
    error::{AuthError, FieldError},
    password, principal,
    state::AuthState,
    storage::{self, ProfileChanges, ProfileUpdateOutcome},
    types::{
        ChangePasswordRequest, MessageResponse, PermissionsResponse, ProfileResponse,
        ProfileUpdateRequest,
    },
    utils::{normalize_email, valid_email},
};

#[utoipa::path(
    get,
    path = "/auth/profile",
    responses(
        (status = 200, description = "Profile for the resolved identity", body = ProfileResponse),
        (status = 401, description = "Unauthorized", body = String)
    ),
    tag = "auth"
)]
pub async fn get_profile(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
) -> Response {
    let auth = match principal::require_auth(&headers, &pool, &state).await {
        Ok(auth) => auth,
        Err(err) => return err.with_cleared_cookies(state.config()),
    };
    let mut staged = HeaderMap::new();
    auth.stage_cookies(&mut staged, &state);

    let profile = match storage::fetch_profile(&pool, auth.principal.user_id).await {
        Ok(Some(profile)) => profile,
        Ok(None) => return (staged, AuthError::NotFound).into_response(),
        Err(err) => return (staged, AuthError::Internal(err)).into_response(),
    };

    (
        StatusCode::OK,
        staged,
        Json(ProfileResponse::from(profile)),
    )
        .into_response()
}

fn validate_update(request: &ProfileUpdateRequest) -> (ProfileChanges, Vec<FieldError>) {
    let mut errors = Vec::new();
    let email = request.email.as_deref().map(normalize_email);
    if let Some(email) = &email {
        if !valid_email(email) {
            errors.push(FieldError::new("email", "Enter a valid email address."));
        }
    }
    let changes = ProfileChanges {
        email,
        first_name: request.first_name.clone(),
        last_name: request.last_name.clone(),
        phone: request.phone.clone(),
        company: request.company.clone(),
        position: request.position.clone(),
        timezone: request.timezone.clone(),
        language: request.language.clone(),
        marketing_consent: request.marketing_consent,
    };
    (changes, errors)
}

#[utoipa::path(
    put,
    path = "/auth/profile",
    request_body = ProfileUpdateRequest,
    responses(
        (status = 200, description = "Updated profile", body = ProfileResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 401, description = "Unauthorized", body = String)
    ),
    tag = "auth"
)]
pub async fn update_profile(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<ProfileUpdateRequest>>,
) -> Response {
    if let Err(err) = principal::require_csrf(&headers) {
        return err.into_response();
    }
    let auth = match principal::require_auth(&headers, &pool, &state).await {
        Ok(auth) => auth,
        Err(err) => return err.with_cleared_cookies(state.config()),
    };
    let mut staged = HeaderMap::new();
    auth.stage_cookies(&mut staged, &state);

    let Some(Json(request)) = payload else {
        return (
            staged,
            AuthError::Validation(vec![FieldError::new(
                "body",
                "Missing or malformed JSON payload.",
            )]),
        )
            .into_response();
    };
    let (changes, errors) = validate_update(&request);
    if !errors.is_empty() {
        return (staged, AuthError::Validation(errors)).into_response();
    }

    // Snapshot the row first so the audit entry carries old and new state.
    let before = match storage::fetch_profile(&pool, auth.principal.user_id).await {
        Ok(Some(profile)) => ProfileResponse::from(profile),
        Ok(None) => return (staged, AuthError::NotFound).into_response(),
        Err(err) => return (staged, AuthError::Internal(err)).into_response(),
    };

    let updated = match storage::update_profile(&pool, auth.principal.user_id, &changes).await {
        Ok(ProfileUpdateOutcome::Updated(profile)) => ProfileResponse::from(profile),
        Ok(ProfileUpdateOutcome::EmailTaken) => {
            return (
                staged,
                AuthError::Validation(vec![FieldError::new(
                    "email",
                    "User with this email already exists.",
                )]),
            )
                .into_response();
        }
        Ok(ProfileUpdateOutcome::Missing) => {
            return (staged, AuthError::NotFound).into_response();
        }
        Err(err) => return (staged, AuthError::Internal(err)).into_response(),
    };

    let meta = RequestMeta::from_headers(&headers);
    let snapshot = match (serde_json::to_value(&before), serde_json::to_value(&updated)) {
        (Ok(old), Ok(new)) => Some(json!({"old": old, "new": new})),
        _ => None,
    };
    audit::record(
        &pool,
        Some(auth.principal.user_id),
        AuditAction::Update,
        "UserProfile",
        Some(&auth.principal.user_id.to_string()),
        &auth.principal.username,
        snapshot,
        &meta,
    )
    .await;

    (StatusCode::OK, staged, Json(updated)).into_response()
}

#[utoipa::path(
    post,
    path = "/auth/change-password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed; fresh token pair attached via cookies", body = MessageResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 401, description = "Unauthorized or wrong current password", body = String)
    ),
    tag = "auth"
)]
pub async fn change_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<ChangePasswordRequest>>,
) -> Response {
    if let Err(err) = principal::require_csrf(&headers) {
        return err.into_response();
    }
    let auth = match principal::require_auth(&headers, &pool, &state).await {
        Ok(auth) => auth,
        Err(err) => return err.with_cleared_cookies(state.config()),
    };
    let mut staged = HeaderMap::new();
    auth.stage_cookies(&mut staged, &state);

    let Some(Json(request)) = payload else {
        return (
            staged,
            AuthError::Validation(vec![FieldError::new(
                "body",
                "Missing or malformed JSON payload.",
            )]),
        )
            .into_response();
    };

    let mut errors: Vec<FieldError> = password::validate_strength(&request.new_password)
        .into_iter()
        .map(|message| FieldError::new("new_password", message))
        .collect();
    if request.new_password != request.confirm_password {
        errors.push(FieldError::new(
            "confirm_password",
            "New passwords do not match.",
        ));
    }
    if !errors.is_empty() {
        return (staged, AuthError::Validation(errors)).into_response();
    }

    let current_hash = match storage::fetch_password_hash(&pool, auth.principal.user_id).await {
        Ok(Some(hash)) => hash,
        Ok(None) => return (staged, AuthError::Unauthorized).into_response(),
        Err(err) => return (staged, AuthError::Internal(err)).into_response(),
    };
    if !password::verify_password(&request.current_password, &current_hash) {
        return (staged, AuthError::InvalidCredentials).into_response();
    }

    let new_hash = match password::hash_password(&request.new_password) {
        Ok(hash) => hash,
        Err(err) => return (staged, AuthError::Internal(err)).into_response(),
    };
    if let Err(err) = storage::update_password(&pool, auth.principal.user_id, &new_hash).await {
        return (staged, AuthError::Internal(err)).into_response();
    }

    // Revoke the refresh token that authenticated this session and reissue,
    // so pre-change cookies stop working.
    if let Some(raw_token) = cookies::extract_cookie(&headers, cookies::REFRESH_COOKIE) {
        if let Ok(claims) = state
            .issuer()
            .verify(&raw_token, super::tokens::TokenKind::Refresh)
        {
            if let (Ok(jti), Some(expires_at)) = (
                uuid::Uuid::parse_str(&claims.jti),
                chrono::DateTime::from_timestamp(claims.exp, 0),
            ) {
                let _ =
                    storage::deny_refresh_token(&pool, jti, auth.principal.user_id, expires_at)
                        .await;
            }
        }
    }

    let meta = RequestMeta::from_headers(&headers);
    audit::record(
        &pool,
        Some(auth.principal.user_id),
        AuditAction::PasswordChange,
        "User",
        Some(&auth.principal.user_id.to_string()),
        &auth.principal.username,
        None,
        &meta,
    )
    .await;

    let pair = match state.issuer().issue_pair(auth.principal.user_id) {
        Ok(pair) => pair,
        Err(err) => return (staged, AuthError::Internal(err.into())).into_response(),
    };
    let csrf_token = match super::utils::generate_csrf_token() {
        Ok(token) => token,
        Err(err) => return (staged, AuthError::Internal(err)).into_response(),
    };

    // The fresh pair supersedes anything the resolver staged.
    let mut response_headers = HeaderMap::new();
    cookies::append_auth_cookies(
        &mut response_headers,
        state.config(),
        &pair.access_token,
        Some(&pair.refresh_token),
        &csrf_token,
    );
    (
        StatusCode::OK,
        response_headers,
        Json(MessageResponse::new("Password changed successfully")),
    )
        .into_response()
}

#[utoipa::path(
    get,
    path = "/auth/permissions",
    responses(
        (status = 200, description = "Role and permission flags", body = PermissionsResponse),
        (status = 401, description = "Unauthorized", body = String)
    ),
    tag = "auth"
)]
pub async fn permissions(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
) -> Response {
    let auth = match principal::require_auth(&headers, &pool, &state).await {
        Ok(auth) => auth,
        Err(err) => return err.with_cleared_cookies(state.config()),
    };

    let mut roles = Vec::new();
    if auth.principal.is_staff {
        roles.push("staff".to_string());
    }
    if auth.principal.is_superuser {
        roles.push("superuser".to_string());
    }

    let response = PermissionsResponse {
        user_id: auth.principal.user_id,
        username: auth.principal.username.clone(),
        is_staff: auth.principal.is_staff,
        is_superuser: auth.principal.is_superuser,
        roles,
    };

    let mut staged = HeaderMap::new();
    auth.stage_cookies(&mut staged, &state);
    (StatusCode::OK, staged, Json(response)).into_response()
}
