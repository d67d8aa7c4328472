//! GDPR consent upsert and data export.

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
    error::{AuthError, FieldError},
    principal,
    state::AuthState,
    storage,
    types::{
        AuditTrailEntry, ConsentRequest, ConsentResponse, ExportResponse, MessageResponse,
        ProfileResponse,
    },
};

const EXPORTED_AUDIT_ENTRIES: i64 = 100;
const MAX_CONSENT_TYPE_LENGTH: usize = 50;

#[utoipa::path(
    post,
    path = "/auth/gdpr/consent",
    request_body = ConsentRequest,
    responses(
        (status = 200, description = "Consent recorded", body = MessageResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 401, description = "Unauthorized", body = String)
    ),
    tag = "gdpr"
)]
pub async fn consent(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<ConsentRequest>>,
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
    let consent_type = request.consent_type.trim().to_lowercase();
    if consent_type.is_empty() || consent_type.len() > MAX_CONSENT_TYPE_LENGTH {
        return (
            staged,
            AuthError::Validation(vec![FieldError::new(
                "consent_type",
                "Consent type must be 1-50 characters.",
            )]),
        )
            .into_response();
    }

    let meta = RequestMeta::from_headers(&headers);
    let record_id = match storage::upsert_consent(
        &pool,
        auth.principal.user_id,
        &consent_type,
        request.consent_given,
        meta.ip_address.as_deref(),
        &meta.user_agent,
    )
    .await
    {
        Ok(id) => id,
        Err(err) => return (staged, AuthError::Internal(err)).into_response(),
    };

    audit::record(
        &pool,
        Some(auth.principal.user_id),
        AuditAction::GdprConsent,
        "ConsentRecord",
        Some(&record_id.to_string()),
        &consent_type,
        Some(serde_json::json!({"consent_given": request.consent_given})),
        &meta,
    )
    .await;

    (
        StatusCode::OK,
        staged,
        Json(MessageResponse::new("GDPR consent updated successfully")),
    )
        .into_response()
}

#[utoipa::path(
    get,
    path = "/auth/gdpr/export",
    responses(
        (status = 200, description = "Full data export for the resolved identity", body = ExportResponse),
        (status = 401, description = "Unauthorized", body = String)
    ),
    tag = "gdpr"
)]
pub async fn export(
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
        Ok(Some(profile)) => ProfileResponse::from(profile),
        Ok(None) => return (staged, AuthError::NotFound).into_response(),
        Err(err) => return (staged, AuthError::Internal(err)).into_response(),
    };
    let consents = match storage::list_consents(&pool, auth.principal.user_id).await {
        Ok(rows) => rows
            .into_iter()
            .map(|row| ConsentResponse {
                consent_type: row.consent_type,
                consent_given: row.consent_given,
                updated_at: row.updated_at,
            })
            .collect(),
        Err(err) => return (staged, AuthError::Internal(err)).into_response(),
    };
    let audit_trail = match audit::recent_for_user(
        &pool,
        auth.principal.user_id,
        EXPORTED_AUDIT_ENTRIES,
    )
    .await
    {
        Ok(rows) => rows
            .into_iter()
            .map(|row| AuditTrailEntry {
                action: row.action,
                model_name: row.model_name,
                timestamp: row.created_at,
            })
            .collect(),
        Err(err) => return (staged, AuthError::Internal(err)).into_response(),
    };

    let meta = RequestMeta::from_headers(&headers);
    audit::record(
        &pool,
        Some(auth.principal.user_id),
        AuditAction::DataExport,
        "User",
        Some(&auth.principal.user_id.to_string()),
        &auth.principal.username,
        None,
        &meta,
    )
    .await;

    let response = ExportResponse {
        profile,
        consents,
        audit_trail,
        exported_at: Utc::now(),
    };

    (StatusCode::OK, staged, Json(response)).into_response()
}
