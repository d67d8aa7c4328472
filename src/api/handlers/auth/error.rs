//! Error taxonomy for the auth endpoints.
//!
//! Every variant maps to a stable status code and a machine-readable JSON
//! body. Credential and token failures stay deliberately vague: the response
//! never reveals whether the username, the password, the signature, or the
//! denylist was the problem.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use tracing::error;
use utoipa::ToSchema;

use super::cookies;
use super::state::AuthConfig;

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub(super) fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Account is temporarily locked")]
    AccountLocked { retry_after_seconds: u64 },
    #[error("Too many requests")]
    RateLimited { retry_after_seconds: u64 },
    #[error("Invalid or expired token")]
    TokenInvalid,
    #[error("Authentication required")]
    TokenMissing,
    #[error("Request validation failed")]
    Validation(Vec<FieldError>),
    #[error("Not found")]
    NotFound,
    #[error("Could not establish identity")]
    Unauthorized,
    #[error("Internal error")]
    Internal(anyhow::Error),
}

impl AuthError {
    /// Stable machine-readable error kind for response bodies.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::AccountLocked { .. } => "account_locked",
            Self::RateLimited { .. } => "rate_limited",
            Self::TokenInvalid => "token_invalid",
            Self::TokenMissing => "token_missing",
            Self::Validation(_) => "validation_error",
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::Internal(_) => "internal_error",
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials | Self::TokenInvalid | Self::TokenMissing | Self::Unauthorized => {
                StatusCode::UNAUTHORIZED
            }
            Self::AccountLocked { .. } => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::AccountLocked {
                retry_after_seconds,
            }
            | Self::RateLimited {
                retry_after_seconds,
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }

    /// Render the error and expire the auth cookies in the same response, so
    /// clients are never left holding stale unusable tokens.
    pub(super) fn with_cleared_cookies(self, config: &AuthConfig) -> Response {
        let mut headers = HeaderMap::new();
        cookies::append_cleared_cookies(&mut headers, config);
        (headers, self).into_response()
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let Self::Internal(err) = &self {
            error!("Internal error: {err:#}");
        }

        let mut body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        if let Self::Validation(fields) = &self {
            body["details"] = json!(fields);
        }
        if let Some(seconds) = self.retry_after_seconds() {
            body["retry_after_seconds"] = json!(seconds);
        }

        let mut response = (self.status(), Json(body)).into_response();
        if let Some(seconds) = self.retry_after_seconds() {
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(AuthError::InvalidCredentials.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::AccountLocked {
                retry_after_seconds: 60
            }
            .status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AuthError::RateLimited {
                retry_after_seconds: 1
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(AuthError::TokenInvalid.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::TokenMissing.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::Validation(Vec::new()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AuthError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(AuthError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn kinds_are_snake_case() {
        assert_eq!(AuthError::InvalidCredentials.kind(), "invalid_credentials");
        assert_eq!(AuthError::TokenMissing.kind(), "token_missing");
        assert_eq!(AuthError::Validation(Vec::new()).kind(), "validation_error");
    }

    #[test]
    fn rate_limited_response_carries_retry_after() {
        let response = AuthError::RateLimited {
            retry_after_seconds: 42,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
            Some("42")
        );
    }

    #[test]
    fn invalid_credentials_message_does_not_name_the_field() {
        let message = AuthError::InvalidCredentials.to_string();
        assert!(!message.to_lowercase().contains("username"));
        assert!(!message.to_lowercase().contains("password"));
    }
}
