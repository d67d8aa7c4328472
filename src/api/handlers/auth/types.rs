//! Request/response types for the auth endpoints.
//!
//! Token values never appear in any response body; cookie transport is the
//! only channel that carries them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::storage::ProfileRecord;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password_confirm: String,
    pub gdpr_consent: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub marketing_consent: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    /// Username or email address.
    pub username: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ProfileResponse {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub phone: String,
    pub company: String,
    pub position: String,
    pub timezone: String,
    pub language: String,
    pub gdpr_consent: bool,
    pub gdpr_consent_at: Option<DateTime<Utc>>,
    pub marketing_consent: bool,
    pub mfa_enabled: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<ProfileRecord> for ProfileResponse {
    fn from(record: ProfileRecord) -> Self {
        let full_name = format!("{} {}", record.first_name, record.last_name)
            .trim()
            .to_string();
        Self {
            user_id: record.user_id,
            username: record.username,
            email: record.email,
            first_name: record.first_name,
            last_name: record.last_name,
            full_name,
            phone: record.phone,
            company: record.company,
            position: record.position,
            timezone: record.timezone,
            language: record.language,
            gdpr_consent: record.gdpr_consent,
            gdpr_consent_at: record.gdpr_consent_at,
            marketing_consent: record.marketing_consent,
            mfa_enabled: record.mfa_enabled,
            last_login_at: record.last_login_at,
            last_activity_at: record.last_activity_at,
            created_at: record.created_at,
        }
    }
}

/// Partial profile update; absent fields are left untouched.
#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct ProfileUpdateRequest {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub position: Option<String>,
    pub timezone: Option<String>,
    pub language: Option<String>,
    pub marketing_consent: Option<bool>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PermissionsResponse {
    pub user_id: Uuid,
    pub username: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub roles: Vec<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ConsentRequest {
    pub consent_type: String,
    pub consent_given: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ConsentResponse {
    pub consent_type: String,
    pub consent_given: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AuditTrailEntry {
    pub action: String,
    pub model_name: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ExportResponse {
    pub profile: ProfileResponse,
    pub consents: Vec<ConsentResponse>,
    pub audit_trail: Vec<AuditTrailEntry>,
    pub exported_at: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub(super) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    #[test]
    fn register_request_defaults_optional_fields() -> Result<()> {
        let decoded: RegisterRequest = serde_json::from_value(serde_json::json!({
            "username": "alice",
            "email": "alice@example.com",
            "password": "Str0ng!pass",
            "password_confirm": "Str0ng!pass",
            "gdpr_consent": true,
        }))?;
        assert_eq!(decoded.first_name, "");
        assert!(!decoded.marketing_consent);
        Ok(())
    }

    #[test]
    fn login_request_round_trips() -> Result<()> {
        let request = LoginRequest {
            username: "alice@example.com".to_string(),
            password: "hunter2!A".to_string(),
        };
        let value = serde_json::to_value(&request)?;
        let username = value
            .get("username")
            .and_then(serde_json::Value::as_str)
            .context("missing username")?;
        assert_eq!(username, "alice@example.com");
        let decoded: LoginRequest = serde_json::from_value(value)?;
        assert_eq!(decoded.password, "hunter2!A");
        Ok(())
    }

    #[test]
    fn profile_update_request_is_fully_optional() -> Result<()> {
        let decoded: ProfileUpdateRequest = serde_json::from_value(serde_json::json!({}))?;
        assert!(decoded.email.is_none());
        assert!(decoded.marketing_consent.is_none());
        Ok(())
    }
}
