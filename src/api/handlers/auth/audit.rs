//! Append-only audit trail for security-relevant actions.
//!
//! Writes are best effort: a storage failure is logged and swallowed so the
//! triggering request never fails because of its own audit entry. A
//! background sweeper purges entries past the retention horizon and cleans
//! up expired denylist rows and stale rate-limit attempts while it is at it.

use anyhow::{Context, Result};
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{Instrument, error, info};
use uuid::Uuid;

use super::storage::purge_expired_denylist;
use super::utils::{extract_client_ip, extract_user_agent};

/// Rate-limit attempts only matter inside their window; anything older than
/// a day is noise.
const ATTEMPT_LOG_RETENTION_SECONDS: i64 = 24 * 60 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum AuditAction {
    Register,
    Login,
    Logout,
    TokenRefresh,
    Update,
    PasswordChange,
    GdprConsent,
    DataExport,
}

impl AuditAction {
    pub(super) fn as_str(self) -> &'static str {
        match self {
            Self::Register => "REGISTER",
            Self::Login => "LOGIN",
            Self::Logout => "LOGOUT",
            Self::TokenRefresh => "TOKEN_REFRESH",
            Self::Update => "UPDATE",
            Self::PasswordChange => "PASSWORD_CHANGE",
            Self::GdprConsent => "GDPR_CONSENT",
            Self::DataExport => "DATA_EXPORT",
        }
    }
}

/// Client context captured once per request for audit entries.
#[derive(Clone, Debug, Default)]
pub(super) struct RequestMeta {
    pub(super) ip_address: Option<String>,
    pub(super) user_agent: String,
}

impl RequestMeta {
    pub(super) fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            ip_address: extract_client_ip(headers),
            user_agent: extract_user_agent(headers),
        }
    }
}

/// Append one audit entry. Failures are reported via tracing and swallowed.
pub(super) async fn record(
    pool: &PgPool,
    actor: Option<Uuid>,
    action: AuditAction,
    model_name: &str,
    object_id: Option<&str>,
    object_repr: &str,
    changes: Option<serde_json::Value>,
    meta: &RequestMeta,
) {
    let payload = match changes {
        Some(value) => value.to_string(),
        None => "{}".to_string(),
    };
    let query = r"
        INSERT INTO audit_log
            (user_id, action, model_name, object_id, object_repr, changes, ip_address, user_agent)
        VALUES ($1, $2, $3, $4, $5, $6::jsonb, $7::inet, $8)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(actor)
        .bind(action.as_str())
        .bind(model_name)
        .bind(object_id)
        .bind(object_repr)
        .bind(payload)
        .bind(meta.ip_address.as_deref())
        .bind(meta.user_agent.as_str())
        .execute(pool)
        .instrument(span)
        .await;

    if let Err(err) = result {
        error!(action = action.as_str(), "Failed to write audit entry: {err}");
    }
}

pub(super) struct AuditEntrySummary {
    pub(super) action: String,
    pub(super) model_name: String,
    pub(super) created_at: DateTime<Utc>,
}

/// Most recent entries for one actor, newest first.
pub(super) async fn recent_for_user(
    pool: &PgPool,
    user_id: Uuid,
    limit: i64,
) -> Result<Vec<AuditEntrySummary>> {
    let query = r"
        SELECT action, model_name, created_at
        FROM audit_log
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT $2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(user_id)
        .bind(limit)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to fetch audit entries")?;

    Ok(rows
        .iter()
        .map(|row| AuditEntrySummary {
            action: row.get("action"),
            model_name: row.get("model_name"),
            created_at: row.get("created_at"),
        })
        .collect())
}

/// Delete audit entries older than the retention horizon; returns the count.
pub(super) async fn purge_expired(pool: &PgPool, retention_days: i64) -> Result<u64> {
    let query = "DELETE FROM audit_log WHERE created_at < NOW() - ($1 * INTERVAL '1 day')";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(retention_days)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to purge audit entries")?;
    Ok(result.rows_affected())
}

async fn prune_attempt_log(pool: &PgPool) -> Result<u64> {
    let query = "DELETE FROM auth_attempts WHERE created_at < NOW() - ($1 * INTERVAL '1 second')";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(ATTEMPT_LOG_RETENTION_SECONDS)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to prune attempt log")?;
    Ok(result.rows_affected())
}

/// Spawn the periodic retention sweep.
pub(crate) fn spawn_retention_worker(pool: PgPool, retention_days: i64, interval: Duration) {
    let interval = if interval.is_zero() {
        Duration::from_secs(60)
    } else {
        interval
    };
    tokio::spawn(async move {
        loop {
            sleep(interval).await;
            match purge_expired(&pool, retention_days).await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "Purged audit entries past retention"),
                Err(err) => error!("Audit retention sweep failed: {err}"),
            }
            match purge_expired_denylist(&pool).await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "Purged expired denylist entries"),
                Err(err) => error!("Denylist sweep failed: {err}"),
            }
            if let Err(err) = prune_attempt_log(&pool).await {
                error!("Attempt log sweep failed: {err}");
            }
        }
    });
}
