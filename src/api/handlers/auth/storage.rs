//! Database access for identities, profiles, consent, and the token denylist.
//!
//! Lockout counting and denylist insertion are single-statement atomic
//! operations; concurrent login failures and concurrent refresh attempts
//! resolve at the database rather than in handler code.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::utils::{is_unique_violation, violated_constraint};

/// Outcome when attempting to create a new identity.
#[derive(Debug)]
pub(super) enum RegisterOutcome {
    Created(Uuid),
    UsernameTaken,
    EmailTaken,
}

/// Fields consumed by the registration transaction.
pub(super) struct NewUser<'a> {
    pub(super) username: &'a str,
    pub(super) email: &'a str,
    pub(super) password_hash: &'a str,
    pub(super) first_name: &'a str,
    pub(super) last_name: &'a str,
    pub(super) phone: &'a str,
    pub(super) company: &'a str,
    pub(super) position: &'a str,
    pub(super) marketing_consent: bool,
    pub(super) ip_address: Option<&'a str>,
    pub(super) user_agent: &'a str,
}

/// Minimal fields needed to evaluate a login attempt.
pub(super) struct CredentialRecord {
    pub(super) user_id: Uuid,
    pub(super) password_hash: String,
    pub(super) is_active: bool,
    pub(super) failed_login_attempts: i32,
    pub(super) locked_until: Option<DateTime<Utc>>,
}

/// Identity data the resolver hands to downstream handlers.
pub(super) struct UserRecord {
    pub(super) user_id: Uuid,
    pub(super) username: String,
    pub(super) is_staff: bool,
    pub(super) is_superuser: bool,
}

/// Joined user + profile row for serialization and snapshots.
#[derive(Debug)]
pub(super) struct ProfileRecord {
    pub(super) user_id: Uuid,
    pub(super) username: String,
    pub(super) email: String,
    pub(super) first_name: String,
    pub(super) last_name: String,
    pub(super) phone: String,
    pub(super) company: String,
    pub(super) position: String,
    pub(super) timezone: String,
    pub(super) language: String,
    pub(super) gdpr_consent: bool,
    pub(super) gdpr_consent_at: Option<DateTime<Utc>>,
    pub(super) marketing_consent: bool,
    pub(super) mfa_enabled: bool,
    pub(super) last_login_at: Option<DateTime<Utc>>,
    pub(super) last_activity_at: Option<DateTime<Utc>>,
    pub(super) created_at: DateTime<Utc>,
}

/// Optional fields for a partial profile update; `None` leaves the column
/// untouched.
#[derive(Debug, Default)]
pub(super) struct ProfileChanges {
    pub(super) email: Option<String>,
    pub(super) first_name: Option<String>,
    pub(super) last_name: Option<String>,
    pub(super) phone: Option<String>,
    pub(super) company: Option<String>,
    pub(super) position: Option<String>,
    pub(super) timezone: Option<String>,
    pub(super) language: Option<String>,
    pub(super) marketing_consent: Option<bool>,
}

pub(super) struct ConsentRow {
    pub(super) consent_type: String,
    pub(super) consent_given: bool,
    pub(super) updated_at: DateTime<Utc>,
}

const PROFILE_COLUMNS: &str = r"
    users.id, users.username, users.email, users.first_name, users.last_name,
    users.last_login_at, users.created_at,
    p.phone, p.company, p.position, p.timezone, p.language,
    p.gdpr_consent, p.gdpr_consent_at, p.marketing_consent, p.mfa_enabled,
    p.last_activity_at
";

fn profile_from_row(row: &sqlx::postgres::PgRow) -> ProfileRecord {
    ProfileRecord {
        user_id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        phone: row.get("phone"),
        company: row.get("company"),
        position: row.get("position"),
        timezone: row.get("timezone"),
        language: row.get("language"),
        gdpr_consent: row.get("gdpr_consent"),
        gdpr_consent_at: row.get("gdpr_consent_at"),
        marketing_consent: row.get("marketing_consent"),
        mfa_enabled: row.get("mfa_enabled"),
        last_login_at: row.get("last_login_at"),
        last_activity_at: row.get("last_activity_at"),
        created_at: row.get("created_at"),
    }
}

/// Create the identity, its profile, and the registration consent record as
/// one transaction. A user row without a profile row can never be observed.
pub(super) async fn insert_user_with_profile(
    pool: &PgPool,
    new_user: &NewUser<'_>,
) -> Result<RegisterOutcome> {
    let mut tx = pool.begin().await.context("begin register transaction")?;

    let query = r"
        INSERT INTO users
            (username, email, password_hash, first_name, last_name)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(new_user.username)
        .bind(new_user.email)
        .bind(new_user.password_hash)
        .bind(new_user.first_name)
        .bind(new_user.last_name)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await;

    let user_id: Uuid = match row {
        Ok(row) => row.get("id"),
        Err(err) => {
            if is_unique_violation(&err) {
                let constraint = violated_constraint(&err);
                let _ = tx.rollback().await;
                return Ok(match constraint.as_deref() {
                    Some("users_email_key") => RegisterOutcome::EmailTaken,
                    _ => RegisterOutcome::UsernameTaken,
                });
            }
            return Err(err).context("failed to insert user");
        }
    };

    let query = r"
        INSERT INTO user_profiles
            (user_id, phone, company, position, gdpr_consent, gdpr_consent_at, marketing_consent)
        VALUES ($1, $2, $3, $4, TRUE, NOW(), $5)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(new_user.phone)
        .bind(new_user.company)
        .bind(new_user.position)
        .bind(new_user.marketing_consent)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert user profile")?;

    let query = r"
        INSERT INTO consent_records
            (user_id, consent_type, consent_given, ip_address, user_agent)
        VALUES ($1, 'registration', TRUE, $2::inet, $3)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(new_user.ip_address)
        .bind(new_user.user_agent)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert registration consent")?;

    tx.commit().await.context("commit register transaction")?;

    Ok(RegisterOutcome::Created(user_id))
}

/// Look up login data by username, or by email when the identifier contains
/// an `@`.
pub(super) async fn lookup_credentials(
    pool: &PgPool,
    identifier: &str,
) -> Result<Option<CredentialRecord>> {
    let query = r"
        SELECT users.id, users.password_hash, users.is_active,
               p.failed_login_attempts, p.locked_until
        FROM users
        JOIN user_profiles p ON p.user_id = users.id
        WHERE users.username = $1 OR users.email = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(identifier)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup credentials")?;

    Ok(row.map(|row| CredentialRecord {
        user_id: row.get("id"),
        password_hash: row.get("password_hash"),
        is_active: row.get("is_active"),
        failed_login_attempts: row.get("failed_login_attempts"),
        locked_until: row.get("locked_until"),
    }))
}

/// Count one failed password check and lock the account when the streak
/// reaches `max_failures`. Increment and lock are a single statement so
/// concurrent failures never undercount.
pub(super) async fn record_login_failure(
    pool: &PgPool,
    user_id: Uuid,
    max_failures: i32,
    lockout_seconds: i64,
) -> Result<(i32, Option<DateTime<Utc>>)> {
    let query = r"
        UPDATE user_profiles
        SET failed_login_attempts = failed_login_attempts + 1,
            locked_until = CASE
                WHEN failed_login_attempts + 1 >= $2
                THEN NOW() + ($3 * INTERVAL '1 second')
                ELSE locked_until
            END,
            updated_at = NOW()
        WHERE user_id = $1
        RETURNING failed_login_attempts, locked_until
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(max_failures)
        .bind(lockout_seconds)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to record login failure")?;

    Ok((row.get("failed_login_attempts"), row.get("locked_until")))
}

/// Reset the failure counter and stamp login metadata on success.
pub(super) async fn record_login_success(
    pool: &PgPool,
    user_id: Uuid,
    ip_address: Option<&str>,
) -> Result<()> {
    let query = r"
        UPDATE user_profiles
        SET failed_login_attempts = 0,
            locked_until = NULL,
            last_login_ip = $2::inet,
            last_activity_at = NOW(),
            updated_at = NOW()
        WHERE user_id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(ip_address)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to reset login counters")?;

    let query = "UPDATE users SET last_login_at = NOW(), updated_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to stamp last login")?;

    Ok(())
}

/// Resolve a token subject to an identity. Only active users resolve.
pub(super) async fn lookup_user(pool: &PgPool, user_id: Uuid) -> Result<Option<UserRecord>> {
    let query = r"
        SELECT id, username, is_staff, is_superuser
        FROM users
        WHERE id = $1 AND is_active
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user")?;

    Ok(row.map(|row| UserRecord {
        user_id: row.get("id"),
        username: row.get("username"),
        is_staff: row.get("is_staff"),
        is_superuser: row.get("is_superuser"),
    }))
}

pub(super) async fn fetch_profile(pool: &PgPool, user_id: Uuid) -> Result<Option<ProfileRecord>> {
    let query = format!(
        r"
        SELECT {PROFILE_COLUMNS}
        FROM users
        JOIN user_profiles p ON p.user_id = users.id
        WHERE users.id = $1
        LIMIT 1
    "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT"
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch profile")?;

    Ok(row.as_ref().map(profile_from_row))
}

/// Outcome of a profile update; the email column has a uniqueness constraint
/// other fields do not.
#[derive(Debug)]
pub(super) enum ProfileUpdateOutcome {
    Updated(ProfileRecord),
    EmailTaken,
    Missing,
}

/// Apply a partial update; absent fields keep their values.
pub(super) async fn update_profile(
    pool: &PgPool,
    user_id: Uuid,
    changes: &ProfileChanges,
) -> Result<ProfileUpdateOutcome> {
    let mut tx = pool.begin().await.context("begin profile update")?;

    let query = r"
        UPDATE users
        SET email = COALESCE($2, email),
            first_name = COALESCE($3, first_name),
            last_name = COALESCE($4, last_name),
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(changes.email.as_deref())
        .bind(changes.first_name.as_deref())
        .bind(changes.last_name.as_deref())
        .execute(&mut *tx)
        .instrument(span)
        .await;

    match result {
        Ok(done) if done.rows_affected() == 0 => {
            let _ = tx.rollback().await;
            return Ok(ProfileUpdateOutcome::Missing);
        }
        Ok(_) => {}
        Err(err) if is_unique_violation(&err) => {
            let _ = tx.rollback().await;
            return Ok(ProfileUpdateOutcome::EmailTaken);
        }
        Err(err) => return Err(err).context("failed to update user fields"),
    }

    let query = r"
        UPDATE user_profiles
        SET phone = COALESCE($2, phone),
            company = COALESCE($3, company),
            position = COALESCE($4, position),
            timezone = COALESCE($5, timezone),
            language = COALESCE($6, language),
            marketing_consent = COALESCE($7, marketing_consent),
            updated_at = NOW()
        WHERE user_id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(changes.phone.as_deref())
        .bind(changes.company.as_deref())
        .bind(changes.position.as_deref())
        .bind(changes.timezone.as_deref())
        .bind(changes.language.as_deref())
        .bind(changes.marketing_consent)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to update profile fields")?;

    tx.commit().await.context("commit profile update")?;

    match fetch_profile(pool, user_id).await? {
        Some(profile) => Ok(ProfileUpdateOutcome::Updated(profile)),
        None => Ok(ProfileUpdateOutcome::Missing),
    }
}

pub(super) async fn fetch_password_hash(pool: &PgPool, user_id: Uuid) -> Result<Option<String>> {
    let query = "SELECT password_hash FROM users WHERE id = $1 AND is_active LIMIT 1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch password hash")?;
    Ok(row.map(|row| row.get("password_hash")))
}

pub(super) async fn update_password(pool: &PgPool, user_id: Uuid, hash: &str) -> Result<()> {
    let query = "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update password")?;
    Ok(())
}

/// Consume a refresh token by denylisting its `jti`. Returns `true` when this
/// call inserted the entry; `false` means the token was already consumed.
/// `ON CONFLICT DO NOTHING` on the primary key makes concurrent rotations of
/// the same token resolve to exactly one winner.
pub(super) async fn deny_refresh_token(
    pool: &PgPool,
    jti: Uuid,
    user_id: Uuid,
    expires_at: DateTime<Utc>,
) -> Result<bool> {
    let query = r"
        INSERT INTO refresh_token_denylist (jti, user_id, expires_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (jti) DO NOTHING
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(jti)
        .bind(user_id)
        .bind(expires_at)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to denylist refresh token")?;
    Ok(result.rows_affected() == 1)
}

/// Read-only denylist check, used when rotation is disabled.
pub(super) async fn is_refresh_denied(pool: &PgPool, jti: Uuid) -> Result<bool> {
    let query = "SELECT 1 FROM refresh_token_denylist WHERE jti = $1 LIMIT 1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(jti)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to check refresh denylist")?;
    Ok(row.is_some())
}

/// Drop denylist entries whose tokens have expired on their own; they can
/// never verify again regardless.
pub(super) async fn purge_expired_denylist(pool: &PgPool) -> Result<u64> {
    let query = "DELETE FROM refresh_token_denylist WHERE expires_at < NOW()";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to purge refresh denylist")?;
    Ok(result.rows_affected())
}

/// Upsert one consent record per `(user, consent_type)`.
pub(super) async fn upsert_consent(
    pool: &PgPool,
    user_id: Uuid,
    consent_type: &str,
    consent_given: bool,
    ip_address: Option<&str>,
    user_agent: &str,
) -> Result<Uuid> {
    let query = r"
        INSERT INTO consent_records
            (user_id, consent_type, consent_given, ip_address, user_agent)
        VALUES ($1, $2, $3, $4::inet, $5)
        ON CONFLICT (user_id, consent_type) DO UPDATE
        SET consent_given = EXCLUDED.consent_given,
            ip_address = EXCLUDED.ip_address,
            user_agent = EXCLUDED.user_agent,
            updated_at = NOW()
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(consent_type)
        .bind(consent_given)
        .bind(ip_address)
        .bind(user_agent)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to upsert consent record")?;
    Ok(row.get("id"))
}

pub(super) async fn list_consents(pool: &PgPool, user_id: Uuid) -> Result<Vec<ConsentRow>> {
    let query = r"
        SELECT consent_type, consent_given, updated_at
        FROM consent_records
        WHERE user_id = $1
        ORDER BY consent_type
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list consent records")?;

    Ok(rows
        .iter()
        .map(|row| ConsentRow {
            consent_type: row.get("consent_type"),
            consent_given: row.get("consent_given"),
            updated_at: row.get("updated_at"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use sqlx::postgres::PgPoolOptions;
    use std::time::Duration;

    const SCHEMA_SQL: &str =
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/db/sql/01_custodia.sql"));

    async fn test_pool() -> Result<Option<PgPool>> {
        let Ok(dsn) = std::env::var("CUSTODIA_TEST_DSN") else {
            eprintln!("Skipping database test: CUSTODIA_TEST_DSN not set");
            return Ok(None);
        };
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&dsn)
            .await?;
        sqlx::Executor::execute(&pool, SCHEMA_SQL).await?;
        Ok(Some(pool))
    }

    fn new_user<'a>(username: &'a str, email: &'a str) -> NewUser<'a> {
        NewUser {
            username,
            email,
            password_hash: "$argon2id$test",
            first_name: "Test",
            last_name: "User",
            phone: "",
            company: "",
            position: "",
            marketing_consent: false,
            ip_address: Some("127.0.0.1"),
            user_agent: "tests",
        }
    }

    async fn insert_unique_user(pool: &PgPool) -> Result<Uuid> {
        let (user_id, _) = insert_named_user(pool).await?;
        Ok(user_id)
    }

    async fn insert_named_user(pool: &PgPool) -> Result<(Uuid, String)> {
        let suffix = Uuid::new_v4().simple().to_string();
        let username = format!("user-{suffix}");
        let email = format!("{suffix}@example.com");
        match insert_user_with_profile(pool, &new_user(&username, &email)).await? {
            RegisterOutcome::Created(id) => Ok((id, username)),
            other => anyhow::bail!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn register_creates_user_profile_and_consent() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let user_id = insert_unique_user(&pool).await?;

        let profile = fetch_profile(&pool, user_id).await?.expect("profile row");
        assert!(profile.gdpr_consent);
        assert!(profile.gdpr_consent_at.is_some());

        let consents = list_consents(&pool, user_id).await?;
        assert_eq!(consents.len(), 1);
        assert_eq!(consents[0].consent_type, "registration");
        assert!(consents[0].consent_given);
        Ok(())
    }

    #[tokio::test]
    async fn register_reports_taken_username_and_email() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let suffix = Uuid::new_v4().simple().to_string();
        let username = format!("dup-{suffix}");
        let email = format!("dup-{suffix}@example.com");
        insert_user_with_profile(&pool, &new_user(&username, &email)).await?;

        let other_email = format!("other-{suffix}@example.com");
        let outcome = insert_user_with_profile(&pool, &new_user(&username, &other_email)).await?;
        assert!(matches!(outcome, RegisterOutcome::UsernameTaken));

        let other_username = format!("other-{suffix}");
        let outcome = insert_user_with_profile(&pool, &new_user(&other_username, &email)).await?;
        assert!(matches!(outcome, RegisterOutcome::EmailTaken));
        Ok(())
    }

    #[tokio::test]
    async fn fifth_failure_locks_and_success_resets() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let (user_id, username) = insert_named_user(&pool).await?;

        for expected in 1..=4 {
            let (attempts, locked_until) =
                record_login_failure(&pool, user_id, 5, 1800).await?;
            assert_eq!(attempts, expected);
            assert!(locked_until.is_none());
        }

        let (attempts, locked_until) = record_login_failure(&pool, user_id, 5, 1800).await?;
        assert_eq!(attempts, 5);
        let locked_until = locked_until.expect("account locked after 5 failures");
        assert!(locked_until > Utc::now());

        record_login_success(&pool, user_id, Some("127.0.0.1")).await?;
        let record = lookup_credentials(&pool, &username)
            .await?
            .expect("credentials");
        assert_eq!(record.failed_login_attempts, 0);
        assert!(record.locked_until.is_none());

        let profile = fetch_profile(&pool, user_id).await?.expect("profile");
        assert!(profile.last_login_at.is_some());
        assert!(profile.last_activity_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn lookup_credentials_by_username_or_email() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let suffix = Uuid::new_v4().simple().to_string();
        let username = format!("find-{suffix}");
        let email = format!("find-{suffix}@example.com");
        insert_user_with_profile(&pool, &new_user(&username, &email)).await?;

        assert!(lookup_credentials(&pool, &username).await?.is_some());
        assert!(lookup_credentials(&pool, &email).await?.is_some());
        assert!(lookup_credentials(&pool, "nobody-here").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn denylist_insert_is_consume_once() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let user_id = insert_unique_user(&pool).await?;
        let jti = Uuid::new_v4();
        let expires_at = Utc::now() + chrono::Duration::days(7);

        assert!(deny_refresh_token(&pool, jti, user_id, expires_at).await?);
        // Second consumer loses the race.
        assert!(!deny_refresh_token(&pool, jti, user_id, expires_at).await?);
        assert!(is_refresh_denied(&pool, jti).await?);
        assert!(!is_refresh_denied(&pool, Uuid::new_v4()).await?);
        Ok(())
    }

    #[tokio::test]
    async fn expired_denylist_entries_are_purged() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let user_id = insert_unique_user(&pool).await?;
        let jti = Uuid::new_v4();
        deny_refresh_token(&pool, jti, user_id, Utc::now() - chrono::Duration::hours(1)).await?;

        let purged = purge_expired_denylist(&pool).await?;
        assert!(purged >= 1);
        assert!(!is_refresh_denied(&pool, jti).await?);
        Ok(())
    }

    #[tokio::test]
    async fn consent_upsert_updates_in_place() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let user_id = insert_unique_user(&pool).await?;

        let first = upsert_consent(&pool, user_id, "marketing", true, Some("10.0.0.1"), "ua").await?;
        let second =
            upsert_consent(&pool, user_id, "marketing", false, Some("10.0.0.2"), "ua2").await?;
        assert_eq!(first, second, "re-submitting updates the existing record");

        let consents = list_consents(&pool, user_id).await?;
        let marketing = consents
            .iter()
            .find(|c| c.consent_type == "marketing")
            .expect("marketing consent row");
        assert!(!marketing.consent_given);
        Ok(())
    }

    #[tokio::test]
    async fn profile_partial_update_keeps_absent_fields() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let user_id = insert_unique_user(&pool).await?;

        let changes = ProfileChanges {
            phone: Some("+44 20 7946 0000".to_string()),
            company: Some("Glencore Desk".to_string()),
            ..ProfileChanges::default()
        };
        let outcome = update_profile(&pool, user_id, &changes).await?;
        let ProfileUpdateOutcome::Updated(profile) = outcome else {
            anyhow::bail!("expected update");
        };
        assert_eq!(profile.phone, "+44 20 7946 0000");
        assert_eq!(profile.company, "Glencore Desk");
        assert_eq!(profile.timezone, "UTC");
        assert_eq!(profile.first_name, "Test");
        Ok(())
    }
}
