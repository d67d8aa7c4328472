use crate::api;
use anyhow::Result;
use secrecy::SecretString;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub token_secret: String,
    pub token_issuer: String,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
    pub rotation_enabled: bool,
    pub frontend_base_url: String,
    pub cookie_domain: Option<String>,
    pub insecure_cookies: bool,
    pub audit_retention_days: i64,
    pub audit_sweep_interval_seconds: u64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let auth_config = api::AuthConfig::new(
        args.frontend_base_url,
        SecretString::from(args.token_secret),
    )
    .with_token_issuer(args.token_issuer)
    .with_access_ttl_seconds(args.access_ttl_seconds)
    .with_refresh_ttl_seconds(args.refresh_ttl_seconds)
    .with_rotation_enabled(args.rotation_enabled)
    .with_cookie_domain(args.cookie_domain)
    .with_insecure_cookies(args.insecure_cookies)
    .with_audit_retention_days(args.audit_retention_days)
    .with_audit_sweep_interval_seconds(args.audit_sweep_interval_seconds);

    api::new(args.port, args.dsn, auth_config).await
}
