//! CLI arguments for the token, cookie, and audit policies.

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};

pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_TOKEN_ISSUER: &str = "token-issuer";
pub const ARG_ACCESS_TTL_SECONDS: &str = "access-ttl-seconds";
pub const ARG_REFRESH_TTL_SECONDS: &str = "refresh-ttl-seconds";
pub const ARG_DISABLE_ROTATION: &str = "disable-refresh-rotation";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_COOKIE_DOMAIN: &str = "cookie-domain";
pub const ARG_INSECURE_COOKIES: &str = "insecure-cookies";
pub const ARG_AUDIT_RETENTION_DAYS: &str = "audit-retention-days";
pub const ARG_AUDIT_SWEEP_INTERVAL_SECONDS: &str = "audit-sweep-interval-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("HS256 signing secret for access and refresh tokens")
                .env("CUSTODIA_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_ISSUER)
                .long(ARG_TOKEN_ISSUER)
                .help("Issuer claim stamped into and required from every token")
                .env("CUSTODIA_TOKEN_ISSUER")
                .default_value("custodia"),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL_SECONDS)
                .long(ARG_ACCESS_TTL_SECONDS)
                .help("Access token lifetime in seconds")
                .env("CUSTODIA_ACCESS_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL_SECONDS)
                .long(ARG_REFRESH_TTL_SECONDS)
                .help("Refresh token lifetime in seconds")
                .env("CUSTODIA_REFRESH_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_DISABLE_ROTATION)
                .long(ARG_DISABLE_ROTATION)
                .help("Keep refresh tokens valid across refreshes instead of rotating them")
                .env("CUSTODIA_DISABLE_REFRESH_ROTATION")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend origin allowed by CORS")
                .env("CUSTODIA_FRONTEND_BASE_URL")
                .default_value("http://localhost:3000"),
        )
        .arg(
            Arg::new(ARG_COOKIE_DOMAIN)
                .long(ARG_COOKIE_DOMAIN)
                .help("Domain attribute for auth cookies")
                .env("CUSTODIA_COOKIE_DOMAIN"),
        )
        .arg(
            Arg::new(ARG_INSECURE_COOKIES)
                .long(ARG_INSECURE_COOKIES)
                .help("Drop the Secure cookie flag (development only)")
                .env("CUSTODIA_INSECURE_COOKIES")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_AUDIT_RETENTION_DAYS)
                .long(ARG_AUDIT_RETENTION_DAYS)
                .help("Days to keep audit log entries")
                .env("CUSTODIA_AUDIT_RETENTION_DAYS")
                .default_value("180")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_AUDIT_SWEEP_INTERVAL_SECONDS)
                .long(ARG_AUDIT_SWEEP_INTERVAL_SECONDS)
                .help("Seconds between audit retention sweeps")
                .env("CUSTODIA_AUDIT_SWEEP_INTERVAL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[derive(Debug)]
pub struct Options {
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

impl Options {
    /// Collect the auth options from parsed matches.
    ///
    /// # Errors
    /// Returns an error when a required argument is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let token_secret = matches
            .get_one::<String>(ARG_TOKEN_SECRET)
            .cloned()
            .context("missing required argument: --token-secret")?;
        let token_issuer = matches
            .get_one::<String>(ARG_TOKEN_ISSUER)
            .cloned()
            .unwrap_or_else(|| "custodia".to_string());
        let frontend_base_url = matches
            .get_one::<String>(ARG_FRONTEND_BASE_URL)
            .cloned()
            .unwrap_or_else(|| "http://localhost:3000".to_string());

        Ok(Self {
            token_secret,
            token_issuer,
            access_ttl_seconds: matches
                .get_one::<i64>(ARG_ACCESS_TTL_SECONDS)
                .copied()
                .unwrap_or(600),
            refresh_ttl_seconds: matches
                .get_one::<i64>(ARG_REFRESH_TTL_SECONDS)
                .copied()
                .unwrap_or(604_800),
            rotation_enabled: !matches.get_flag(ARG_DISABLE_ROTATION),
            frontend_base_url,
            cookie_domain: matches.get_one::<String>(ARG_COOKIE_DOMAIN).cloned(),
            insecure_cookies: matches.get_flag(ARG_INSECURE_COOKIES),
            audit_retention_days: matches
                .get_one::<i64>(ARG_AUDIT_RETENTION_DAYS)
                .copied()
                .unwrap_or(180),
            audit_sweep_interval_seconds: matches
                .get_one::<u64>(ARG_AUDIT_SWEEP_INTERVAL_SECONDS)
                .copied()
                .unwrap_or(3600),
        })
    }
}
