//! Auth configuration and shared state.

use secrecy::SecretString;
use std::sync::Arc;

use super::rate_limit::RateLimiter;
use super::tokens::TokenIssuer;

const DEFAULT_ACCESS_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_LOCKOUT_MAX_FAILURES: i32 = 5;
const DEFAULT_LOCKOUT_SECONDS: i64 = 30 * 60;
const DEFAULT_AUDIT_RETENTION_DAYS: i64 = 180;
const DEFAULT_AUDIT_SWEEP_INTERVAL_SECONDS: u64 = 60 * 60;
const DEFAULT_TOKEN_ISSUER: &str = "custodia";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    token_secret: SecretString,
    token_issuer: String,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    rotation_enabled: bool,
    cookie_domain: Option<String>,
    insecure_cookies: bool,
    lockout_max_failures: i32,
    lockout_seconds: i64,
    audit_retention_days: i64,
    audit_sweep_interval_seconds: u64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String, token_secret: SecretString) -> Self {
        Self {
            frontend_base_url,
            token_secret,
            token_issuer: DEFAULT_TOKEN_ISSUER.to_string(),
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            rotation_enabled: true,
            cookie_domain: None,
            insecure_cookies: false,
            lockout_max_failures: DEFAULT_LOCKOUT_MAX_FAILURES,
            lockout_seconds: DEFAULT_LOCKOUT_SECONDS,
            audit_retention_days: DEFAULT_AUDIT_RETENTION_DAYS,
            audit_sweep_interval_seconds: DEFAULT_AUDIT_SWEEP_INTERVAL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_token_issuer(mut self, issuer: String) -> Self {
        self.token_issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_rotation_enabled(mut self, enabled: bool) -> Self {
        self.rotation_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_cookie_domain(mut self, domain: Option<String>) -> Self {
        self.cookie_domain = domain;
        self
    }

    #[must_use]
    pub fn with_insecure_cookies(mut self, insecure: bool) -> Self {
        self.insecure_cookies = insecure;
        self
    }

    #[must_use]
    pub fn with_audit_retention_days(mut self, days: i64) -> Self {
        self.audit_retention_days = days;
        self
    }

    #[must_use]
    pub fn with_audit_sweep_interval_seconds(mut self, seconds: u64) -> Self {
        self.audit_sweep_interval_seconds = seconds;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(super) fn token_secret(&self) -> &SecretString {
        &self.token_secret
    }

    pub(super) fn token_issuer(&self) -> &str {
        &self.token_issuer
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    #[must_use]
    pub fn rotation_enabled(&self) -> bool {
        self.rotation_enabled
    }

    pub(super) fn cookie_domain(&self) -> Option<&str> {
        self.cookie_domain.as_deref()
    }

    /// Cookies are `Secure` unless the operator explicitly opted into the
    /// insecure development mode.
    pub(super) fn cookie_secure(&self) -> bool {
        !self.insecure_cookies
    }

    pub(super) fn lockout_max_failures(&self) -> i32 {
        self.lockout_max_failures
    }

    pub(super) fn lockout_seconds(&self) -> i64 {
        self.lockout_seconds
    }

    #[must_use]
    pub fn audit_retention_days(&self) -> i64 {
        self.audit_retention_days
    }

    #[must_use]
    pub fn audit_sweep_interval_seconds(&self) -> u64 {
        self.audit_sweep_interval_seconds
    }
}

pub struct AuthState {
    config: AuthConfig,
    issuer: TokenIssuer,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        let issuer = TokenIssuer::new(
            config.token_secret(),
            config.token_issuer().to_string(),
            config.access_ttl_seconds(),
            config.refresh_ttl_seconds(),
        );
        Self {
            config,
            issuer,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(crate) fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    pub(super) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }
}
